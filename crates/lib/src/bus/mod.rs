//! Device-side transports. Exactly one bus is active per gateway process,
//! selected by `gateway.type` in the config.
//!
//! A bus moves raw protocol frames: inbound frames are handed to the
//! dispatcher as text (parsing and error accounting happen there, in one
//! place, whatever the transport), outbound messages are serialized here.

pub mod mqtt;
pub mod net;
pub mod serial;

pub use mqtt::MqttBus;
pub use net::NetBus;
pub use serial::SerialBus;

use crate::message::Message;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One transport to the device network.
#[async_trait]
pub trait DeviceBus: Send + Sync {
    /// Transport name for logs and status reports.
    fn kind(&self) -> &'static str;

    /// Open the transport and start forwarding inbound frames to `inbound`.
    /// `start` does not retry; an open failure is reported to the
    /// coordinator, which logs it and leaves the bus inert.
    async fn start(&self, inbound: mpsc::Sender<String>) -> anyhow::Result<()>;

    /// Emit one message toward the devices. An `Err` means the attempt
    /// failed; delivery is never confirmed either way.
    async fn send(&self, msg: &Message) -> Result<(), String>;

    /// Close the transport. Idempotent; a second call is a no-op.
    async fn stop(&self);
}

/// Reader loop shared by the newline-framed transports (net, serial): one
/// frame per line, empty lines skipped. Ends when the peer closes or the
/// dispatcher goes away.
pub(crate) fn spawn_line_reader<R>(
    reader: R,
    inbound: mpsc::Sender<String>,
    kind: &'static str,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if inbound.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    log::warn!("{} bus: connection closed by peer", kind);
                    break;
                }
                Err(e) => {
                    log::error!("{} bus: read failed: {}", kind, e);
                    break;
                }
            }
        }
    })
}
