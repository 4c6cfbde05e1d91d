//! TCP transport: the gateway connects as a client to an Ethernet gateway
//! device (e.g. an ESP8266 running the MySensors gateway sketch) and
//! exchanges newline-terminated frames.

use super::{spawn_line_reader, DeviceBus};
use crate::config::NetBusConfig;
use crate::message::Message;
use anyhow::Context;
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct NetBus {
    host: String,
    port: u16,
    writer: Mutex<Option<OwnedWriteHalf>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl NetBus {
    pub fn new(config: &NetBusConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DeviceBus for NetBus {
    fn kind(&self) -> &'static str {
        "net"
    }

    async fn start(&self, inbound: mpsc::Sender<String>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr)
            .await
            .with_context(|| format!("connecting to net gateway at {}", addr))?;
        log::info!("net bus: connected to {}", addr);
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(spawn_line_reader(read_half, inbound, "net"));
        Ok(())
    }

    async fn send(&self, msg: &Message) -> Result<(), String> {
        let frame = format!("{}\n", msg.serialize());
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w
                .write_all(frame.as_bytes())
                .await
                .map_err(|e| format!("net bus write failed: {}", e)),
            None => Err("net bus not connected".to_string()),
        }
    }

    async fn stop(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
            log::info!("net bus: disconnected");
        }
    }
}
