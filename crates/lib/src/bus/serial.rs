//! Serial transport: a USB-attached gateway device exchanging
//! newline-terminated frames at the fixed protocol baud rate.

use super::{spawn_line_reader, DeviceBus};
use crate::config::{SerialBusConfig, SERIAL_BAUD};
use crate::message::Message;
use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

pub struct SerialBus {
    port: String,
    writer: Mutex<Option<WriteHalf<SerialStream>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SerialBus {
    pub fn new(config: &SerialBusConfig) -> Self {
        Self {
            port: config.port.clone(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DeviceBus for SerialBus {
    fn kind(&self) -> &'static str {
        "serial"
    }

    async fn start(&self, inbound: mpsc::Sender<String>) -> anyhow::Result<()> {
        let stream = tokio_serial::new(&self.port, SERIAL_BAUD)
            .open_native_async()
            .with_context(|| format!("opening serial port {}", self.port))?;
        log::info!("serial bus: opened {} at {} baud", self.port, SERIAL_BAUD);
        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock().await = Some(spawn_line_reader(read_half, inbound, "serial"));
        Ok(())
    }

    async fn send(&self, msg: &Message) -> Result<(), String> {
        let frame = format!("{}\n", msg.serialize());
        let mut writer = self.writer.lock().await;
        match writer.as_mut() {
            Some(w) => w
                .write_all(frame.as_bytes())
                .await
                .map_err(|e| format!("serial bus write failed: {}", e)),
            None => Err("serial bus not open".to_string()),
        }
    }

    async fn stop(&self) {
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }
        if let Some(mut w) = self.writer.lock().await.take() {
            let _ = w.shutdown().await;
            log::info!("serial bus: closed {}", self.port);
        }
    }
}
