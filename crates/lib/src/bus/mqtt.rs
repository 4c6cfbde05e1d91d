//! MQTT transport: frames are spread over the topic path instead of being
//! newline-framed.
//!
//! Inbound, the broker delivers on `<fromDevices>/node/sensor/command/ack/type`
//! with the payload as a JSON document (or an empty body); the topic tail and
//! the decoded payload are reassembled into the canonical `;`-separated frame.
//! Outbound, the gateway publishes on the mirrored `<toDevices>/...` topic
//! with the raw payload as the body.

use super::DeviceBus;
use crate::config::MqttBusConfig;
use crate::message::Message;
use anyhow::Context;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct MqttBus {
    host: String,
    port: u16,
    from_devices: String,
    to_devices: String,
    client: Mutex<Option<AsyncClient>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// The topic roots must have been checked by [`crate::config::Config::validate`].
    pub fn new(config: &MqttBusConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            from_devices: config.from_devices.clone().unwrap_or_default(),
            to_devices: config.to_devices.clone().unwrap_or_default(),
            client: Mutex::new(None),
            poller: Mutex::new(None),
        }
    }
}

#[async_trait]
impl DeviceBus for MqttBus {
    fn kind(&self) -> &'static str {
        "mqtt"
    }

    async fn start(&self, inbound: mpsc::Sender<String>) -> anyhow::Result<()> {
        let mut options = MqttOptions::new("mysgw", &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        client
            .subscribe(format!("{}/#", self.from_devices), QoS::AtMostOnce)
            .await
            .with_context(|| format!("subscribing to {}/#", self.from_devices))?;
        log::info!(
            "mqtt bus: connecting to {}:{}, subscribed to {}/#",
            self.host,
            self.port,
            self.from_devices
        );

        let root = self.from_devices.clone();
        let poller = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let Some(frame) = frame_from_publish(&root, &publish.topic, &publish.payload)
                        else {
                            log::warn!("mqtt bus: unroutable topic {}", publish.topic);
                            continue;
                        };
                        if inbound.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // The event loop reconnects on the next poll.
                        log::error!("mqtt bus: connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        *self.client.lock().await = Some(client);
        *self.poller.lock().await = Some(poller);
        Ok(())
    }

    async fn send(&self, msg: &Message) -> Result<(), String> {
        let client = self.client.lock().await;
        let Some(client) = client.as_ref() else {
            return Err("mqtt bus not connected".to_string());
        };
        client
            .publish(
                topic_for(&self.to_devices, msg),
                QoS::AtMostOnce,
                false,
                msg.payload.clone(),
            )
            .await
            .map_err(|e| format!("mqtt bus publish failed: {}", e))
    }

    async fn stop(&self) {
        if let Some(client) = self.client.lock().await.take() {
            let _ = client.disconnect().await;
            log::info!("mqtt bus: disconnected");
        }
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
    }
}

/// Reassemble a frame from a publication. `None` for topics outside the
/// configured root and for tails that are not the exact five
/// `node/sensor/command/ack/type` segments (a longer tail would shift a
/// segment into the payload position).
fn frame_from_publish(root: &str, topic: &str, payload: &[u8]) -> Option<String> {
    let tail = topic.strip_prefix(root)?.strip_prefix('/')?;
    let segments: Vec<&str> = tail.split('/').collect();
    if segments.len() != 5 {
        return None;
    }
    Some(format!("{};{}", segments.join(";"), decode_payload(payload)))
}

/// MQTT bodies are JSON documents; a JSON string is used verbatim, any
/// other document by its compact serialization. An empty or malformed body
/// is a deliberately lenient empty payload.
fn decode_payload(payload: &[u8]) -> String {
    if payload.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<serde_json::Value>(payload) {
        Ok(serde_json::Value::String(s)) => s,
        Ok(v) => v.to_string(),
        Err(_) => {
            log::info!(
                "mqtt bus: unparsable body '{}', making it an empty payload",
                String::from_utf8_lossy(payload)
            );
            String::new()
        }
    }
}

fn topic_for(root: &str, msg: &Message) -> String {
    format!(
        "{}/{}/{}/{}/{}/{}",
        root,
        msg.node_id,
        msg.sensor_id,
        msg.command.code(),
        u8::from(msg.ack),
        msg.typ
    )
}
