//! Frame dispatcher: the single consumer of the inbound bus channel.
//!
//! All frames of a connection pass through here sequentially, controller
//! round trips included, so causally ordered device traffic (a node
//! presentation followed by its sensor presentations) is acted on in order.
//!
//! A frame that cannot be acted on — malformed, outside the inclusion
//! window, missing its node registration, or left unanswered by the
//! controller — is logged and dropped; the device retries on its own
//! schedule.

use crate::bus::DeviceBus;
use crate::consts::{self, Command};
use crate::controller::{Controller, Method};
use crate::counters::Counters;
use crate::inclusion::{InclusionManager, NodeEntry};
use crate::message::{Direction, Message, NODE_SENSOR_ID};
use serde_json::json;
use std::sync::Arc;

pub struct Dispatcher {
    controller: Arc<dyn Controller>,
    bus: Arc<dyn DeviceBus>,
    inclusion: Arc<InclusionManager>,
    counters: Arc<Counters>,
    /// Unit letter answered to I_CONFIG requests.
    unit: String,
}

impl Dispatcher {
    pub fn new(
        controller: Arc<dyn Controller>,
        bus: Arc<dyn DeviceBus>,
        inclusion: Arc<InclusionManager>,
        counters: Arc<Counters>,
        unit: String,
    ) -> Self {
        Self {
            controller,
            bus,
            inclusion,
            counters,
            unit,
        }
    }

    /// Handle one raw inbound frame, running any controller round trip and
    /// device answer it implies to completion.
    pub async fn dispatch(&self, raw: &str) {
        self.counters.inc_from_devices();
        let msg = match Message::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                log::error!("dropping frame '{}': {}", raw.trim_end(), e);
                return;
            }
        };
        log::debug!("<- {}", msg.serialize());

        if msg.is_incoming_ack() {
            log::debug!("ack from node {} sensor {}", msg.node_id, msg.sensor_id);
            return;
        }

        match msg.command {
            Command::Presentation => self.handle_presentation(&msg).await,
            Command::Set | Command::Req => self.forward_value(&msg).await,
            Command::Internal => self.handle_internal(&msg).await,
            Command::Stream => {
                log::debug!("ignoring stream message from node {}", msg.node_id);
            }
        }
    }

    async fn handle_presentation(&self, msg: &Message) {
        if !self.inclusion.is_active() {
            log::warn!(
                "presentation from node {} outside the inclusion window, dropped",
                msg.node_id
            );
            return;
        }
        if msg.sensor_id == NODE_SENSOR_ID {
            self.register_node(msg).await;
        } else {
            self.register_sensor(msg).await;
        }
    }

    /// Node-level presentation: register the node with the controller and
    /// cache the equipment id it answers for the node's sensors.
    async fn register_node(&self, msg: &Message) {
        self.equipment_add(
            msg.node_id,
            json!({ "nodeType": msg.typ_label, "libVersion": msg.payload }),
        )
        .await;
    }

    /// `PUT .../{node}/add` with the given `mySensors` document; a positive
    /// answer feeds the correlation cache (first entry per node wins).
    async fn equipment_add(&self, node_id: u8, inner: serde_json::Value) {
        let path = format!("/v1/equipment/class/mySensors/{}/add", node_id);
        let Some(answer) = self
            .controller_request(Method::Put, &path, Some(json!({ "mySensors": inner })))
            .await
        else {
            return;
        };
        let Some(ok) = answer.get("OK") else {
            log::warn!(
                "controller refused registration of node {}: {}",
                node_id,
                answer
            );
            return;
        };
        let (Some(name), Some(equip_id)) = (
            ok.get("name").and_then(|v| v.as_str()),
            ok.get("equipId").and_then(|v| v.as_i64()),
        ) else {
            log::warn!(
                "controller answer for node {} misses name/equipId: {}",
                node_id,
                answer
            );
            return;
        };
        log::info!(
            "node {} registered as '{}' (equipment {})",
            node_id,
            name,
            equip_id
        );
        self.inclusion.cache_add(
            node_id,
            NodeEntry {
                name: name.to_string(),
                equip_id,
            },
        );
    }

    /// Sensor-level presentation: attach the sensor to the equipment cached
    /// for its node. A node never presented in this process has no cache
    /// entry and the sensor is dropped.
    async fn register_sensor(&self, msg: &Message) {
        let Some(entry) = self.inclusion.cache_get(msg.node_id) else {
            log::warn!(
                "sensor {} of node {}: node not registered, dropped",
                msg.sensor_id,
                msg.node_id
            );
            return;
        };
        let path = format!("/v1/command/equipment/{}/{}", entry.equip_id, msg.sensor_id);
        let mut inner = json!({ "sensorType": msg.typ_label });
        if !msg.payload.is_empty() {
            inner["sensorName"] = json!(msg.payload);
        }
        if self
            .controller_request(Method::Put, &path, Some(json!({ "mySensors": inner })))
            .await
            .is_some()
        {
            log::info!(
                "sensor {} of node {} registered on equipment {}",
                msg.sensor_id,
                msg.node_id,
                entry.equip_id
            );
        }
    }

    /// Forward a value-bearing message (set, req, battery report) to the
    /// controller.
    async fn forward_value(&self, msg: &Message) {
        let path = format!("/v1/equipment/class/mySensors/{}/value", msg.node_id);
        let body = json!({
            "sensorId": msg.sensor_id,
            "type": msg.typ_label,
            "payload": msg.payload,
            "kind": match msg.command {
                Command::Internal => "battery",
                Command::Req => "req",
                _ => "set",
            },
        });
        self.controller_request(Method::Post, &path, Some(body))
            .await;
    }

    async fn handle_internal(&self, msg: &Message) {
        match msg.typ {
            consts::I_BATTERY_LEVEL => self.forward_value(msg).await,
            consts::I_TIME => {
                let now = chrono::Utc::now().timestamp_millis();
                self.send_to_device(msg, consts::I_TIME, now).await;
            }
            consts::I_ID_REQUEST => self.assign_node_id(msg).await,
            consts::I_CONFIG => {
                self.send_to_device(msg, consts::I_CONFIG, self.unit.clone())
                    .await;
            }
            consts::I_LOG_MESSAGE | consts::I_DEBUG => {
                log::debug!("node {}: {}", msg.node_id, msg.payload);
            }
            consts::I_SKETCH_NAME => {
                self.merge_node_info(msg, json!({ "sketchName": msg.payload }))
                    .await;
            }
            consts::I_SKETCH_VERSION => {
                self.merge_node_info(msg, json!({ "sketchVersion": msg.payload }))
                    .await;
            }
            _ => match msg.typ_label {
                Some(label) => {
                    log::info!("unexpected internal message {} from node {}", label, msg.node_id);
                }
                None => {
                    log::error!(
                        "unknown internal message type {} from node {}",
                        msg.typ,
                        msg.node_id
                    );
                }
            },
        }
    }

    /// Sketch name/version reports behave like presentation material: merged
    /// into the node's equipment while the inclusion window is open, ignored
    /// otherwise.
    async fn merge_node_info(&self, msg: &Message, inner: serde_json::Value) {
        if !self.inclusion.is_active() || msg.sensor_id != NODE_SENSOR_ID {
            log::info!(
                "node {}: ignoring sketch report outside the inclusion window",
                msg.node_id
            );
            return;
        }
        self.equipment_add(msg.node_id, inner).await;
    }

    /// I_ID_REQUEST: ask the controller for the next free node id and answer
    /// with I_ID_RESPONSE. No controller answer, no response; the node keeps
    /// asking.
    async fn assign_node_id(&self, msg: &Message) {
        let Some(answer) = self
            .controller_request(Method::Get, "/v1/counter/mySensors/next", None)
            .await
        else {
            return;
        };
        let Some(id) = answer.get("lastId").and_then(|v| v.as_i64()) else {
            log::warn!("controller id answer misses lastId: {}", answer);
            return;
        };
        log::info!("assigning node id {}", id);
        self.send_to_device(msg, consts::I_ID_RESPONSE, id).await;
    }

    /// Answer the sender of `origin`: same addressing, acknowledgment
    /// requested, type and payload replaced.
    async fn send_to_device(&self, origin: &Message, typ: u8, payload: impl ToString) {
        let out = Message {
            direction: Direction::Outgoing,
            ack: true,
            ..origin.clone()
        }
        .with_type(typ)
        .with_payload(payload);
        log::debug!("-> {}", out.serialize());
        self.counters.inc_to_devices();
        if let Err(e) = self.bus.send(&out).await {
            log::error!("send to node {} failed: {}", out.node_id, e);
        }
    }

    /// Controller round trip with attempt accounting on both directions.
    async fn controller_request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Option<serde_json::Value> {
        self.counters.inc_to_controller();
        let answer = self.controller.request(method, path, body).await;
        if answer.is_some() {
            self.counters.inc_from_controller();
        }
        answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::LogStatusSink;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Controller double: answers from a queue, records every request.
    #[derive(Default)]
    struct FakeController {
        answers: Mutex<VecDeque<Option<Value>>>,
        requests: Mutex<Vec<(Method, String, Option<Value>)>>,
    }

    impl FakeController {
        fn answer(&self, v: Option<Value>) {
            self.answers.lock().unwrap().push_back(v);
        }

        fn requests(&self) -> Vec<(Method, String, Option<Value>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Controller for FakeController {
        async fn request(
            &self,
            method: Method,
            path: &str,
            body: Option<Value>,
        ) -> Option<Value> {
            self.requests
                .lock()
                .unwrap()
                .push((method, path.to_string(), body));
            self.answers.lock().unwrap().pop_front().flatten()
        }
    }

    /// Bus double: records outgoing messages.
    #[derive(Default)]
    struct FakeBus {
        sent: Mutex<Vec<Message>>,
    }

    impl FakeBus {
        fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DeviceBus for FakeBus {
        fn kind(&self) -> &'static str {
            "test"
        }

        async fn start(&self, _inbound: mpsc::Sender<String>) -> anyhow::Result<()> {
            Ok(())
        }

        async fn send(&self, msg: &Message) -> Result<(), String> {
            self.sent.lock().unwrap().push(msg.clone());
            Ok(())
        }

        async fn stop(&self) {}
    }

    struct Rig {
        dispatcher: Dispatcher,
        controller: Arc<FakeController>,
        bus: Arc<FakeBus>,
        inclusion: Arc<InclusionManager>,
        counters: Arc<Counters>,
    }

    fn rig() -> Rig {
        let controller = Arc::new(FakeController::default());
        let bus = Arc::new(FakeBus::default());
        let inclusion = InclusionManager::new(
            Duration::from_secs(300),
            Duration::from_secs(5),
            Arc::new(LogStatusSink),
        );
        let counters = Arc::new(Counters::new());
        let dispatcher = Dispatcher::new(
            controller.clone(),
            bus.clone(),
            inclusion.clone(),
            counters.clone(),
            "M".to_string(),
        );
        Rig {
            dispatcher,
            controller,
            bus,
            inclusion,
            counters,
        }
    }

    #[tokio::test]
    async fn malformed_frame_is_counted_and_dropped() {
        let rig = rig();
        rig.dispatcher.dispatch("garbage").await;
        rig.dispatcher.dispatch("abc;999;7;2;200;x").await;
        assert_eq!(rig.counters.snapshot().from_devices, 2);
        assert!(rig.controller.requests().is_empty());
        assert!(rig.bus.sent().is_empty());
    }

    #[tokio::test]
    async fn incoming_ack_is_not_acted_on() {
        let rig = rig();
        rig.dispatcher.dispatch("1;2;1;1;0;21.5").await;
        assert_eq!(rig.counters.snapshot().from_devices, 1);
        assert!(rig.controller.requests().is_empty());
        assert!(rig.bus.sent().is_empty());
    }

    #[tokio::test]
    async fn node_presentation_registers_and_caches() {
        let rig = rig();
        rig.inclusion.set_on();
        rig.controller
            .answer(Some(json!({ "OK": { "name": "node-12", "equipId": 97 } })));
        rig.dispatcher.dispatch("12;255;0;0;17;2.4.0").await;

        let requests = rig.controller.requests();
        assert_eq!(requests.len(), 1);
        let (method, path, body) = &requests[0];
        assert_eq!(*method, Method::Put);
        assert_eq!(path, "/v1/equipment/class/mySensors/12/add");
        assert_eq!(
            body.as_ref().unwrap(),
            &json!({ "mySensors": { "nodeType": "S_ARDUINO_NODE", "libVersion": "2.4.0" } })
        );
        assert_eq!(
            rig.inclusion.cache_get(12),
            Some(NodeEntry {
                name: "node-12".to_string(),
                equip_id: 97
            })
        );
        let snap = rig.counters.snapshot();
        assert_eq!(snap.to_controller, 1);
        assert_eq!(snap.from_controller, 1);
    }

    #[tokio::test]
    async fn presentation_outside_window_is_dropped() {
        let rig = rig();
        rig.dispatcher.dispatch("12;255;0;0;17;2.4.0").await;
        assert!(rig.controller.requests().is_empty());
        assert_eq!(rig.inclusion.cache_get(12), None);
    }

    #[tokio::test]
    async fn sensor_presentation_uses_cached_equipment() {
        let rig = rig();
        rig.inclusion.set_on();
        rig.inclusion.cache_add(
            12,
            NodeEntry {
                name: "node-12".to_string(),
                equip_id: 97,
            },
        );
        rig.controller.answer(Some(json!({ "OK": {} })));
        rig.dispatcher.dispatch("12;3;0;0;6;outside temp").await;

        let requests = rig.controller.requests();
        assert_eq!(requests.len(), 1);
        let (method, path, body) = &requests[0];
        assert_eq!(*method, Method::Put);
        assert_eq!(path, "/v1/command/equipment/97/3");
        assert_eq!(
            body.as_ref().unwrap(),
            &json!({ "mySensors": { "sensorType": "S_TEMP", "sensorName": "outside temp" } })
        );
    }

    #[tokio::test]
    async fn sensor_presentation_without_name_omits_it() {
        let rig = rig();
        rig.inclusion.set_on();
        rig.inclusion.cache_add(
            12,
            NodeEntry {
                name: "node-12".to_string(),
                equip_id: 97,
            },
        );
        rig.controller.answer(Some(json!({ "OK": {} })));
        rig.dispatcher.dispatch("12;3;0;0;6;").await;
        let (_, _, body) = &rig.controller.requests()[0];
        assert_eq!(
            body.as_ref().unwrap(),
            &json!({ "mySensors": { "sensorType": "S_TEMP" } })
        );
    }

    #[tokio::test]
    async fn sensor_presentation_without_node_registration_is_dropped() {
        let rig = rig();
        rig.inclusion.set_on();
        rig.dispatcher.dispatch("12;3;0;0;6;").await;
        assert!(rig.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn id_request_answers_with_controller_id() {
        let rig = rig();
        rig.controller.answer(Some(json!({ "lastId": 42 })));
        rig.dispatcher.dispatch("7;255;3;0;3;").await;

        let requests = rig.controller.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Method::Get);
        assert_eq!(requests[0].1, "/v1/counter/mySensors/next");
        let sent = rig.bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].serialize(), "7;255;3;1;4;42");
        assert_eq!(rig.counters.snapshot().to_devices, 1);
    }

    #[tokio::test]
    async fn unanswered_id_request_sends_nothing() {
        let rig = rig();
        rig.controller.answer(None);
        rig.dispatcher.dispatch("7;255;3;0;3;").await;
        assert!(rig.bus.sent().is_empty());
        // The attempt toward the controller still counts, the answer does not.
        let snap = rig.counters.snapshot();
        assert_eq!(snap.to_controller, 1);
        assert_eq!(snap.from_controller, 0);
    }

    #[tokio::test]
    async fn config_request_answers_unit() {
        let rig = rig();
        rig.dispatcher.dispatch("5;255;3;0;6;").await;
        let sent = rig.bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].serialize(), "5;255;3;1;6;M");
        assert!(rig.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn time_request_answers_epoch_millis() {
        let rig = rig();
        rig.dispatcher.dispatch("5;255;3;0;1;").await;
        let sent = rig.bus.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].typ, consts::I_TIME);
        assert!(sent[0].ack);
        let ts: i64 = sent[0].payload.parse().expect("epoch millis");
        assert!(ts > 1_700_000_000_000);
    }

    #[tokio::test]
    async fn sketch_name_merges_into_equipment_during_inclusion() {
        let rig = rig();
        rig.inclusion.set_on();
        rig.controller
            .answer(Some(json!({ "OK": { "name": "weather", "equipId": 7 } })));
        rig.dispatcher.dispatch("12;255;3;0;11;WeatherNode").await;

        let requests = rig.controller.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].1, "/v1/equipment/class/mySensors/12/add");
        assert_eq!(
            requests[0].2.as_ref().unwrap(),
            &json!({ "mySensors": { "sketchName": "WeatherNode" } })
        );
        assert_eq!(rig.inclusion.cache_get(12).map(|e| e.equip_id), Some(7));
    }

    #[tokio::test]
    async fn sketch_report_ignored_outside_inclusion() {
        let rig = rig();
        rig.dispatcher.dispatch("12;255;3;0;12;2.4.0").await;
        assert!(rig.controller.requests().is_empty());
    }

    #[tokio::test]
    async fn set_and_battery_forward_to_controller() {
        let rig = rig();
        rig.controller.answer(Some(json!({ "OK": {} })));
        rig.controller.answer(Some(json!({ "OK": {} })));
        rig.dispatcher.dispatch("3;2;1;0;0;21.5").await;
        rig.dispatcher.dispatch("3;255;3;0;0;87").await;

        let requests = rig.controller.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1, "/v1/equipment/class/mySensors/3/value");
        assert_eq!(
            requests[0].2.as_ref().unwrap(),
            &json!({ "sensorId": 2, "type": "V_TEMP", "payload": "21.5", "kind": "set" })
        );
        assert_eq!(
            requests[1].2.as_ref().unwrap(),
            &json!({ "sensorId": 255, "type": "I_BATTERY_LEVEL", "payload": "87", "kind": "battery" })
        );
    }

    #[tokio::test]
    async fn stream_and_diagnostics_are_ignored() {
        let rig = rig();
        rig.dispatcher.dispatch("1;2;4;0;200;blob").await;
        rig.dispatcher.dispatch("1;255;3;0;9;TSF:MSG:READ").await;
        rig.dispatcher.dispatch("1;255;3;0;11;WeatherNode").await;
        rig.dispatcher.dispatch("1;255;3;0;14;").await; // I_GATEWAY_READY
        assert!(rig.controller.requests().is_empty());
        assert!(rig.bus.sent().is_empty());
        assert_eq!(rig.counters.snapshot().from_devices, 4);
    }

    /// A node joins: presents itself, then a sensor, then reports a value.
    #[tokio::test]
    async fn node_join_scenario() {
        let rig = rig();
        rig.inclusion.set_on();
        rig.controller
            .answer(Some(json!({ "OK": { "name": "weather", "equipId": 7 } })));
        rig.controller.answer(Some(json!({ "OK": {} })));
        rig.controller.answer(Some(json!({ "OK": {} })));

        rig.dispatcher.dispatch("12;255;0;0;17;2.4.0").await;
        rig.dispatcher.dispatch("12;3;0;0;6;").await;
        rig.inclusion.set_off();
        rig.dispatcher.dispatch("12;3;1;0;0;19.2").await;

        let paths: Vec<String> = rig
            .controller
            .requests()
            .into_iter()
            .map(|(_, p, _)| p)
            .collect();
        assert_eq!(
            paths,
            vec![
                "/v1/equipment/class/mySensors/12/add",
                "/v1/command/equipment/7/3",
                "/v1/equipment/class/mySensors/12/value",
            ]
        );
        let snap = rig.counters.snapshot();
        assert_eq!(snap.from_devices, 3);
        assert_eq!(snap.to_controller, 3);
        assert_eq!(snap.from_controller, 3);
    }
}
