//! Inclusion window: a time-boxed mode during which new node/sensor
//! presentations are accepted and registered with the controller.
//!
//! The window is a two-state machine (off/on) with an auto-off timer, plus
//! a node-to-equipment correlation cache filled from controller answers.
//! The cache associates a `node_id` with the controller-side equipment id,
//! which requires node-level presentations to be seen before the sensor
//! level presentations of the same node. Cache entries are added, never
//! evicted: they survive on/off cycles and are only dropped on process
//! restart.
//!
//! Owned by the gateway coordinator and shared by handle with the
//! dispatcher; there is no ambient global state.

use crate::status::StatusSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// One cache entry: the controller-side name and equipment id returned when
/// the node was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    pub name: String,
    pub equip_id: i64,
}

/// Point-in-time view of the window; `started_at`/`ends_at` are epoch
/// milliseconds, meaningful only while active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InclusionSnapshot {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<i64>,
    pub cache: BTreeMap<u8, NodeEntry>,
}

struct Inner {
    active: bool,
    started_at: Option<i64>,
    ends_at: Option<i64>,
    cache: BTreeMap<u8, NodeEntry>,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every (re)arm or explicit off; a timer may only fire the
    /// window it was armed for.
    epoch: u64,
}

impl Inner {
    fn snapshot(&self) -> InclusionSnapshot {
        InclusionSnapshot {
            active: self.active,
            started_at: if self.active { self.started_at } else { None },
            ends_at: if self.active { self.ends_at } else { None },
            cache: self.cache.clone(),
        }
    }
}

/// The inclusion-mode state machine. Lives for the process lifetime.
pub struct InclusionManager {
    delay: Duration,
    advertise: Duration,
    inner: Mutex<Inner>,
    sink: Arc<dyn StatusSink>,
}

impl InclusionManager {
    pub fn new(delay: Duration, advertise: Duration, sink: Arc<dyn StatusSink>) -> Arc<Self> {
        Arc::new(Self {
            delay,
            advertise,
            inner: Mutex::new(Inner {
                active: false,
                started_at: None,
                ends_at: None,
                cache: BTreeMap::new(),
                timer: None,
                epoch: 0,
            }),
            sink,
        })
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Turn the window on, or re-arm it when already on. Re-arming refreshes
    /// the deadline but keeps `started_at` and the cache untouched.
    pub fn set_on(self: &Arc<Self>) -> InclusionSnapshot {
        let snapshot = {
            let mut inner = self.inner.lock().expect("inclusion lock");
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.epoch += 1;
            let epoch = inner.epoch;
            let now = chrono::Utc::now().timestamp_millis();
            if !inner.active {
                inner.started_at = Some(now);
            }
            inner.active = true;
            inner.ends_at = Some(now + self.delay.as_millis() as i64);
            let mgr = Arc::downgrade(self);
            let delay = self.delay;
            inner.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                auto_off(mgr, epoch);
            }));
            inner.snapshot()
        };
        self.publish(&snapshot);
        snapshot
    }

    /// Turn the window off and cancel any pending timer. The cache is kept.
    pub fn set_off(&self) -> InclusionSnapshot {
        let snapshot = {
            let mut inner = self.inner.lock().expect("inclusion lock");
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.epoch += 1;
            inner.active = false;
            inner.snapshot()
        };
        self.publish(&snapshot);
        snapshot
    }

    /// Query without transition. Like the transitions, the query publishes
    /// the current status.
    pub fn snapshot(&self) -> InclusionSnapshot {
        let snapshot = self.inner.lock().expect("inclusion lock").snapshot();
        self.publish(&snapshot);
        snapshot
    }

    /// Window check for the dispatcher; no publication side effect.
    pub fn is_active(&self) -> bool {
        self.inner.lock().expect("inclusion lock").active
    }

    /// Record a node-to-equipment association. The first entry for a node
    /// wins; later adds for the same node are ignored.
    pub fn cache_add(&self, node_id: u8, entry: NodeEntry) {
        let mut inner = self.inner.lock().expect("inclusion lock");
        if inner.cache.contains_key(&node_id) {
            log::debug!("inclusion cache: node {} already set", node_id);
            return;
        }
        log::debug!("inclusion cache: node {} -> {:?}", node_id, entry);
        inner.cache.insert(node_id, entry);
    }

    pub fn cache_get(&self, node_id: u8) -> Option<NodeEntry> {
        self.inner
            .lock()
            .expect("inclusion lock")
            .cache
            .get(&node_id)
            .cloned()
    }

    fn publish(&self, snapshot: &InclusionSnapshot) {
        if let Ok(payload) = serde_json::to_value(snapshot) {
            self.sink.publish("inclusion/status", &payload);
        }
        self.sink.publish(
            "inclusion/config",
            &serde_json::json!({
                "delay": self.delay.as_millis() as u64,
                "advertise": self.advertise.as_millis() as u64,
            }),
        );
    }
}

fn auto_off(mgr: Weak<InclusionManager>, epoch: u64) {
    let Some(mgr) = mgr.upgrade() else { return };
    let snapshot = {
        let mut inner = mgr.inner.lock().expect("inclusion lock");
        // A superseded timer must never turn off a re-armed window.
        if inner.epoch != epoch || !inner.active {
            return;
        }
        inner.timer = None;
        inner.active = false;
        inner.snapshot()
    };
    log::info!("inclusion window expired");
    mgr.publish(&snapshot);
}
