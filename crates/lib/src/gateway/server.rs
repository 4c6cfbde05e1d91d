//! Gateway coordinator: owns the transport, the dispatcher and the shared
//! state, and drives the inbound loop until shutdown.

use crate::bus::{DeviceBus, MqttBus, NetBus, SerialBus};
use crate::config::{Config, GatewayKind};
use crate::controller::RestController;
use crate::counters::{Counters, CountersSnapshot};
use crate::dispatch::Dispatcher;
use crate::inclusion::InclusionManager;
use crate::status::StatusSink;
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub struct Gateway {
    kind: GatewayKind,
    advertise: Duration,
    bus: Arc<dyn DeviceBus>,
    inclusion: Arc<InclusionManager>,
    counters: Arc<Counters>,
    dispatcher: Arc<Dispatcher>,
    sink: Arc<dyn StatusSink>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Gateway {
    /// Build the gateway from a validated config. Exactly one transport is
    /// instantiated, per `gateway.type`.
    pub fn new(config: &Config, sink: Arc<dyn StatusSink>) -> Result<Self> {
        config.validate()?;
        let bus: Arc<dyn DeviceBus> = match config.gateway.kind {
            GatewayKind::Mqtt => Arc::new(MqttBus::new(&config.mqtt)),
            GatewayKind::Net => Arc::new(NetBus::new(&config.net)),
            GatewayKind::Serial => Arc::new(SerialBus::new(&config.serial)),
        };
        let inclusion = InclusionManager::new(
            Duration::from_millis(config.gateway.inclusion_delay_ms),
            Duration::from_millis(config.gateway.inclusion_advertise_ms),
            sink.clone(),
        );
        let counters = Arc::new(Counters::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(RestController::new(&config.controller)?),
            bus.clone(),
            inclusion.clone(),
            counters.clone(),
            config.gateway.unit.trim().to_string(),
        ));
        Ok(Self {
            kind: config.gateway.kind,
            advertise: Duration::from_millis(config.gateway.inclusion_advertise_ms),
            bus,
            inclusion,
            counters,
            dispatcher,
            sink,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Open the transport and start the inbound dispatch loop and the
    /// periodic status advertisement. A transport that cannot be opened is
    /// logged and left inert: no messages flow, but the gateway keeps
    /// running and still answers operator commands.
    pub async fn start(&self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<String>(64);
        let dispatch_loop = match self.bus.start(tx).await {
            Ok(()) => {
                log::info!("gateway started on {} bus", self.bus.kind());
                // One consumer: frames are acted on strictly in arrival
                // order, controller round trips included.
                let dispatcher = self.dispatcher.clone();
                Some(tokio::spawn(async move {
                    while let Some(raw) = rx.recv().await {
                        dispatcher.dispatch(&raw).await;
                    }
                    log::info!("inbound channel closed, dispatch loop ending");
                }))
            }
            Err(e) => {
                log::error!(
                    "starting {} bus failed: {:#}; gateway runs with the bus inert",
                    self.bus.kind(),
                    e
                );
                None
            }
        };

        let sink = self.sink.clone();
        let counters = self.counters.clone();
        let inclusion = self.inclusion.clone();
        let advertise = self.advertise;
        let advertise_loop = tokio::spawn(async move {
            let mut interval = tokio::time::interval(advertise);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Ok(snapshot) = serde_json::to_value(counters.snapshot()) {
                    sink.publish("gateway/counters", &snapshot);
                }
                inclusion.snapshot();
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = dispatch_loop {
            tasks.push(task);
        }
        tasks.push(advertise_loop);
        Ok(())
    }

    /// Stop the transport and the background loops. Best effort and
    /// idempotent; never fails.
    pub async fn terminate(&self) {
        self.bus.stop().await;
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        log::info!("gateway terminated");
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.counters.snapshot()
    }

    pub fn inclusion(&self) -> &Arc<InclusionManager> {
        &self.inclusion
    }

    /// Operator verbs: `inclusion [on|off]` and `status`. The answer is a
    /// JSON document either way; an unknown verb answers an error document
    /// rather than failing the gateway. Every command received counts on
    /// the controller-side inbound counter.
    pub async fn operator_command(&self, verb: &str, args: &[String]) -> serde_json::Value {
        self.counters.inc_from_controller();
        match verb {
            "inclusion" => match args.first().map(String::as_str) {
                Some("on") => json!({ "inclusion": self.inclusion.set_on() }),
                Some("off") => json!({ "inclusion": self.inclusion.set_off() }),
                None => json!({ "inclusion": self.inclusion.snapshot() }),
                Some(other) => json!({ "error": format!("inclusion: expected on or off, got '{}'", other) }),
            },
            "status" => json!({
                "gateway": self.kind.as_str(),
                "counters": self.counters.snapshot(),
                "inclusion": self.inclusion.snapshot(),
            }),
            other => json!({ "error": format!("unknown command '{}'", other) }),
        }
    }
}

/// Run the gateway until SIGINT or SIGTERM, then stop it in order.
pub async fn run_gateway(config: Config, sink: Arc<dyn StatusSink>) -> Result<()> {
    let gateway = Gateway::new(&config, sink)?;
    gateway.start().await?;
    shutdown_signal().await;
    log::info!("shutdown signal received, stopping gateway");
    gateway.terminate().await;
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
