//! Two long-lived background tasks — the health monitor and the
//! rediscovery loop — plus the on-demand entry points (manual trigger,
//! deploy webhook) that share `AppState::investigate_and_act`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tracing::{debug, info, warn};

use crate::state::AppState;
use crate::store::ServiceType;

const MONITOR_STARTUP_DELAY_SECS: u64 = 30;

pub struct HealthMonitor {
    state: Arc<AppState>,
    interval: Duration,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(state: Arc<AppState>, interval_secs: u64, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> Self {
        Self {
            state,
            interval: Duration::from_secs(interval_secs),
            shutdown_rx,
        }
    }

    /// Waits `MONITOR_STARTUP_DELAY_SECS`, then checks health for every
    /// non-database, non-cache service in turn — one at a time, never in
    /// parallel, to avoid load spikes and keep rate-limit behavior simple.
    pub async fn run(mut self) {
        info!("health monitor: starting in {}s", MONITOR_STARTUP_DELAY_SECS);

        tokio::select! {
            _ = time::sleep(Duration::from_secs(MONITOR_STARTUP_DELAY_SECS)) => {}
            _ = self.shutdown_rx.changed() => {
                if *self.shutdown_rx.borrow() {
                    info!("health monitor: shutdown before startup delay elapsed");
                    return;
                }
            }
        }

        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_all_services().await;
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("health monitor: shutdown signal received, stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn check_all_services(&self) {
        let services = self.state.store.list_services();
        for service in services {
            if matches!(service.service_type, ServiceType::Database | ServiceType::Cache) {
                continue;
            }

            let healthy = self
                .state
                .platform
                .check_health(&service.name, service.health_url.as_deref())
                .await;

            if !healthy && service.health_url.is_some() {
                warn!(service = %service.name, "health_check_failed");
                self.state.store.append_event(crate::store::Event {
                    event_type: "health_check_failed".to_string(),
                    service: Some(service.name.clone()),
                    message: format!("Health check failed for {}", service.name),
                    details: serde_json::json!({}),
                    timestamp: chrono::Utc::now(),
                });
                self.state
                    .investigate_and_act(&service.name, &format!("Health check failed for {}", service.name))
                    .await;
            } else {
                debug!(service = %service.name, healthy, "health check");
            }
        }
    }
}

pub struct RediscoveryLoop {
    state: Arc<AppState>,
    interval: Duration,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl RediscoveryLoop {
    pub fn new(state: Arc<AppState>, interval_secs: u64, shutdown_rx: tokio::sync::watch::Receiver<bool>) -> Self {
        Self {
            state,
            interval: Duration::from_secs(interval_secs),
            shutdown_rx,
        }
    }

    /// First run happens after a full interval has elapsed; the *initial*
    /// discovery run (so the readiness endpoint has data to report) is
    /// dispatched separately, as its own fire-and-forget task, by the
    /// caller — see `spawn_initial_discovery`.
    pub async fn run(mut self) {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.state.discovery.run().await;
                    self.state.metrics.discovery_run_completed();
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("rediscovery loop: shutdown signal received, stopping");
                        break;
                    }
                }
            }
        }
    }
}

/// Dispatched once at startup, independent of the rediscovery loop's own
/// interval, so the fleet model is populated before the first periodic run
/// fires an hour later.
pub fn spawn_initial_discovery(state: Arc<AppState>) {
    tokio::spawn(async move {
        info!("running initial discovery");
        state.discovery.run().await;
        state.metrics.discovery_run_completed();
    });
}
