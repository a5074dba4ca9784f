//! Site-wide maintenance flag, polled from the backend and published on a watch channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::engine::EngineError;
use crate::observability::MAINTENANCE_POLLS_TOTAL;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceStatus {
    pub enabled: bool,
    pub message: Option<String>,
    /// `None` until the first successful fetch.
    pub last_fetched: Option<DateTime<Utc>>,
}

pub struct MaintenanceMonitor {
    backend: Arc<dyn Backend>,
    interval: Duration,
    tx: watch::Sender<MaintenanceStatus>,
}

impl MaintenanceMonitor {
    pub fn new(backend: Arc<dyn Backend>, interval: Duration) -> Self {
        let (tx, _) = watch::channel(MaintenanceStatus::default());
        Self { backend, interval, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<MaintenanceStatus> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> MaintenanceStatus {
        self.tx.borrow().clone()
    }

    /// Fetch the flag once. On failure the last known status stays published.
    pub async fn refresh_now(&self) -> Result<MaintenanceStatus, EngineError> {
        let mode = match self.backend.maintenance().await {
            Ok(mode) => mode,
            Err(e) => {
                metrics::counter!(MAINTENANCE_POLLS_TOTAL, "status" => "error").increment(1);
                return Err(e);
            }
        };
        metrics::counter!(MAINTENANCE_POLLS_TOTAL, "status" => "ok").increment(1);

        let status = MaintenanceStatus {
            enabled: mode.enabled,
            message: mode.message,
            last_fetched: Some(Utc::now()),
        };
        self.tx.send_if_modified(|current| {
            let flipped = current.enabled != status.enabled || current.message != status.message;
            if flipped {
                info!(enabled = status.enabled, "maintenance mode changed");
            }
            *current = status.clone();
            flipped
        });
        Ok(status)
    }

    /// Poll until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("maintenance monitor stopped");
                    return;
                }
                _ = interval.tick() => {}
            }
            if let Err(e) = self.refresh_now().await {
                warn!(error = %e, "maintenance poll failed");
            }
        }
    }
}
