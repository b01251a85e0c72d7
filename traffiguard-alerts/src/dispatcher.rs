//! Report → persist → snapshot → filter → deliver.
//!
//! Persistence is guaranteed, delivery is best-effort. A reporter only ever
//! sees a failure for its own bad input or an unreachable store, never for
//! someone else's broken connection.
//!
//! ```text
//! report ──► validate ──► AccidentStore::create ──► registry.snapshot()
//!                                                        │
//!                                within_radius filter ◄──┘
//!                                        │
//!                  ┌─────────────────────┼─────────────────────┐
//!                  ▼                     ▼                     ▼
//!             send_timeout          send_timeout          send_timeout
//!             (failures are logged, the entry stays registered)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use futures_util::future::join_all;
use tokio::sync::mpsc::error::SendTimeoutError;

use crate::error::{DeliveryFailure, DeliveryFailureKind, ReportError, ValidationError};
use crate::geo::{within_radius, Coordinate, DEFAULT_RADIUS_KM};
use crate::protocol::AlertMessage;
use crate::registry::{ConnectionEntry, ConnectionRegistry};
use crate::store::{AccidentReport, AccidentStore};

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Alert radius around an accident, km
    pub radius_km: f64,
    /// How long one send may wait for queue space
    pub delivery_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            radius_km: DEFAULT_RADIUS_KM,
            delivery_timeout: Duration::from_millis(500),
        }
    }
}

impl DispatchConfig {
    /// Default radius, short timeout so stalled receivers fail fast.
    pub fn for_testing() -> Self {
        Self {
            delivery_timeout: Duration::from_millis(50),
            ..Self::default()
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct DeliverySummary {
    /// Connections inside the radius
    pub matched: usize,
    pub delivered: usize,
    pub failures: Vec<DeliveryFailure>,
}

/// Cumulative dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub reports_accepted: u64,
    pub reports_rejected: u64,
    pub alerts_delivered: u64,
    pub delivery_failures: u64,
}

#[derive(Default)]
struct AtomicDispatchStats {
    reports_accepted: AtomicU64,
    reports_rejected: AtomicU64,
    alerts_delivered: AtomicU64,
    delivery_failures: AtomicU64,
}

pub struct AlertDispatcher {
    registry: Arc<ConnectionRegistry>,
    store: Arc<AccidentStore>,
    config: DispatchConfig,
    stats: AtomicDispatchStats,
}

impl AlertDispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<AccidentStore>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            stats: AtomicDispatchStats::default(),
        }
    }

    /// Report an accident using the configured radius.
    pub async fn report(
        &self,
        location: Coordinate,
        description: impl Into<String>,
    ) -> Result<AccidentReport, ReportError> {
        self.report_within(location, description, self.config.radius_km)
            .await
    }

    /// Report an accident, alerting connections within `radius_km`.
    ///
    /// Returns the persisted report regardless of how many deliveries
    /// succeeded.
    pub async fn report_within(
        &self,
        location: Coordinate,
        description: impl Into<String>,
        radius_km: f64,
    ) -> Result<AccidentReport, ReportError> {
        let description = description.into();

        let report = match self.validate(location, &description, radius_km) {
            Ok(()) => self.store.create(location, description),
            Err(e) => Err(e.into()),
        };
        let report = match report {
            Ok(report) => report,
            Err(e) => {
                self.stats.reports_rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Rejected accident report at {location}: {e}");
                return Err(e);
            }
        };
        self.stats.reports_accepted.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Accident {} reported at {}: {}",
            report.id,
            report.location,
            report.description
        );

        let summary = self.dispatch(&report, radius_km).await;
        log::info!(
            "Accident {} alerted {}/{} nearby connections",
            report.id,
            summary.delivered,
            summary.matched
        );

        Ok(report)
    }

    /// Fan `report` out to every registered connection within `radius_km`.
    pub async fn dispatch(&self, report: &AccidentReport, radius_km: f64) -> DeliverySummary {
        let targets: Vec<ConnectionEntry> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|entry| within_radius(report.location, entry.location, radius_km))
            .collect();

        let alert = AlertMessage::from(report);
        let timeout = self.config.delivery_timeout;
        let results = join_all(
            targets
                .iter()
                .map(|entry| deliver(entry, alert.clone(), timeout)),
        )
        .await;

        let mut summary = DeliverySummary {
            matched: targets.len(),
            ..DeliverySummary::default()
        };
        for result in results {
            match result {
                Ok(()) => summary.delivered += 1,
                Err(failure) => {
                    log::warn!("{failure}");
                    summary.failures.push(failure);
                }
            }
        }

        self.stats
            .alerts_delivered
            .fetch_add(summary.delivered as u64, Ordering::Relaxed);
        self.stats
            .delivery_failures
            .fetch_add(summary.failures.len() as u64, Ordering::Relaxed);

        summary
    }

    /// Stored accidents around `center`. The poll-style read path.
    pub fn list_near(
        &self,
        center: Coordinate,
        max_km: Option<f64>,
    ) -> Result<Vec<AccidentReport>, ReportError> {
        let max_km = max_km.unwrap_or(self.config.radius_km);
        Self::check_radius(max_km)?;
        self.store.list_near(center, max_km)
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            reports_accepted: self.stats.reports_accepted.load(Ordering::Relaxed),
            reports_rejected: self.stats.reports_rejected.load(Ordering::Relaxed),
            alerts_delivered: self.stats.alerts_delivered.load(Ordering::Relaxed),
            delivery_failures: self.stats.delivery_failures.load(Ordering::Relaxed),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<AccidentStore> {
        &self.store
    }

    fn validate(
        &self,
        location: Coordinate,
        description: &str,
        radius_km: f64,
    ) -> Result<(), ValidationError> {
        if description.trim().is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        location.validate()?;
        Self::check_radius(radius_km)
    }

    fn check_radius(radius_km: f64) -> Result<(), ValidationError> {
        if !radius_km.is_finite() || radius_km < 0.0 {
            return Err(ValidationError::InvalidRadius(radius_km));
        }
        Ok(())
    }
}

async fn deliver(
    entry: &ConnectionEntry,
    alert: AlertMessage,
    timeout: Duration,
) -> Result<(), DeliveryFailure> {
    let accident_id = alert.accident_id;
    entry
        .channel
        .send_timeout(alert, timeout)
        .await
        .map_err(|e| DeliveryFailure {
            handle: entry.handle,
            accident_id,
            kind: match e {
                SendTimeoutError::Closed(_) => DeliveryFailureKind::Closed,
                SendTimeoutError::Timeout(_) => DeliveryFailureKind::TimedOut,
            },
        })
}
