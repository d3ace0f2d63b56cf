//! Durable notification delivery.
//!
//! Rows are claimed with a lease, delivered through a [`Deliver`]
//! implementation, and either marked delivered or rescheduled with
//! exponential backoff. A row that exhausts its attempts becomes `dead` and
//! stays visible until it is replayed.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::NotificationsConfig;
use crate::error::{ExecutaResult, RetryConfig};
use crate::models::OutboxEntry;
use crate::notify::{Deliver, OutboundMessage};
use crate::repo::OutboxStore;

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    Retrying { next_attempt_at: DateTime<Utc> },
    Dead,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub dead: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Retrying { .. } => self.retrying += 1,
            DeliveryOutcome::Dead => self.dead += 1,
        }
    }

    fn merge(&mut self, other: &DrainReport) {
        self.claimed += other.claimed;
        self.delivered += other.delivered;
        self.retrying += other.retrying;
        self.dead += other.dead;
    }
}

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    deliverer: Arc<dyn Deliver>,
    batch_size: u32,
    lease: Duration,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        deliverer: Arc<dyn Deliver>,
        config: &NotificationsConfig,
    ) -> Self {
        Self {
            store,
            deliverer,
            batch_size: config.outbox_batch_size.max(1),
            lease: Duration::from_secs(config.outbox_lease_secs),
        }
    }

    /// Attempts one claimed row and records the result.
    pub async fn process_entry(&self, entry: &OutboxEntry) -> ExecutaResult<DeliveryOutcome> {
        let now = Utc::now();
        let attempts = entry.attempts + 1;

        let result = match OutboundMessage::from_payload(&entry.payload) {
            Ok(message) => self.deliverer.deliver(&message).await,
            Err(e) => {
                error!(outbox_id = %entry.id, error = %e, "Outbox payload unreadable, dead-lettering");
                self.store
                    .record_failure(entry.id, attempts, &e.to_string(), now, true)
                    .await?;
                return Ok(DeliveryOutcome::Dead);
            }
        };

        match result {
            Ok(()) => {
                self.store.mark_delivered(entry.id, Utc::now()).await?;
                debug!(outbox_id = %entry.id, channel = %entry.channel, "Notification delivered");
                Ok(DeliveryOutcome::Delivered)
            }
            Err(e) => {
                let dead = attempts >= entry.max_attempts;
                let delay = RetryConfig::for_notifications(entry.max_attempts.max(1) as u32)
                    .delay_for_attempt((attempts - 1).max(0) as u32);
                let next_attempt_at = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::hours(1));

                self.store
                    .record_failure(entry.id, attempts, &e.to_string(), next_attempt_at, dead)
                    .await?;

                if dead {
                    error!(
                        outbox_id = %entry.id,
                        channel = %entry.channel,
                        attempts,
                        error_code = %e.error_code(),
                        "Notification dead-lettered: {}",
                        e
                    );
                    Ok(DeliveryOutcome::Dead)
                } else {
                    warn!(
                        outbox_id = %entry.id,
                        channel = %entry.channel,
                        attempts,
                        next_attempt_at = %next_attempt_at,
                        "Notification delivery failed: {}",
                        e
                    );
                    Ok(DeliveryOutcome::Retrying { next_attempt_at })
                }
            }
        }
    }

    async fn process_batch(&self, entries: Vec<OutboxEntry>) -> DrainReport {
        let mut report = DrainReport {
            claimed: entries.len(),
            ..Default::default()
        };
        for entry in &entries {
            match self.process_entry(entry).await {
                Ok(outcome) => report.record(&outcome),
                Err(e) => {
                    e.log();
                    report.retrying += 1;
                }
            }
        }
        report
    }

    /// Claims and processes one batch of due rows.
    pub async fn run_once(&self) -> ExecutaResult<DrainReport> {
        let entries = self
            .store
            .claim_due(Utc::now(), self.batch_size, self.lease)
            .await?;
        Ok(self.process_batch(entries).await)
    }

    /// Delivers the given rows now if they are due and not claimed elsewhere.
    pub async fn deliver_now(&self, ids: &[Uuid]) -> ExecutaResult<DrainReport> {
        let entries = self.store.claim_ids(ids, Utc::now(), self.lease).await?;
        Ok(self.process_batch(entries).await)
    }

    /// Processes batches until nothing is due.
    pub async fn drain(&self) -> ExecutaResult<DrainReport> {
        let mut total = DrainReport::default();
        loop {
            let report = self.run_once().await?;
            total.merge(&report);
            if report.claimed == 0 {
                return Ok(total);
            }
        }
    }

    /// Fire-and-forget delivery attempt for freshly enqueued rows.
    pub fn spawn_immediate(self: &Arc<Self>, ids: Vec<Uuid>) {
        if ids.is_empty() {
            return;
        }
        let processor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = processor.deliver_now(&ids).await {
                warn!("Immediate notification delivery failed: {}", e);
            }
        });
    }

    pub fn start_worker(self: &Arc<Self>, poll_interval: Duration) -> OutboxWorker {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let processor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            processor.worker_loop(poll_interval, shutdown_rx).await;
        });
        info!(
            "Outbox worker started with interval: {} seconds",
            poll_interval.as_secs()
        );
        OutboxWorker {
            shutdown_tx: Some(shutdown_tx),
            handle,
        }
    }

    async fn worker_loop(self: Arc<Self>, poll_interval: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
        let mut ticker = interval(poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.claimed > 0 => {
                            info!(
                                claimed = report.claimed,
                                delivered = report.delivered,
                                retrying = report.retrying,
                                dead = report.dead,
                                "Outbox batch processed"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => error!("Outbox poll failed: {}", e),
                    }
                }
                _ = &mut shutdown_rx => {
                    info!("Outbox worker shutting down");
                    break;
                }
            }
        }
    }
}

pub struct OutboxWorker {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl OutboxWorker {
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = self.handle.await {
            warn!("Outbox worker ended abnormally: {}", e);
        }
    }
}
