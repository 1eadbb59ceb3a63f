//! Reconciliation Scheduler
//!
//! Background loop that drives PENDING transactions to a terminal state by
//! re-inquiring the provider on a bounded backoff schedule.
//!
//! Each tick lists PENDING rows older than the eligibility floor, oldest
//! first. A row is inquired only once `now - updated_at` reaches the interval
//! for its attempt count. A row that is still unresolved after every interval
//! in the schedule is force-failed on its next eligible tick.
//!
//! Attempt counts live in a process-local cache keyed by merchant and
//! reference. On a cache miss the count is seeded from the row's age, so a
//! restart resumes the budget instead of starting over. When a tick lists the
//! whole PENDING backlog, entries for rows no longer listed are dropped.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::error::ChargeError;
use super::orchestrator::ChargeOrchestrator;
use super::types::{StatusUpdate, Transaction, TransactionStatus, TxnKey};
use crate::config::SchedulerConfig;

pub const MAX_ATTEMPTS_REASON: &str = "Max retry attempts reached";

/// Required wait, in seconds since the row's last status-changing write,
/// before each successive inquiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySchedule {
    intervals: Vec<u64>,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            intervals: vec![20, 40, 120, 300, 600],
        }
    }
}

impl RetrySchedule {
    /// An empty list falls back to the default schedule
    pub fn new(intervals: Vec<u64>) -> Self {
        if intervals.is_empty() {
            Self::default()
        } else {
            Self { intervals }
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.intervals.len() as u32
    }

    /// Interval for the next inquiry; past the end the last interval repeats
    pub fn required_interval(&self, attempts: u32) -> u64 {
        self.intervals
            .get(attempts as usize)
            .or(self.intervals.last())
            .copied()
            .unwrap_or_default()
    }

    /// Attempts an uninterrupted scheduler would already have made for a row
    /// this old, leaving the currently due attempt still to run
    pub fn seeded_attempts(&self, elapsed_secs: i64) -> u32 {
        let elapsed = elapsed_secs.max(0) as u64;
        let due = self.intervals.iter().filter(|&&s| s <= elapsed).count() as u32;
        due.saturating_sub(1)
    }
}

/// Configuration for the scheduler loop
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick_interval: Duration,
    /// Rows younger than this are never listed
    pub eligibility_floor: Duration,
    pub batch_size: u32,
    pub schedule: RetrySchedule,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            eligibility_floor: Duration::from_secs(20),
            batch_size: 50,
            schedule: RetrySchedule::default(),
        }
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            eligibility_floor: Duration::from_secs(config.eligibility_floor_secs),
            batch_size: config.batch_size,
            schedule: RetrySchedule::new(config.retry_schedule_secs.clone()),
        }
    }
}

/// Per-tick counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    /// Listed but not yet due under the backoff schedule
    pub not_due: usize,
    pub inquired: usize,
    pub resolved: usize,
    pub still_pending: usize,
    pub inquiry_failures: usize,
    pub force_failed: usize,
}

pub struct ReconciliationScheduler {
    orchestrator: Arc<ChargeOrchestrator>,
    settings: SchedulerSettings,
    attempts: Mutex<FxHashMap<String, u32>>,
    /// Held for the whole of a tick
    tick_lock: tokio::sync::Mutex<()>,
}

impl ReconciliationScheduler {
    pub fn new(orchestrator: Arc<ChargeOrchestrator>, settings: SchedulerSettings) -> Self {
        Self {
            orchestrator,
            settings,
            attempts: Mutex::new(FxHashMap::default()),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_defaults(orchestrator: Arc<ChargeOrchestrator>) -> Self {
        Self::new(orchestrator, SchedulerSettings::default())
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Cached attempt count for a retry key
    pub fn attempts_for(&self, key: &str) -> Option<u32> {
        self.cache().get(key).copied()
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, FxHashMap<String, u32>> {
        self.attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped
    ///
    /// Ticks never overlap; a tick in progress finishes before the loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            tick_interval_ms = self.settings.tick_interval.as_millis() as u64,
            eligibility_floor_secs = self.settings.eligibility_floor.as_secs(),
            batch_size = self.settings.batch_size,
            schedule = ?self.settings.schedule.intervals,
            "Starting reconciliation scheduler"
        );

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick_at(Utc::now()).await {
                        error!(error = %e, "Reconciliation tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Reconciliation scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Run one tick, using `now` for every backoff decision
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport, ChargeError> {
        let _tick = self.tick_lock.lock().await;

        let rows = self
            .orchestrator
            .store()
            .list_pending_older_than(self.settings.eligibility_floor, self.settings.batch_size)
            .await?;

        let mut report = TickReport {
            examined: rows.len(),
            ..Default::default()
        };

        // A short batch is the whole backlog; anything else was resolved elsewhere
        if rows.len() < self.settings.batch_size as usize {
            self.prune(&rows);
        }

        if rows.is_empty() {
            debug!("No pending transactions to reconcile");
            return Ok(report);
        }

        info!(count = rows.len(), "Found pending transactions to check");

        for txn in &rows {
            // One row's store failure must not block the rest of the batch
            if let Err(e) = self.process(txn, now, &mut report).await {
                error!(
                    reference = %txn.reference,
                    merchant_id = %txn.merchant_id,
                    error = %e,
                    "Failed to reconcile transaction"
                );
            }
        }

        if report.resolved > 0 || report.force_failed > 0 {
            info!(
                resolved = report.resolved,
                force_failed = report.force_failed,
                still_pending = report.still_pending,
                inquiry_failures = report.inquiry_failures,
                "Reconciliation tick finished"
            );
        }

        Ok(report)
    }

    async fn process(
        &self,
        txn: &Transaction,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), ChargeError> {
        let schedule = &self.settings.schedule;
        let retry_key = txn.retry_key();
        let elapsed = (now - txn.updated_at).num_seconds();

        let attempts = *self
            .cache()
            .entry(retry_key.clone())
            .or_insert_with(|| schedule.seeded_attempts(elapsed));

        let required = schedule.required_interval(attempts);
        if elapsed < required as i64 {
            report.not_due += 1;
            return Ok(());
        }

        let max = schedule.max_attempts();
        if attempts >= max {
            warn!(
                reference = %txn.reference,
                merchant_id = %txn.merchant_id,
                provider_txn_id = ?txn.provider_transaction_id,
                attempts = attempts,
                "Max retry attempts reached, marking FAILED"
            );
            let update = StatusUpdate::status(TransactionStatus::Failed).with_desc(MAX_ATTEMPTS_REASON);
            self.orchestrator
                .store()
                .update_status(&TxnKey::of(txn), &update)
                .await?;
            self.cache().remove(&retry_key);
            report.force_failed += 1;
            return Ok(());
        }

        info!(
            reference = %txn.reference,
            provider = %txn.provider,
            provider_txn_id = ?txn.provider_transaction_id,
            "Inquiry attempt {}/{}",
            attempts + 1,
            max
        );

        let adapter = match self.orchestrator.adapter(txn.provider) {
            Ok(adapter) => adapter.clone(),
            Err(e) => {
                warn!(reference = %txn.reference, error = %e, "No adapter for pending transaction");
                self.record_failed_attempt(&retry_key, attempts, report);
                return Ok(());
            }
        };

        let Some(inquiry_key) = adapter.inquiry_key(txn) else {
            warn!(
                reference = %txn.reference,
                provider = %txn.provider,
                "Transaction has no inquiry key, counting as failed attempt"
            );
            self.record_failed_attempt(&retry_key, attempts, report);
            return Ok(());
        };

        report.inquired += 1;
        match adapter.inquire(&inquiry_key).await {
            Ok(resp) => {
                let normalized = resp.normalize(adapter.rules());
                if normalized.status == TransactionStatus::Pending {
                    self.cache().insert(retry_key, attempts + 1);
                    report.still_pending += 1;
                    debug!(
                        reference = %txn.reference,
                        attempts = attempts + 1,
                        "Still PENDING, will retry later"
                    );
                    return Ok(());
                }

                let update = StatusUpdate {
                    status: Some(normalized.status),
                    // Placeholders may learn their provider id only here
                    provider_transaction_id: txn
                        .provider_transaction_id
                        .is_none()
                        .then(|| resp.provider_transaction_id.clone())
                        .flatten(),
                    provider_response_code: resp.response_code.clone(),
                    provider_response_desc: resp.response_desc.clone(),
                    provider_payload: Some(resp.raw.clone()),
                };
                let stored = self
                    .orchestrator
                    .store()
                    .update_status(&TxnKey::of(txn), &update)
                    .await?;
                self.cache().remove(&retry_key);
                report.resolved += 1;

                info!(
                    reference = %txn.reference,
                    merchant_id = %txn.merchant_id,
                    new_status = %normalized.status,
                    stored_status = ?stored.map(|t| t.status),
                    "Transaction status changed"
                );
            }
            Err(e) => {
                warn!(
                    reference = %txn.reference,
                    provider = adapter.name(),
                    inquiry_key = %inquiry_key,
                    error = %e,
                    "Inquiry failed, counting as attempt"
                );
                self.record_failed_attempt(&retry_key, attempts, report);
            }
        }

        Ok(())
    }

    fn prune(&self, listed: &[Transaction]) {
        let keep: HashSet<String> = listed.iter().map(Transaction::retry_key).collect();
        let mut cache = self.cache();
        let before = cache.len();
        cache.retain(|key, _| keep.contains(key));
        if cache.len() < before {
            debug!(dropped = before - cache.len(), "Pruned attempt counters");
        }
    }

    fn record_failed_attempt(&self, retry_key: &str, attempts: u32, report: &mut TickReport) {
        self.cache().insert(retry_key.to_string(), attempts + 1);
        report.inquiry_failures += 1;
    }
}
