/// Orchestrator module - runs one monitoring cycle end to end
///
/// A cycle restores the published snapshot into a fresh in-memory database,
/// probes every tracked store, appends the checks plus one summary, validates
/// the result and publishes the new snapshot. Publishing is attempted on every
/// path that got past `Restoring`, failures included.

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::{Database, DatabaseImpl, PersistenceError, StoreRecord, SummaryReport};
use crate::monitoring::{ActiveWindow, Prober, Trigger, TriggerDecision};
use crate::snapshot::{Snapshot, SnapshotError, SnapshotStore};
use crate::stores::TrackedStore;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Failed to restore previous snapshot: {0}")]
    Restore(#[source] SnapshotError),

    #[error("Persistence layer unusable: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Cycle produced no status checks for {tracked} tracked stores")]
    EmptyResult { tracked: usize },

    #[error("Failed to publish snapshot: {0}")]
    Publish(#[source] SnapshotError),
}

impl CycleError {
    /// Process exit code for a run that ended with this error
    pub fn exit_code(&self) -> u8 {
        match self {
            CycleError::Persistence(_) | CycleError::EmptyResult { .. } => 1,
            CycleError::Restore(_) | CycleError::Publish(_) => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Restoring,
    Probing,
    Aggregating,
    Validating,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Restoring => "restoring",
            CyclePhase::Probing => "probing",
            CyclePhase::Aggregating => "aggregating",
            CyclePhase::Validating => "validating",
            CyclePhase::Publishing => "publishing",
            CyclePhase::Done => "done",
            CyclePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Logical key of the published snapshot
    pub snapshot_name: String,
    pub probe_timeout: Duration,
    pub concurrency: usize,
    /// Budget for `Probing`; on expiry the cycle aggregates what it has
    pub cycle_timeout: Duration,
    /// Wall-clock budget for the whole invocation
    pub deadline: Duration,
}

impl CycleSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot_name: config.snapshot.name.clone(),
            probe_timeout: config.probe_timeout(),
            concurrency: config.probe.concurrency.max(1),
            cycle_timeout: config.cycle_timeout(),
            deadline: config.run_deadline(),
        }
    }
}

/// What one invocation amounted to
#[derive(Debug)]
#[must_use]
pub enum Invocation {
    /// Outside the active window; nothing was fetched or published
    Skipped { local_time: NaiveTime },
    Completed(CycleReport),
}

impl Invocation {
    pub fn exit_code(&self) -> u8 {
        match self {
            Invocation::Skipped { .. } => 0,
            Invocation::Completed(report) => report.exit_code(),
        }
    }
}

#[derive(Debug)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub decision: TriggerDecision,
    /// Every phase entered, in order, starting at `Idle`
    pub trail: Vec<CyclePhase>,
    pub tracked: usize,
    pub checks_recorded: usize,
    pub probe_failures: usize,
    /// Probing was cut short by the cycle timeout or run deadline
    pub timed_out: bool,
    pub summary: Option<SummaryReport>,
    /// First fatal error before `Publishing`
    pub failure: Option<CycleError>,
    pub failed_at: Option<CyclePhase>,
    pub publish_error: Option<CycleError>,
    /// Another run published between our fetch and our publish
    pub overlap_detected: bool,
    /// Snapshot handed to the store, whether or not it was accepted
    pub snapshot: Option<Snapshot>,
}

impl CycleReport {
    fn new(cycle_id: Uuid, decision: TriggerDecision, tracked: usize) -> Self {
        Self {
            cycle_id,
            decision,
            trail: vec![CyclePhase::Idle],
            tracked,
            checks_recorded: 0,
            probe_failures: 0,
            timed_out: false,
            summary: None,
            failure: None,
            failed_at: None,
            publish_error: None,
            overlap_detected: false,
            snapshot: None,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.trail.last().copied().unwrap_or(CyclePhase::Idle)
    }

    pub fn published(&self) -> bool {
        self.snapshot.is_some() && self.publish_error.is_none()
    }

    /// 0 on success, 1 when validation failed, 2 when publishing failed
    pub fn exit_code(&self) -> u8 {
        if let Some(error) = &self.publish_error {
            return error.exit_code();
        }
        self.failure.as_ref().map_or(0, CycleError::exit_code)
    }

    fn enter(&mut self, phase: CyclePhase) {
        debug!(from = %self.phase(), to = %phase, "Cycle transition");
        self.trail.push(phase);
    }

    fn fail(&mut self, error: CycleError) {
        error!(phase = %self.phase(), error = %error, "Cycle failed");
        self.failed_at = Some(self.phase());
        self.failure = Some(error);
        self.enter(CyclePhase::Failed);
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.summary {
            Some(summary) => write!(
                f,
                "Cycle {}: {} stores, {} online, {} offline, {:.1}% uptime",
                self.cycle_id,
                summary.total_stores,
                summary.online_count,
                summary.offline_count,
                summary.uptime_percent
            )?,
            None => write!(f, "Cycle {}: no summary recorded", self.cycle_id)?,
        }
        if self.probe_failures > 0 {
            write!(f, ", {} probe failures", self.probe_failures)?;
        }
        if self.timed_out {
            write!(f, ", timed out after {} of {} stores", self.checks_recorded, self.tracked)?;
        }
        if let Some(failure) = &self.failure {
            write!(f, " [FAILED: {failure}]")?;
        }
        if let Some(error) = &self.publish_error {
            write!(f, " [NOT PUBLISHED: {error}]")?;
        }
        Ok(())
    }
}

/// One probed store, before it is written to the database
#[derive(Debug, Clone, Copy)]
struct ProbeRecord {
    /// Position in the tracked-store list
    index: usize,
    online: bool,
    checked_at: DateTime<Utc>,
    failed: bool,
}

pub struct Orchestrator {
    snapshots: Arc<dyn SnapshotStore>,
    prober: Arc<dyn Prober>,
    stores: Vec<TrackedStore>,
    settings: CycleSettings,
}

impl Orchestrator {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        prober: Arc<dyn Prober>,
        stores: Vec<TrackedStore>,
        settings: CycleSettings,
    ) -> Self {
        Self { snapshots, prober, stores, settings }
    }

    pub fn stores(&self) -> &[TrackedStore] {
        &self.stores
    }

    /// Gate on the active window, then run exactly one cycle
    ///
    /// Returns `Err` only when the prior snapshot exists but cannot be read;
    /// the run then stops before probing and publishes nothing.
    pub async fn invoke(
        &self,
        now: DateTime<Utc>,
        trigger: Trigger,
        window: &ActiveWindow,
    ) -> Result<Invocation, CycleError> {
        let decision = window.decide(now, trigger);
        match decision {
            TriggerDecision::Skip { local_time } => {
                info!(%local_time, %window, "Outside active window, skipping cycle");
                return Ok(Invocation::Skipped { local_time });
            }
            TriggerDecision::Override { local_time } => {
                info!(%local_time, %window, "Outside active window, running on manual override");
            }
            TriggerDecision::Run { .. } => {}
        }

        let cycle_id = Uuid::new_v4();
        let span = info_span!("cycle", cycle_id = %cycle_id, trigger = %trigger);
        self.run_cycle(cycle_id, decision, now).instrument(span).await.map(Invocation::Completed)
    }

    async fn run_cycle(
        &self,
        cycle_id: Uuid,
        decision: TriggerDecision,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let deadline = started + self.settings.deadline;
        let mut report = CycleReport::new(cycle_id, decision, self.stores.len());
        info!(stores = self.stores.len(), "Starting cycle");

        report.enter(CyclePhase::Restoring);
        let restored = match self.snapshots.fetch(&self.settings.snapshot_name).await {
            Ok(Some(snapshot)) => {
                info!(revision = snapshot.revision, checks = snapshot.status_checks.len(), "Restored snapshot");
                snapshot
            }
            Ok(None) => {
                info!("No published snapshot, starting from empty state");
                Snapshot::empty()
            }
            Err(e) => {
                error!(error = %e, "Cannot read previous snapshot, aborting without publishing");
                return Err(CycleError::Restore(e));
            }
        };
        let base_revision = restored.revision;

        let serialized = match DatabaseImpl::restore(&restored).await {
            Ok(database) => self.populate(&database, &mut report, now, started, deadline).await,
            Err(e) => {
                report.fail(e.into());
                None
            }
        };

        report.enter(CyclePhase::Publishing);
        let snapshot = serialized.unwrap_or(restored).succeeding(base_revision);
        self.publish(&mut report, snapshot, base_revision).await;

        if report.failure.is_none() && report.publish_error.is_none() {
            report.enter(CyclePhase::Done);
        } else if report.phase() != CyclePhase::Failed {
            report.enter(CyclePhase::Failed);
        }
        info!(elapsed_ms = started.elapsed().as_millis() as u64, "{report}");
        Ok(report)
    }

    /// Probing through Validating; `None` means the database became unusable
    async fn populate(
        &self,
        database: &DatabaseImpl,
        report: &mut CycleReport,
        now: DateTime<Utc>,
        started: Instant,
        deadline: Instant,
    ) -> Option<Snapshot> {
        report.enter(CyclePhase::Probing);
        let probe_deadline = deadline.min(started + self.settings.cycle_timeout);
        let records = self.probe_all(report, now, started, probe_deadline).await;

        report.enter(CyclePhase::Aggregating);
        if let Err(e) = self.aggregate(database, report, &records, cycle_clock(now, started)).await {
            report.fail(e.into());
            return None;
        }

        report.enter(CyclePhase::Validating);
        let snapshot = match database.serialize().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.fail(e.into());
                return None;
            }
        };
        if snapshot.is_empty() || (report.tracked > 0 && report.checks_recorded == 0) {
            report.fail(CycleError::EmptyResult { tracked: report.tracked });
        }
        Some(snapshot)
    }

    async fn probe_all(
        &self,
        report: &mut CycleReport,
        now: DateTime<Utc>,
        started: Instant,
        probe_deadline: Instant,
    ) -> Vec<ProbeRecord> {
        let probes = stream::iter(self.stores.iter().enumerate())
            .map(|(index, store)| self.probe_one(index, store, now, started))
            .buffer_unordered(self.settings.concurrency.max(1));
        let mut probes = std::pin::pin!(probes);

        let mut completed = Vec::with_capacity(self.stores.len());
        loop {
            match tokio::time::timeout_at(probe_deadline, probes.next()).await {
                Ok(Some(result)) => completed.push(result),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        completed = completed.len(),
                        tracked = self.stores.len(),
                        "Cycle timeout reached, aggregating partial results"
                    );
                    report.timed_out = true;
                    break;
                }
            }
        }

        // Keep the tracked-store order regardless of completion order
        completed.sort_by_key(|record| record.index);
        completed
    }

    async fn probe_one(
        &self,
        index: usize,
        store: &TrackedStore,
        now: DateTime<Utc>,
        started: Instant,
    ) -> ProbeRecord {
        match tokio::time::timeout(self.settings.probe_timeout, self.prober.probe(store)).await {
            Ok(Ok(outcome)) => {
                // Every row of a cycle shares the cycle clock; the prober's wall time is only logged
                debug!(
                    store_id = %store.id,
                    online = outcome.online,
                    observed_at = %outcome.checked_at,
                    "Probe finished"
                );
                ProbeRecord { index, online: outcome.online, checked_at: cycle_clock(now, started), failed: false }
            }
            Ok(Err(e)) => {
                warn!(store_id = %store.id, error = %e, "Probe failed, recording offline");
                ProbeRecord { index, online: false, checked_at: cycle_clock(now, started), failed: true }
            }
            Err(_) => {
                warn!(
                    store_id = %store.id,
                    timeout_ms = self.settings.probe_timeout.as_millis() as u64,
                    "Probe timed out, recording offline"
                );
                ProbeRecord { index, online: false, checked_at: cycle_clock(now, started), failed: true }
            }
        }
    }

    async fn aggregate(
        &self,
        database: &DatabaseImpl,
        report: &mut CycleReport,
        records: &[ProbeRecord],
        report_time: DateTime<Utc>,
    ) -> Result<(), PersistenceError> {
        for store in self.stores.iter() {
            database.upsert_store(&StoreRecord::from(store)).await?;
        }

        let mut online = 0u32;
        for record in records {
            let store = &self.stores[record.index];
            database.record_check(&store.id, record.online, record.checked_at).await?;
            report.checks_recorded += 1;
            if record.online {
                online += 1;
            }
            if record.failed {
                report.probe_failures += 1;
            }
        }

        let total = report.checks_recorded as u32;
        let summary = database.record_summary(total, online, total - online, report_time).await?;
        debug!(total, online, uptime = summary.uptime_percent, "Recorded summary");
        report.summary = Some(summary);
        Ok(())
    }

    async fn publish(&self, report: &mut CycleReport, snapshot: Snapshot, base_revision: u64) {
        let name = &self.settings.snapshot_name;
        match self.snapshots.current_revision(name).await {
            Ok(current) if current.unwrap_or(0) != base_revision => {
                warn!(
                    restored = base_revision,
                    current = current.unwrap_or(0),
                    "Snapshot changed since restore; another run published concurrently, overwriting \
                     (last writer wins)"
                );
                report.overlap_detected = true;
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Could not re-read snapshot revision before publish"),
        }

        if let Err(e) = self.snapshots.publish(name, &snapshot).await {
            error!(error = %e, revision = snapshot.revision, "Snapshot publish failed, cycle data is not durable");
            report.publish_error = Some(CycleError::Publish(e));
        } else {
            info!(revision = snapshot.revision, checks = snapshot.status_checks.len(), "Snapshot published");
        }
        report.snapshot = Some(snapshot);
    }
}

/// Current instant on the cycle's clock, anchored at the scheduler-supplied `now`
fn cycle_clock(now: DateTime<Utc>, started: Instant) -> DateTime<Utc> {
    now + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero())
}
