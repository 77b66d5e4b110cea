/// End-to-end cycle tests
///
/// These run full invocations against the in-memory snapshot store and
/// scripted probers:
/// - restore from nothing and from a previous cycle
/// - probe failures, per-probe and cycle timeouts
/// - validation and publish failures, overlap detection
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use tempfile::tempdir;

use crate::database::{Database, DatabaseImpl, StatusCheck, StoreRecord};
use crate::monitoring::{ActiveWindow, ProbeError, ProbeOutcome, Prober, Trigger, TriggerDecision};
use crate::orchestrator::{
    CycleError, CyclePhase, CycleReport, CycleSettings, Invocation, Orchestrator,
};
use crate::snapshot::{
    FileSnapshotStore, InMemorySnapshotStore, Snapshot, SnapshotError, SnapshotStore,
};
use crate::stores::{Platform, TrackedStore};

const NAME: &str = "store-database";

/// Prober following a fixed script per store id
#[derive(Default)]
struct ScriptedProber {
    offline: HashSet<String>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
}

impl ScriptedProber {
    fn all_online() -> Self {
        Self::default()
    }

    fn failing(ids: &[&str]) -> Self {
        Self { failing: ids.iter().map(|id| id.to_string()).collect(), ..Self::default() }
    }

    fn hanging(ids: &[&str]) -> Self {
        Self { hanging: ids.iter().map(|id| id.to_string()).collect(), ..Self::default() }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, store: &TrackedStore) -> Result<ProbeOutcome, ProbeError> {
        if self.hanging.contains(&store.id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.contains(&store.id) {
            return Err(ProbeError::Timeout { store: store.id.clone(), timeout: Duration::from_secs(10) });
        }
        Ok(ProbeOutcome { online: !self.offline.contains(&store.id), checked_at: Utc::now() })
    }
}

/// Store where another run publishes right after every fetch
struct RacingStore {
    inner: InMemorySnapshotStore,
}

#[async_trait]
impl SnapshotStore for RacingStore {
    async fn fetch(&self, name: &str) -> Result<Option<Snapshot>, SnapshotError> {
        let fetched = self.inner.fetch(name).await?;
        let previous = fetched.as_ref().map_or(0, |snapshot| snapshot.revision);
        self.inner.publish(name, &Snapshot::empty().succeeding(previous)).await?;
        Ok(fetched)
    }

    async fn publish(&self, name: &str, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        self.inner.publish(name, snapshot).await
    }

    async fn current_revision(&self, name: &str) -> Result<Option<u64>, SnapshotError> {
        self.inner.current_revision(name).await
    }
}

fn tracked(ids: &[&str]) -> Vec<TrackedStore> {
    ids.iter()
        .map(|id| TrackedStore {
            id: id.to_string(),
            name: format!("Store {id}"),
            url: format!("https://example.com/{id}"),
            platform: Platform::Other,
        })
        .collect()
}

fn settings() -> CycleSettings {
    CycleSettings {
        snapshot_name: NAME.to_string(),
        probe_timeout: Duration::from_secs(5),
        concurrency: 2,
        cycle_timeout: Duration::from_secs(30),
        deadline: Duration::from_secs(60),
    }
}

fn window() -> ActiveWindow {
    ActiveWindow::new(6, 21, 8).unwrap()
}

/// Manila local time on 2025-03-14 as a UTC instant
fn local(hour: u32) -> DateTime<Utc> {
    FixedOffset::east_opt(8 * 3600)
        .unwrap()
        .with_ymd_and_hms(2025, 3, 14, hour, 0, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn orchestrator(
    snapshots: Arc<dyn SnapshotStore>,
    prober: ScriptedProber,
    ids: &[&str],
    settings: CycleSettings,
) -> Orchestrator {
    Orchestrator::new(snapshots, Arc::new(prober), tracked(ids), settings)
}

fn completed(invocation: Invocation) -> CycleReport {
    match invocation {
        Invocation::Completed(report) => report,
        Invocation::Skipped { local_time } => panic!("cycle unexpectedly skipped at {local_time}"),
    }
}

fn counts(report: &CycleReport) -> (u32, u32, u32, f64) {
    let summary = report.summary.as_ref().expect("summary recorded");
    (summary.total_stores, summary.online_count, summary.offline_count, summary.uptime_percent)
}

#[tokio::test]
async fn test_first_cycle_from_empty_state() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A", "B", "C"], settings());

    let report = completed(orch.invoke(local(9), Trigger::Scheduled, &window()).await.unwrap());

    assert_eq!(
        report.trail,
        vec![
            CyclePhase::Idle,
            CyclePhase::Restoring,
            CyclePhase::Probing,
            CyclePhase::Aggregating,
            CyclePhase::Validating,
            CyclePhase::Publishing,
            CyclePhase::Done,
        ]
    );
    assert_eq!(counts(&report), (3, 3, 0, 100.0));
    assert_eq!(report.exit_code(), 0);
    assert!(report.published());

    let published = store.peek(NAME).unwrap();
    assert_eq!(published.revision, 1);
    assert_eq!(published.status_checks.len(), 3);
    assert_eq!(published.summary_reports.len(), 1);
    let ids: Vec<&str> = published.status_checks.iter().map(|c| c.store_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
}

#[tokio::test]
async fn test_every_probe_failing_still_publishes() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let orch = orchestrator(store.clone(), ScriptedProber::failing(&["A", "B", "C"]), &["A", "B", "C"], settings());

    let report = completed(orch.invoke(local(10), Trigger::Scheduled, &window()).await.unwrap());

    assert_eq!(counts(&report), (3, 0, 3, 0.0));
    assert_eq!(report.probe_failures, 3);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.publish_count(), 1);

    let published = store.peek(NAME).unwrap();
    assert!(published.status_checks.iter().all(|check| !check.is_online));
    assert_eq!(published.summary_reports.len(), 1);
}

#[tokio::test]
async fn test_second_cycle_accumulates_history() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let first = orchestrator(store.clone(), ScriptedProber::all_online(), &["A", "B", "C"], settings());
    let report = completed(first.invoke(local(9), Trigger::Scheduled, &window()).await.unwrap());
    assert_eq!(counts(&report), (3, 3, 0, 100.0));

    let second = orchestrator(store.clone(), ScriptedProber::failing(&["B"]), &["A", "B", "C"], settings());
    let report = completed(second.invoke(local(10), Trigger::Scheduled, &window()).await.unwrap());
    assert_eq!(counts(&report), (3, 2, 1, 66.7));

    let published = store.peek(NAME).unwrap();
    assert_eq!(published.revision, 2);
    assert_eq!(published.status_checks.len(), 6);
    assert_eq!(published.summary_reports.len(), 2);
    assert!(!report.overlap_detected);
}

#[tokio::test]
async fn test_outside_window_touches_nothing() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A"], settings());

    let invocation = orch.invoke(local(4), Trigger::Scheduled, &window()).await.unwrap();

    assert!(matches!(invocation, Invocation::Skipped { .. }));
    assert_eq!(invocation.exit_code(), 0);
    assert_eq!(store.fetch_count(), 0);
    assert_eq!(store.publish_count(), 0);
}

#[tokio::test]
async fn test_window_boundaries_fire() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A"], settings());

    for hour in [6, 21] {
        let invocation = orch.invoke(local(hour), Trigger::Scheduled, &window()).await.unwrap();
        assert!(matches!(invocation, Invocation::Completed(_)), "hour {hour} should run");
    }
    assert_eq!(store.publish_count(), 2);
}

#[tokio::test]
async fn test_manual_override_runs_outside_window() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A", "B"], settings());

    let report = completed(orch.invoke(local(23), Trigger::Manual, &window()).await.unwrap());

    assert!(matches!(report.decision, TriggerDecision::Override { .. }));
    assert_eq!(counts(&report), (2, 2, 0, 100.0));
    assert_eq!(store.publish_count(), 1);
}

#[tokio::test]
async fn test_zero_tracked_stores() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &[], settings());

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert_eq!(counts(&report), (0, 0, 0, 0.0));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.peek(NAME).unwrap().summary_reports.len(), 1);
}

#[tokio::test]
async fn test_probe_timeout_recorded_offline() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let settings = CycleSettings { probe_timeout: Duration::from_millis(50), ..settings() };
    let orch = orchestrator(store.clone(), ScriptedProber::hanging(&["B"]), &["A", "B", "C"], settings);

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(!report.timed_out);
    assert_eq!(report.probe_failures, 1);
    assert_eq!(counts(&report), (3, 2, 1, 66.7));
}

#[tokio::test]
async fn test_cycle_timeout_aggregates_partial_results() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let settings = CycleSettings {
        probe_timeout: Duration::from_secs(30),
        cycle_timeout: Duration::from_millis(200),
        ..settings()
    };
    let orch = orchestrator(store.clone(), ScriptedProber::hanging(&["C"]), &["A", "B", "C"], settings);

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(report.timed_out);
    assert_eq!(report.checks_recorded, 2);
    assert_eq!(counts(&report), (2, 2, 0, 100.0));
    assert_eq!(report.exit_code(), 0);
    assert_eq!(store.peek(NAME).unwrap().status_checks.len(), 2);
}

#[tokio::test]
async fn test_empty_result_fails_but_publishes() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let settings = CycleSettings {
        probe_timeout: Duration::from_secs(30),
        cycle_timeout: Duration::from_millis(100),
        ..settings()
    };
    let orch = orchestrator(store.clone(), ScriptedProber::hanging(&["A", "B"]), &["A", "B"], settings);

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(matches!(report.failure, Some(CycleError::EmptyResult { tracked: 2 })));
    assert_eq!(report.failed_at, Some(CyclePhase::Validating));
    assert_eq!(report.phase(), CyclePhase::Failed);
    assert!(report.trail.contains(&CyclePhase::Publishing));
    assert_eq!(report.exit_code(), 1);
    assert_eq!(store.publish_count(), 1);
    assert!(report.published());
}

#[tokio::test]
async fn test_publish_failure_is_surfaced() {
    let store = Arc::new(InMemorySnapshotStore::new());
    store.set_fail_publish(true);
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A"], settings());

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(matches!(report.publish_error, Some(CycleError::Publish(_))));
    assert!(!report.published());
    assert_eq!(report.phase(), CyclePhase::Failed);
    assert_eq!(report.exit_code(), 2);
    assert!(report.to_string().contains("NOT PUBLISHED"));
    assert!(store.peek(NAME).is_none());
}

#[tokio::test]
async fn test_unreadable_snapshot_aborts_before_probing() {
    let store = Arc::new(InMemorySnapshotStore::new());
    store.set_fail_fetch(true);
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A"], settings());

    let result = orch.invoke(local(12), Trigger::Scheduled, &window()).await;

    let err = result.unwrap_err();
    assert!(matches!(err, CycleError::Restore(_)));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(store.publish_count(), 0);
}

#[tokio::test]
async fn test_corrupt_artifact_is_left_untouched() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(format!("{NAME}.json"));
    std::fs::write(&path, b"{\"truncated\":").unwrap();
    let store = Arc::new(FileSnapshotStore::new(dir.path()));
    let orch = orchestrator(store, ScriptedProber::all_online(), &["A"], settings());

    let result = orch.invoke(local(12), Trigger::Scheduled, &window()).await;

    assert!(matches!(result, Err(CycleError::Restore(SnapshotError::Corrupt { .. }))));
    assert_eq!(std::fs::read(&path).unwrap(), b"{\"truncated\":");
}

#[tokio::test]
async fn test_unusable_database_republishes_restored_snapshot() {
    let at = local(8);
    let mut seeded = Snapshot::empty().succeeding(4);
    for _ in 0..2 {
        seeded.status_checks.push(StatusCheck { id: Some(1), ..StatusCheck::new("A", true, at) });
    }
    let store = Arc::new(InMemorySnapshotStore::with_snapshot(NAME, seeded.clone()));
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A"], settings());

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(matches!(report.failure, Some(CycleError::Persistence(_))));
    assert_eq!(report.failed_at, Some(CyclePhase::Restoring));
    assert!(report.summary.is_none());
    assert_eq!(report.exit_code(), 1);

    let published = store.peek(NAME).unwrap();
    assert_eq!(published.revision, 6);
    assert_eq!(published.status_checks, seeded.status_checks);
}

#[tokio::test]
async fn test_concurrent_publish_is_detected_and_overwritten() {
    let store = Arc::new(RacingStore { inner: InMemorySnapshotStore::new() });
    let orch = orchestrator(store.clone(), ScriptedProber::all_online(), &["A", "B"], settings());

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(report.overlap_detected);
    assert!(report.published());
    let published = store.inner.peek(NAME).unwrap();
    assert_eq!(published.revision, 1);
    assert_eq!(published.status_checks.len(), 2);
}

#[tokio::test]
async fn test_rows_follow_the_cycle_clock() {
    // The scripted prober stamps its outcomes with the real wall clock, far from the cycle's `now`
    let store = Arc::new(InMemorySnapshotStore::new());
    let settings = CycleSettings { probe_timeout: Duration::from_millis(50), ..settings() };
    let prober = ScriptedProber {
        failing: ["B".to_string()].into(),
        hanging: ["C".to_string()].into(),
        ..ScriptedProber::default()
    };
    let orch = orchestrator(store.clone(), prober, &["A", "B", "C"], settings);
    let now = local(10);

    completed(orch.invoke(now, Trigger::Scheduled, &window()).await.unwrap());

    let published = store.peek(NAME).unwrap();
    let near_now = |at: DateTime<Utc>| at >= now && at - now < chrono::Duration::minutes(1);
    assert_eq!(published.status_checks.len(), 3);
    assert!(published.status_checks.iter().all(|check| near_now(check.checked_at)));
    assert!(near_now(published.summary_reports[0].report_time));

    let database = DatabaseImpl::restore(&published).await.unwrap();
    assert_eq!(database.recent_check_count(chrono::Duration::hours(1), now).await.unwrap(), 3);
    assert_eq!(
        database.recent_check_count(chrono::Duration::hours(1), now + chrono::Duration::hours(2)).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_run_deadline_bounds_probing() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let settings = CycleSettings {
        probe_timeout: Duration::from_secs(30),
        cycle_timeout: Duration::from_secs(30),
        deadline: Duration::from_millis(150),
        ..settings()
    };
    let orch = orchestrator(store.clone(), ScriptedProber::hanging(&["C"]), &["A", "B", "C"], settings);

    let report = completed(orch.invoke(local(12), Trigger::Scheduled, &window()).await.unwrap());

    assert!(report.timed_out);
    assert_eq!(report.checks_recorded, 2);
    assert_eq!(counts(&report), (2, 2, 0, 100.0));
    assert!(report.published());
    assert_eq!(store.peek(NAME).unwrap().status_checks.len(), 2);
}

#[tokio::test]
async fn test_tracked_store_metadata_is_published() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let first = orchestrator(store.clone(), ScriptedProber::all_online(), &["A", "B"], settings());
    completed(first.invoke(local(9), Trigger::Scheduled, &window()).await.unwrap());

    // A renamed store keeps its id and row position
    let mut renamed = tracked(&["A", "B"]);
    renamed[0].name = "Cocopan Recto".to_string();
    renamed[0].platform = Platform::Grab;
    let second = Orchestrator::new(store.clone(), Arc::new(ScriptedProber::all_online()), renamed.clone(), settings());
    completed(second.invoke(local(10), Trigger::Scheduled, &window()).await.unwrap());

    let published = store.peek(NAME).unwrap();
    let expected: Vec<StoreRecord> = renamed.iter().map(StoreRecord::from).collect();
    assert_eq!(published.stores, expected);

    let database = DatabaseImpl::restore(&published).await.unwrap();
    let statuses = database.latest_status_per_store().await.unwrap();
    assert_eq!(statuses[0].label(), "Cocopan Recto");
    assert_eq!(statuses[1].label(), "Store B");
}

