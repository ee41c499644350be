//! Run coordinator behaviour against in-memory providers and sinks.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use compliance::{
    ComplianceError, ComplianceLabel, CoordinatorOptions, ErrorKind, IssueReconciler,
    MutationOutcome, MutationSink, RepositorySnapshot, RequiredFile, RetryConfig, RuleEvaluator,
    RunCoordinator, SnapshotProvider, TrackingIssueDecision, TrackingIssueRef, ViolationKind,
};

const ORG: &str = "finastra-demo";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    AddLabels(String, Vec<String>),
    RemoveLabels(String, Vec<String>),
    OpenIssue(String),
    UpdateIssue(String, u64),
    CloseIssue(String, u64),
}

impl Call {
    fn repository(&self) -> &str {
        match self {
            Self::AddLabels(r, _)
            | Self::RemoveLabels(r, _)
            | Self::OpenIssue(r)
            | Self::UpdateIssue(r, _)
            | Self::CloseIssue(r, _) => r,
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<Call>>,
    failing: HashSet<String>,
    next_issue: AtomicUsize,
}

impl RecordingSink {
    fn failing_for(repositories: &[&str]) -> Self {
        Self {
            failing: repositories.iter().map(ToString::to_string).collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) -> Result<(), ComplianceError> {
        let repository = call.repository().to_string();
        self.calls.lock().unwrap().push(call);
        if self.failing.contains(&repository) {
            return Err(ComplianceError::MutationApply {
                repository,
                message: "HTTP 500".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MutationSink for RecordingSink {
    async fn add_labels(
        &self,
        repository: &str,
        labels: &[ComplianceLabel],
    ) -> Result<(), ComplianceError> {
        let names = labels.iter().map(|l| l.name.to_string()).collect();
        self.record(Call::AddLabels(repository.to_string(), names))
    }

    async fn remove_labels(
        &self,
        repository: &str,
        labels: &[String],
    ) -> Result<(), ComplianceError> {
        self.record(Call::RemoveLabels(repository.to_string(), labels.to_vec()))
    }

    async fn open_issue(
        &self,
        repository: &str,
        _title: &str,
        _body: &str,
    ) -> Result<u64, ComplianceError> {
        self.record(Call::OpenIssue(repository.to_string()))?;
        Ok(100 + self.next_issue.fetch_add(1, Ordering::SeqCst) as u64)
    }

    async fn update_issue(
        &self,
        repository: &str,
        issue_id: u64,
        _body: &str,
    ) -> Result<(), ComplianceError> {
        self.record(Call::UpdateIssue(repository.to_string(), issue_id))
    }

    async fn close_issue(
        &self,
        repository: &str,
        issue_id: u64,
        _comment: &str,
    ) -> Result<(), ComplianceError> {
        self.record(Call::CloseIssue(repository.to_string(), issue_id))
    }
}

/// Provider serving fixed snapshots. Repositories listed in `flaky` fail
/// with a transient error on every attempt.
struct FakeProvider {
    snapshots: Vec<RepositorySnapshot>,
    flaky: HashSet<String>,
    missing: HashSet<String>,
    attempts: Mutex<HashMap<String, usize>>,
}

impl FakeProvider {
    fn new(snapshots: Vec<RepositorySnapshot>) -> Self {
        Self {
            snapshots,
            flaky: HashSet::new(),
            missing: HashSet::new(),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    fn attempts(&self, repository: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .get(repository)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SnapshotProvider for FakeProvider {
    async fn list_repositories(&self) -> Result<Vec<String>, ComplianceError> {
        Ok(self.snapshots.iter().map(|s| s.name.clone()).collect())
    }

    async fn fetch_snapshot(&self, repository: &str) -> Result<RepositorySnapshot, ComplianceError> {
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(repository.to_string())
            .or_insert(0) += 1;

        if self.flaky.contains(repository) {
            return Err(ComplianceError::TransientFetch {
                repository: repository.to_string(),
                message: "HTTP 503".to_string(),
            });
        }
        if self.missing.contains(repository) {
            return Err(ComplianceError::PermanentFetch {
                repository: repository.to_string(),
                message: "Not found".to_string(),
            });
        }
        self.snapshots
            .iter()
            .find(|s| s.name == repository)
            .cloned()
            .ok_or_else(|| ComplianceError::PermanentFetch {
                repository: repository.to_string(),
                message: "Not found".to_string(),
            })
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 17, 12, 0, 0).unwrap()
}

fn options() -> CoordinatorOptions {
    CoordinatorOptions {
        organization: ORG.to_string(),
        fix_issues: true,
        concurrency: 4,
        call_timeout: Duration::from_secs(5),
        retry: RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        },
    }
}

fn coordinator(sink: Arc<RecordingSink>) -> RunCoordinator {
    RunCoordinator::new(sink, RuleEvaluator::default(), options()).with_now(now())
}

fn compliant(name: &str) -> RepositorySnapshot {
    let mut snapshot = RepositorySnapshot::new(name);
    snapshot.description = Some("Core service".to_string());
    snapshot.is_public = true;
    snapshot.has_branch_protection = true;
    snapshot.file_presence = RequiredFile::ALL.into_iter().collect();
    snapshot.last_activity_at = Some(now() - chrono::Duration::days(10));
    snapshot
}

/// Public repo without prefix or license, inactive for 400 days.
fn payments_service() -> RepositorySnapshot {
    let mut snapshot = RepositorySnapshot::new("payments-service");
    snapshot.description = Some("Payments".to_string());
    snapshot.is_public = true;
    snapshot.has_branch_protection = true;
    snapshot.file_presence = [
        RequiredFile::Readme,
        RequiredFile::Gitignore,
        RequiredFile::Codeowners,
    ]
    .into_iter()
    .collect();
    snapshot.last_activity_at = Some(now() - chrono::Duration::days(400));
    snapshot
}

fn undocumented(name: &str) -> RepositorySnapshot {
    let mut snapshot = compliant(name);
    snapshot.description = None;
    snapshot
}

#[tokio::test]
async fn test_payments_service_end_to_end() {
    let sink = Arc::new(RecordingSink::default());
    let summary = coordinator(sink.clone())
        .run(vec![payments_service()], false)
        .await;

    let report = &summary.repositories[0];
    let expected: BTreeSet<ViolationKind> = [
        ViolationKind::NamingPrefixMissing,
        ViolationKind::MissingLicense,
        ViolationKind::ArchivalCandidate,
    ]
    .into_iter()
    .collect();
    assert_eq!(report.violations, expected);
    assert_eq!(
        report.label_mutation.labels_to_add,
        ["activity:archived", "missing:license", "naming:missing-prefix"]
            .into_iter()
            .map(String::from)
            .collect::<BTreeSet<_>>()
    );
    assert!(report.label_mutation.labels_to_remove.is_empty());
    assert_eq!(report.issue_decision, TrackingIssueDecision::Open(expected));
    assert_eq!(report.outcome, MutationOutcome::Applied);

    let calls = sink.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(&calls[0], Call::AddLabels(repo, labels) if repo == "payments-service" && labels.len() == 3));
    assert_eq!(calls[1], Call::OpenIssue("payments-service".to_string()));
}

#[tokio::test]
async fn test_dry_run_makes_no_calls_and_matches_apply_counts() {
    let snapshots = vec![
        compliant("FD-api-core"),
        payments_service(),
        undocumented("FD-web-portal"),
    ];

    let dry_sink = Arc::new(RecordingSink::default());
    let dry = coordinator(dry_sink.clone()).run(snapshots.clone(), true).await;

    let live_sink = Arc::new(RecordingSink::default());
    let live = coordinator(live_sink.clone()).run(snapshots, false).await;

    assert!(dry_sink.calls().is_empty());
    assert!(!live_sink.calls().is_empty());
    assert_eq!(dry.violation_counts, live.violation_counts);
    assert_eq!(dry.repositories_scanned, 3);
    assert!(!dry.mutations_enabled);
    assert_eq!(dry.count_outcome(MutationOutcome::Reported), 2);
    assert_eq!(dry.count_outcome(MutationOutcome::Unchanged), 1);
    assert_eq!(live.count_outcome(MutationOutcome::Applied), 2);
}

#[tokio::test]
async fn test_fix_issues_disabled_only_reports() {
    let sink = Arc::new(RecordingSink::default());
    let mut opts = options();
    opts.fix_issues = false;
    let coordinator =
        RunCoordinator::new(sink.clone(), RuleEvaluator::default(), opts).with_now(now());

    let summary = coordinator.run(vec![payments_service()], false).await;

    assert!(sink.calls().is_empty());
    assert!(!summary.mutations_enabled);
    assert_eq!(summary.repositories[0].outcome, MutationOutcome::Reported);
}

#[tokio::test]
async fn test_transient_fetch_exhaustion_is_reported_not_counted() {
    let sink = Arc::new(RecordingSink::default());
    let mut provider = FakeProvider::new(vec![undocumented("FD-flaky"), compliant("FD-api-core")]);
    provider.flaky.insert("FD-flaky".to_string());
    let provider = Arc::new(provider);

    let summary = coordinator(sink)
        .scan(provider.clone(), true)
        .await
        .unwrap();

    assert_eq!(provider.attempts("FD-flaky"), 3);
    assert_eq!(provider.attempts("FD-api-core"), 1);
    assert_eq!(summary.repositories_scanned, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].repository, "FD-flaky");
    assert_eq!(summary.errors[0].kind, ErrorKind::TransientFetch);
    assert_eq!(summary.total_violations(), 0);
}

#[tokio::test]
async fn test_permanent_fetch_failure_is_not_retried() {
    let sink = Arc::new(RecordingSink::default());
    let mut provider = FakeProvider::new(vec![compliant("FD-gone")]);
    provider.missing.insert("FD-gone".to_string());
    let provider = Arc::new(provider);

    let summary = coordinator(sink)
        .scan(provider.clone(), true)
        .await
        .unwrap();

    assert_eq!(provider.attempts("FD-gone"), 1);
    assert_eq!(summary.errors[0].kind, ErrorKind::PermanentFetch);
}

#[tokio::test]
async fn test_listing_failure_is_fatal() {
    struct BrokenProvider;

    #[async_trait]
    impl SnapshotProvider for BrokenProvider {
        async fn list_repositories(&self) -> Result<Vec<String>, ComplianceError> {
            Err(ComplianceError::PermanentFetch {
                repository: ORG.to_string(),
                message: "Bad credentials".to_string(),
            })
        }

        async fn fetch_snapshot(&self, _: &str) -> Result<RepositorySnapshot, ComplianceError> {
            unreachable!("listing failed")
        }
    }

    let sink = Arc::new(RecordingSink::default());
    let result = coordinator(sink).scan(Arc::new(BrokenProvider), true).await;
    assert!(matches!(result, Err(ComplianceError::PermanentFetch { .. })));
}

#[tokio::test]
async fn test_mutation_failure_is_isolated() {
    let sink = Arc::new(RecordingSink::failing_for(&["FD-broken"]));
    let summary = coordinator(sink.clone())
        .run(
            vec![undocumented("FD-broken"), undocumented("FD-web-portal")],
            false,
        )
        .await;

    let outcomes: HashMap<&str, MutationOutcome> = summary
        .repositories
        .iter()
        .map(|r| (r.repository.as_str(), r.outcome))
        .collect();
    assert_eq!(outcomes["FD-broken"], MutationOutcome::Failed);
    assert_eq!(outcomes["FD-web-portal"], MutationOutcome::Applied);

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].repository, "FD-broken");
    assert_eq!(summary.errors[0].kind, ErrorKind::MutationApply);

    // The first failing call stops further work for that repository.
    let broken_calls = sink
        .calls()
        .into_iter()
        .filter(|c| c.repository() == "FD-broken")
        .count();
    assert_eq!(broken_calls, 1);

    // Violations of the failed repository still count.
    assert_eq!(summary.violation_counts[&ViolationKind::NoDescription], 2);
}

#[tokio::test]
async fn test_cancelled_run_makes_no_new_mutations() {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(sink.clone());
    coordinator.cancellation_token().cancel();

    let summary = coordinator
        .run(vec![payments_service(), compliant("FD-api-core")], false)
        .await;

    assert!(sink.calls().is_empty());
    assert!(summary.cancelled);
    assert_eq!(summary.repositories_scanned, 2);
    assert_eq!(summary.count_outcome(MutationOutcome::Cancelled), 1);
    assert_eq!(summary.count_outcome(MutationOutcome::Unchanged), 1);
}

#[tokio::test]
async fn test_cancelled_scan_skips_fetches() {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = coordinator(sink);
    coordinator.cancellation_token().cancel();
    let provider = Arc::new(FakeProvider::new(vec![compliant("FD-a"), compliant("FD-b")]));

    let summary = coordinator.scan(provider.clone(), true).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.repositories_scanned, 0);
    assert_eq!(summary.skipped_repositories, vec!["FD-a", "FD-b"]);
    assert_eq!(provider.attempts("FD-a"), 0);
}

#[tokio::test]
async fn test_identical_issue_body_is_not_rewritten() {
    let mut snapshot = undocumented("FD-web-portal");
    snapshot
        .current_labels
        .insert("missing:description".to_string());
    let violations = [ViolationKind::NoDescription].into_iter().collect();
    snapshot.open_tracking_issue = Some(TrackingIssueRef {
        id: 7,
        body: Some(IssueReconciler::render_body(ORG, "FD-web-portal", &violations)),
    });

    let sink = Arc::new(RecordingSink::default());
    let summary = coordinator(sink.clone()).run(vec![snapshot], false).await;

    let report = &summary.repositories[0];
    assert!(matches!(report.issue_decision, TrackingIssueDecision::UpdateBody(_)));
    assert_eq!(report.outcome, MutationOutcome::Unchanged);
    assert!(sink.calls().is_empty());
}

#[tokio::test]
async fn test_changed_issue_body_is_updated() {
    let mut snapshot = undocumented("FD-web-portal");
    snapshot
        .current_labels
        .insert("missing:description".to_string());
    snapshot.open_tracking_issue = Some(TrackingIssueRef {
        id: 7,
        body: Some("stale body".to_string()),
    });

    let sink = Arc::new(RecordingSink::default());
    coordinator(sink.clone()).run(vec![snapshot], false).await;

    assert_eq!(
        sink.calls(),
        vec![Call::UpdateIssue("FD-web-portal".to_string(), 7)]
    );
}

#[tokio::test]
async fn test_resolved_repository_loses_labels_and_issue() {
    let mut snapshot = compliant("FD-api-core");
    snapshot.current_labels = ["missing:readme", "team:platform"]
        .into_iter()
        .map(String::from)
        .collect();
    snapshot.open_tracking_issue = Some(TrackingIssueRef { id: 42, body: None });

    let sink = Arc::new(RecordingSink::default());
    let summary = coordinator(sink.clone()).run(vec![snapshot], false).await;

    assert_eq!(summary.repositories[0].issue_decision, TrackingIssueDecision::Close);
    assert_eq!(
        sink.calls(),
        vec![
            Call::RemoveLabels("FD-api-core".to_string(), vec!["missing:readme".to_string()]),
            Call::CloseIssue("FD-api-core".to_string(), 42),
        ]
    );
}

#[tokio::test]
async fn test_second_run_after_apply_is_idempotent() {
    let snapshots = vec![payments_service(), undocumented("FD-web-portal")];

    let first_sink = Arc::new(RecordingSink::default());
    let first = coordinator(first_sink).run(snapshots.clone(), false).await;

    // Feed the applied state back in as the next run's observed state.
    let next: Vec<RepositorySnapshot> = snapshots
        .into_iter()
        .zip(&first.repositories)
        .enumerate()
        .map(|(i, (mut snapshot, report))| {
            snapshot.current_labels = report.label_mutation.apply(&snapshot.current_labels);
            snapshot.open_tracking_issue = Some(TrackingIssueRef {
                id: i as u64 + 1,
                body: Some(IssueReconciler::render_body(
                    ORG,
                    &snapshot.name,
                    &report.violations,
                )),
            });
            snapshot
        })
        .collect();

    let second_sink = Arc::new(RecordingSink::default());
    let second = coordinator(second_sink.clone()).run(next, false).await;

    assert!(second_sink.calls().is_empty());
    assert_eq!(second.count_outcome(MutationOutcome::Unchanged), 2);
    assert!(second
        .repositories
        .iter()
        .all(|r| r.label_mutation.is_empty()));
}

/// Tracks how many calls are running at once.
#[derive(Default)]
struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    fn enter(&self) -> InFlightGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard(self)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds the first call until the test releases it.
#[derive(Default)]
struct Gate {
    started: Notify,
    release: Notify,
    passed: AtomicBool,
}

/// Recording sink whose calls take time. Calls for `hanging` repositories
/// never complete.
#[derive(Default)]
struct SlowSink {
    inner: RecordingSink,
    delay: Duration,
    hanging: HashSet<String>,
    in_flight: InFlight,
    gate: Option<Gate>,
}

impl SlowSink {
    fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    async fn pace(&self, repository: &str) -> InFlightGuard<'_> {
        let guard = self.in_flight.enter();
        if self.hanging.contains(repository) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if let Some(gate) = &self.gate {
            if !gate.passed.swap(true, Ordering::SeqCst) {
                gate.started.notify_one();
                gate.release.notified().await;
            }
        }
        tokio::time::sleep(self.delay).await;
        guard
    }
}

#[async_trait]
impl MutationSink for SlowSink {
    async fn add_labels(
        &self,
        repository: &str,
        labels: &[ComplianceLabel],
    ) -> Result<(), ComplianceError> {
        let _guard = self.pace(repository).await;
        self.inner.add_labels(repository, labels).await
    }

    async fn remove_labels(
        &self,
        repository: &str,
        labels: &[String],
    ) -> Result<(), ComplianceError> {
        let _guard = self.pace(repository).await;
        self.inner.remove_labels(repository, labels).await
    }

    async fn open_issue(
        &self,
        repository: &str,
        title: &str,
        body: &str,
    ) -> Result<u64, ComplianceError> {
        let _guard = self.pace(repository).await;
        self.inner.open_issue(repository, title, body).await
    }

    async fn update_issue(
        &self,
        repository: &str,
        issue_id: u64,
        body: &str,
    ) -> Result<(), ComplianceError> {
        let _guard = self.pace(repository).await;
        self.inner.update_issue(repository, issue_id, body).await
    }

    async fn close_issue(
        &self,
        repository: &str,
        issue_id: u64,
        comment: &str,
    ) -> Result<(), ComplianceError> {
        let _guard = self.pace(repository).await;
        self.inner.close_issue(repository, issue_id, comment).await
    }
}

/// Provider whose fetches take time. Fetches for `hanging` repositories
/// never complete.
struct SlowProvider {
    inner: FakeProvider,
    delay: Duration,
    hanging: HashSet<String>,
    in_flight: InFlight,
}

impl SlowProvider {
    fn new(snapshots: Vec<RepositorySnapshot>, delay: Duration) -> Self {
        Self {
            inner: FakeProvider::new(snapshots),
            delay,
            hanging: HashSet::new(),
            in_flight: InFlight::default(),
        }
    }
}

#[async_trait]
impl SnapshotProvider for SlowProvider {
    async fn list_repositories(&self) -> Result<Vec<String>, ComplianceError> {
        self.inner.list_repositories().await
    }

    async fn fetch_snapshot(&self, repository: &str) -> Result<RepositorySnapshot, ComplianceError> {
        let _guard = self.in_flight.enter();
        if self.hanging.contains(repository) {
            *self
                .inner
                .attempts
                .lock()
                .unwrap()
                .entry(repository.to_string())
                .or_insert(0) += 1;
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_snapshot(repository).await
    }
}

fn with_options(
    sink: Arc<dyn MutationSink>,
    concurrency: usize,
    call_timeout: Duration,
) -> RunCoordinator {
    let mut opts = options();
    opts.concurrency = concurrency;
    opts.call_timeout = call_timeout;
    RunCoordinator::new(sink, RuleEvaluator::default(), opts).with_now(now())
}

fn undocumented_batch(count: usize) -> Vec<RepositorySnapshot> {
    (0..count)
        .map(|i| undocumented(&format!("FD-service-{i}")))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_mutations_respect_concurrency_limit() {
    let sink = Arc::new(SlowSink::with_delay(Duration::from_millis(20)));
    let coordinator = with_options(sink.clone(), 2, Duration::from_secs(5));

    let summary = coordinator.run(undocumented_batch(6), false).await;

    assert_eq!(summary.count_outcome(MutationOutcome::Applied), 6);
    assert!(sink.in_flight.peak() <= 2, "peak {}", sink.in_flight.peak());
    assert_eq!(sink.inner.calls().len(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_fetches_respect_concurrency_limit() {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = with_options(sink, 2, Duration::from_secs(5));
    let provider = Arc::new(SlowProvider::new(
        undocumented_batch(6),
        Duration::from_millis(20),
    ));

    let summary = coordinator.scan(provider.clone(), true).await.unwrap();

    assert_eq!(summary.repositories_scanned, 6);
    assert!(provider.in_flight.peak() <= 2, "peak {}", provider.in_flight.peak());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_fetch_times_out_per_repository() {
    let sink = Arc::new(RecordingSink::default());
    let coordinator = with_options(sink, 4, Duration::from_millis(50));
    let mut provider = SlowProvider::new(
        vec![undocumented("FD-hang"), compliant("FD-api-core"), undocumented("FD-web-portal")],
        Duration::from_millis(1),
    );
    provider.hanging.insert("FD-hang".to_string());
    let provider = Arc::new(provider);

    let summary = coordinator.scan(provider.clone(), true).await.unwrap();

    assert_eq!(summary.repositories_scanned, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].repository, "FD-hang");
    assert_eq!(summary.errors[0].kind, ErrorKind::TransientFetch);
    // Timeouts are transient, so every attempt was used.
    assert_eq!(provider.inner.attempts("FD-hang"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_mutation_times_out_per_repository() {
    let sink = Arc::new(SlowSink {
        hanging: ["FD-hang".to_string()].into_iter().collect(),
        ..SlowSink::default()
    });
    let coordinator = with_options(sink.clone(), 4, Duration::from_millis(50));

    let summary = coordinator
        .run(vec![undocumented("FD-hang"), undocumented("FD-web-portal")], false)
        .await;

    let outcomes: HashMap<&str, MutationOutcome> = summary
        .repositories
        .iter()
        .map(|r| (r.repository.as_str(), r.outcome))
        .collect();
    assert_eq!(outcomes["FD-hang"], MutationOutcome::Failed);
    assert_eq!(outcomes["FD-web-portal"], MutationOutcome::Applied);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].repository, "FD-hang");
    assert_eq!(summary.errors[0].kind, ErrorKind::MutationApply);
}

#[tokio::test]
async fn test_cancel_during_mutation_lets_in_flight_work_finish() {
    let sink = Arc::new(SlowSink {
        gate: Some(Gate::default()),
        ..SlowSink::default()
    });
    let coordinator = with_options(sink.clone(), 1, Duration::from_secs(5));
    let token = coordinator.cancellation_token();

    let run = coordinator.run(
        vec![undocumented("FD-a"), undocumented("FD-b"), undocumented("FD-c")],
        false,
    );
    let cancel_mid_flight = async {
        let gate = sink.gate.as_ref().unwrap();
        gate.started.notified().await;
        token.cancel();
        gate.release.notify_one();
    };
    let (summary, ()) = tokio::join!(run, cancel_mid_flight);

    assert!(summary.cancelled);
    let outcomes: Vec<(&str, MutationOutcome)> = summary
        .repositories
        .iter()
        .map(|r| (r.repository.as_str(), r.outcome))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            ("FD-a", MutationOutcome::Applied),
            ("FD-b", MutationOutcome::Cancelled),
            ("FD-c", MutationOutcome::Cancelled),
        ]
    );
    assert_eq!(
        sink.inner.calls(),
        vec![
            Call::AddLabels("FD-a".to_string(), vec!["missing:description".to_string()]),
            Call::OpenIssue("FD-a".to_string()),
        ]
    );
}
