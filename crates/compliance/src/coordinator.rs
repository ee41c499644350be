//! # Run Coordinator
//!
//! Orchestrates one compliance pass:
//!
//! 1. list repositories and fetch snapshots (bounded concurrency, retry on
//!    transient failures, timeout per call)
//! 2. evaluate rules and reconcile labels and tracking issues per repository
//! 3. apply mutations through the [`MutationSink`] or only report them
//! 4. aggregate a [`RunSummary`]
//!
//! Per-repository failures never abort the run. Cancelling the token returned
//! by [`RunCoordinator::cancellation_token`] stops new fetches and mutations
//! while letting in-flight ones finish.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RunConfig;
use crate::error::{ComplianceError, RepositoryError};
use crate::issues::{IssueReconciler, TrackingIssueDecision, CLOSE_COMMENT};
use crate::labels::{LabelMutation, LabelReconciler};
use crate::provider::{MutationSink, SnapshotProvider};
use crate::retry::{with_retry_async, RetryConfig};
use crate::rules::RuleEvaluator;
use crate::snapshot::RepositorySnapshot;
use crate::summary::{MutationOutcome, RepositoryReport, RunSummary};
use crate::violation::{ComplianceLabel, ViolationKind, ViolationSet};

/// Knobs for the coordinator, usually derived from [`RunConfig`].
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub organization: String,
    /// Mutations are applied only when this is set and the run is not a dry run.
    pub fix_issues: bool,
    /// Maximum concurrent fetches or mutation tasks.
    pub concurrency: usize,
    /// Timeout for each provider or sink call.
    pub call_timeout: Duration,
    pub retry: RetryConfig,
}

impl From<&RunConfig> for CoordinatorOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            organization: config.target_organization.trim().to_string(),
            fix_issues: config.fix_issues,
            concurrency: config.concurrency,
            call_timeout: config.request_timeout(),
            retry: config.retry.clone(),
        }
    }
}

/// Everything decided for one repository before any side effect.
#[derive(Debug, Clone)]
pub struct RepositoryPlan {
    pub repository: String,
    pub violations: ViolationSet,
    pub label_mutation: LabelMutation,
    pub issue_decision: TrackingIssueDecision,
    pub open_issue_id: Option<u64>,
    pub current_issue_body: Option<String>,
    pub issue_title: String,
    pub issue_body: String,
}

impl RepositoryPlan {
    /// Whether applying the plan could touch the API.
    #[must_use]
    pub fn has_work(&self) -> bool {
        !self.label_mutation.is_empty() || !self.issue_decision.is_no_action()
    }

    fn into_report(self, outcome: MutationOutcome) -> RepositoryReport {
        RepositoryReport {
            repository: self.repository,
            violations: self.violations,
            label_mutation: self.label_mutation,
            issue_decision: self.issue_decision,
            outcome,
        }
    }
}

/// Drives evaluation, reconciliation and mutation for a batch of repositories.
pub struct RunCoordinator {
    sink: Arc<dyn MutationSink>,
    evaluator: RuleEvaluator,
    labels: LabelReconciler,
    issues: IssueReconciler,
    options: CoordinatorOptions,
    cancel: CancellationToken,
    now: Option<DateTime<Utc>>,
}

impl RunCoordinator {
    #[must_use]
    pub fn new(
        sink: Arc<dyn MutationSink>,
        evaluator: RuleEvaluator,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            sink,
            evaluator,
            labels: LabelReconciler::new(),
            issues: IssueReconciler::new(),
            options,
            cancel: CancellationToken::new(),
            now: None,
        }
    }

    /// Coordinator for a validated configuration.
    #[must_use]
    pub fn from_config(config: &RunConfig, sink: Arc<dyn MutationSink>) -> Self {
        Self::new(
            sink,
            RuleEvaluator::new(config.naming.clone()),
            CoordinatorOptions::from(config),
        )
    }

    /// Evaluate activity rules against a fixed instant instead of the clock.
    #[must_use]
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = Some(now);
        self
    }

    /// Token that cancels the run when triggered.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Decide everything for one snapshot. Pure.
    #[must_use]
    pub fn plan(&self, snapshot: &RepositorySnapshot, now: DateTime<Utc>) -> RepositoryPlan {
        let violations = self.evaluator.evaluate(snapshot, now);
        let label_mutation =
            self.labels
                .reconcile(&snapshot.name, &snapshot.current_labels, &violations);
        let issue_decision = self
            .issues
            .reconcile(snapshot.open_tracking_issue_id(), &violations);

        RepositoryPlan {
            issue_title: IssueReconciler::title(&snapshot.name),
            issue_body: IssueReconciler::render_body(
                &self.options.organization,
                &snapshot.name,
                &violations,
            ),
            repository: snapshot.name.clone(),
            violations,
            label_mutation,
            issue_decision,
            open_issue_id: snapshot.open_tracking_issue_id(),
            current_issue_body: snapshot
                .open_tracking_issue
                .as_ref()
                .and_then(|issue| issue.body.clone()),
        }
    }

    /// Evaluate and reconcile `snapshots`, applying mutations unless
    /// `dry_run` is set or `fix_issues` is off.
    pub async fn run(&self, snapshots: Vec<RepositorySnapshot>, dry_run: bool) -> RunSummary {
        let started_at = Utc::now();
        let now = self.now.unwrap_or(started_at);
        let apply = !dry_run && self.options.fix_issues;
        let mut summary = RunSummary::new(&self.options.organization, started_at, dry_run, apply);

        let plans: Vec<RepositoryPlan> = snapshots
            .iter()
            .map(|snapshot| {
                let plan = self.plan(snapshot, now);
                if plan.violations.is_empty() {
                    debug!(repository = %plan.repository, "Compliant");
                } else {
                    info!(
                        repository = %plan.repository,
                        violations = plan.violations.len(),
                        labels_to_add = plan.label_mutation.labels_to_add.len(),
                        labels_to_remove = plan.label_mutation.labels_to_remove.len(),
                        issue = %plan.issue_decision,
                        "Found violations"
                    );
                }
                plan
            })
            .collect();

        let outcomes = if apply {
            self.apply_all(&plans).await
        } else {
            plans
                .iter()
                .map(|plan| {
                    let outcome = if plan.has_work() {
                        MutationOutcome::Reported
                    } else {
                        MutationOutcome::Unchanged
                    };
                    (outcome, None)
                })
                .collect()
        };

        for (plan, (outcome, error)) in plans.into_iter().zip(outcomes) {
            if let Some(error) = error {
                summary.record_error(RepositoryError::from_error(&plan.repository, &error));
            }
            summary.record(plan.into_report(outcome));
        }

        summary.cancelled = self.cancel.is_cancelled();
        summary.finished_at = Utc::now();

        info!(
            org = %summary.organization,
            scanned = summary.repositories_scanned,
            non_compliant = summary.non_compliant_count(),
            errors = summary.errors.len(),
            applied = summary.count_outcome(MutationOutcome::Applied),
            dry_run,
            "Compliance run complete"
        );

        summary
    }

    /// List, fetch, and run. Fails only if the repository list cannot be read.
    pub async fn scan(
        &self,
        provider: Arc<dyn SnapshotProvider>,
        dry_run: bool,
    ) -> Result<RunSummary, ComplianceError> {
        info!(org = %self.options.organization, dry_run, "Scanning organization");

        let organization = self.options.organization.clone();
        let call_timeout = self.options.call_timeout;
        let names = with_retry_async(&self.options.retry, "list_repositories", || {
            let provider = Arc::clone(&provider);
            let organization = organization.clone();
            async move {
                with_timeout(call_timeout, provider.list_repositories(), || {
                    ComplianceError::TransientFetch {
                        repository: organization,
                        message: format!("listing repositories timed out after {call_timeout:?}"),
                    }
                })
                .await
            }
        })
        .await?;

        let fetched = self.fetch_snapshots(provider, names).await;

        let mut summary = self.run(fetched.snapshots, dry_run).await;
        let mut errors = fetched.errors;
        errors.append(&mut summary.errors);
        summary.errors = errors;
        summary.skipped_repositories = fetched.skipped;
        summary.cancelled |= self.cancel.is_cancelled();

        Ok(summary)
    }

    async fn fetch_snapshots(
        &self,
        provider: Arc<dyn SnapshotProvider>,
        names: Vec<String>,
    ) -> FetchResults {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<Result<RepositorySnapshot, ComplianceError>>> =
            vec![None; names.len()];
        let mut skipped = Vec::new();

        for (index, name) in names.iter().enumerate() {
            let Some(permit) = acquire(&semaphore, &self.cancel).await else {
                skipped.extend(names[index..].iter().cloned());
                warn!(
                    skipped = skipped.len(),
                    "Run cancelled, not fetching remaining repositories"
                );
                break;
            };

            let provider = Arc::clone(&provider);
            let retry = self.options.retry.clone();
            let call_timeout = self.options.call_timeout;
            let name = name.clone();

            tasks.spawn(async move {
                let _permit = permit;
                debug!(repository = %name, "Fetching snapshot");
                let result = with_retry_async(&retry, "fetch_snapshot", || {
                    let provider = Arc::clone(&provider);
                    let name = name.clone();
                    async move {
                        let timeout_name = name.clone();
                        with_timeout(call_timeout, provider.fetch_snapshot(&name), || {
                            ComplianceError::TransientFetch {
                                repository: timeout_name,
                                message: format!("fetch timed out after {call_timeout:?}"),
                            }
                        })
                        .await
                    }
                })
                .await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "Fetch task failed to complete"),
            }
        }

        let mut results = FetchResults {
            snapshots: Vec::new(),
            errors: Vec::new(),
            skipped,
        };
        for (name, slot) in names.iter().zip(slots) {
            match slot {
                Some(Ok(snapshot)) => results.snapshots.push(snapshot),
                Some(Err(e)) => {
                    warn!(repository = %name, error = %e, "Failed to fetch repository");
                    results.errors.push(RepositoryError::from_error(name, &e));
                }
                None if results.skipped.contains(name) => {}
                None => results.errors.push(RepositoryError::from_error(
                    name,
                    &ComplianceError::TransientFetch {
                        repository: name.clone(),
                        message: "fetch task aborted".to_string(),
                    },
                )),
            }
        }
        results
    }

    /// Apply every plan with bounded concurrency. Returns one outcome per
    /// plan, in order.
    async fn apply_all(
        &self,
        plans: &[RepositoryPlan],
    ) -> Vec<(MutationOutcome, Option<ComplianceError>)> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<(MutationOutcome, Option<ComplianceError>)>> =
            vec![None; plans.len()];

        for (index, plan) in plans.iter().enumerate() {
            if !plan.has_work() {
                outcomes[index] = Some((MutationOutcome::Unchanged, None));
                continue;
            }

            let Some(permit) = acquire(&semaphore, &self.cancel).await else {
                debug!(repository = %plan.repository, "Run cancelled, skipping mutations");
                outcomes[index] = Some((MutationOutcome::Cancelled, None));
                continue;
            };

            let sink = Arc::clone(&self.sink);
            let plan = plan.clone();
            let call_timeout = self.options.call_timeout;

            tasks.spawn(async move {
                let _permit = permit;
                let result = apply_plan(sink.as_ref(), &plan, call_timeout).await;
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(0))) => outcomes[index] = Some((MutationOutcome::Unchanged, None)),
                Ok((index, Ok(_))) => outcomes[index] = Some((MutationOutcome::Applied, None)),
                Ok((index, Err(e))) => {
                    warn!(error = %e, "Mutation failed");
                    outcomes[index] = Some((MutationOutcome::Failed, Some(e)));
                }
                Err(e) => warn!(error = %e, "Mutation task failed to complete"),
            }
        }

        outcomes
            .into_iter()
            .zip(plans)
            .map(|(outcome, plan)| {
                outcome.unwrap_or_else(|| {
                    (
                        MutationOutcome::Failed,
                        Some(ComplianceError::MutationApply {
                            repository: plan.repository.clone(),
                            message: "mutation task aborted".to_string(),
                        }),
                    )
                })
            })
            .collect()
    }
}

struct FetchResults {
    snapshots: Vec<RepositorySnapshot>,
    errors: Vec<RepositoryError>,
    skipped: Vec<String>,
}

/// Wait for a worker slot unless the run is cancelled first.
async fn acquire(
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Option<tokio::sync::OwnedSemaphorePermit> {
    if cancel.is_cancelled() {
        return None;
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
    }
}

async fn with_timeout<T, F, E>(
    duration: Duration,
    future: F,
    on_timeout: E,
) -> Result<T, ComplianceError>
where
    F: Future<Output = Result<T, ComplianceError>>,
    E: FnOnce() -> ComplianceError,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout()),
    }
}

/// Apply one repository's plan: label additions, label removals, then the
/// issue decision. Stops at the first failure. Returns the number of API
/// calls made.
async fn apply_plan(
    sink: &dyn MutationSink,
    plan: &RepositoryPlan,
    call_timeout: Duration,
) -> Result<usize, ComplianceError> {
    let repository = plan.repository.as_str();
    let timed_out = || ComplianceError::MutationApply {
        repository: repository.to_string(),
        message: format!("call timed out after {call_timeout:?}"),
    };
    let mut calls = 0;

    let to_add: Vec<ComplianceLabel> = plan
        .label_mutation
        .added_kinds()
        .into_iter()
        .map(ViolationKind::label)
        .collect();
    if !to_add.is_empty() {
        with_timeout(call_timeout, sink.add_labels(repository, &to_add), timed_out).await?;
        calls += 1;
    }

    let to_remove: Vec<String> = plan.label_mutation.labels_to_remove.iter().cloned().collect();
    if !to_remove.is_empty() {
        with_timeout(call_timeout, sink.remove_labels(repository, &to_remove), timed_out).await?;
        calls += 1;
    }

    match (&plan.issue_decision, plan.open_issue_id) {
        (TrackingIssueDecision::Open(_), _) => {
            let issue = with_timeout(
                call_timeout,
                sink.open_issue(repository, &plan.issue_title, &plan.issue_body),
                timed_out,
            )
            .await?;
            debug!(repository, issue, "Tracking issue opened");
            calls += 1;
        }
        (TrackingIssueDecision::UpdateBody(_), Some(issue_id)) => {
            if IssueReconciler::needs_update(plan.current_issue_body.as_deref(), &plan.issue_body)
            {
                with_timeout(
                    call_timeout,
                    sink.update_issue(repository, issue_id, &plan.issue_body),
                    timed_out,
                )
                .await?;
                calls += 1;
            } else {
                debug!(repository, issue = issue_id, "Tracking issue already up to date");
            }
        }
        (TrackingIssueDecision::Close, Some(issue_id)) => {
            with_timeout(
                call_timeout,
                sink.close_issue(repository, issue_id, CLOSE_COMMENT),
                timed_out,
            )
            .await?;
            calls += 1;
        }
        _ => {}
    }

    Ok(calls)
}
