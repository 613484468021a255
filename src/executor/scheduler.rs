//! Dataflow execution of change plans.
//!
//! An action becomes ready once every action it depends on has succeeded.
//! Ready actions run on a bounded set of tokio tasks; a failure skips
//! everything downstream of it while independent branches keep going.

use chrono::Utc;
use futures::FutureExt;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::report::{ActionOutcome, ActionReport, ApplyResult, FailureKind};
use super::retry::{RetryConfig, retry_call};
use crate::config::EngineSettings;
use crate::error::ProviderError;
use crate::model::{Attributes, ResourceKey};
use crate::planner::{ActionKind, ChangeAction, ChangePlan};
use crate::provider::{ResourceType, ResourceTypeRegistry};
use crate::state::{StateRecord, StateStore};

/// Executor tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Maximum number of actions in flight.
    pub concurrency: usize,
    /// Retry policy for provider calls.
    pub retry: RetryConfig,
    /// Deadline for a single provider call.
    pub action_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry: RetryConfig::default(),
            action_timeout: Duration::from_secs(600),
        }
    }
}

impl ExecutorConfig {
    /// Builds executor tuning from manifest settings.
    #[must_use]
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            retry: RetryConfig::from_settings(settings),
            action_timeout: settings.action_timeout(),
        }
    }

    /// Sets the concurrency bound.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}

/// Applies change plans.
pub struct Executor<'a> {
    registry: &'a ResourceTypeRegistry,
    store: Arc<dyn StateStore>,
    config: ExecutorConfig,
    cancel: CancellationToken,
}

/// Result of one action task.
struct Finished {
    outcome: ActionOutcome,
    attempts: u32,
    provider_id: Option<String>,
    outputs: Option<Attributes>,
}

/// Everything an action needs once it leaves the scheduler.
struct ActionTask {
    kind: ActionKind,
    key: ResourceKey,
    resource_type: Arc<dyn ResourceType>,
    store: Arc<dyn StateStore>,
    attributes: Attributes,
    prior: Option<StateRecord>,
    declaration_hash: String,
    dependencies: Vec<ResourceKey>,
    retry: RetryConfig,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<'a> Executor<'a> {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        registry: &'a ResourceTypeRegistry,
        store: Arc<dyn StateStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Uses `cancel` to stop the run early.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the token that cancels this executor's runs.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Applies `plan`.
    ///
    /// Never fails as a whole: every action gets a report, and the result
    /// says whether all of them succeeded.
    pub async fn apply(&self, plan: &ChangePlan) -> ApplyResult {
        let count = plan.actions.len();
        info!(
            "Applying {} actions with concurrency {}",
            count, self.config.concurrency
        );

        let mut remaining: Vec<usize> = plan.actions.iter().map(|a| a.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for (index, action) in plan.actions.iter().enumerate() {
            for &dependency in &action.dependencies {
                dependents[dependency].push(index);
            }
        }

        let mut outputs: HashMap<ResourceKey, Attributes> = plan
            .actions
            .iter()
            .filter_map(|a| a.prior.as_ref())
            .map(|record| (record.key.clone(), record.outputs.clone()))
            .collect();

        let mut reports: Vec<Option<ActionReport>> = vec![None; count];
        let mut ready: VecDeque<usize> = (0..count).filter(|&i| remaining[i] == 0).collect();
        let mut running = JoinSet::new();
        let concurrency = self.config.concurrency.max(1);

        loop {
            while running.len() < concurrency && !self.cancel.is_cancelled() {
                let Some(index) = ready.pop_front() else {
                    break;
                };
                let action = &plan.actions[index];

                if action.kind == ActionKind::NoOp {
                    debug!("{} is unchanged", action.key);
                    reports[index] = Some(report(index, action, Finished::unchanged(action)));
                    release(index, &dependents, &mut remaining, &mut ready);
                    continue;
                }

                match self.prepare(action, &outputs) {
                    Ok(task) => {
                        let started_at = Utc::now();
                        running.spawn(
                            AssertUnwindSafe(task.run())
                                .catch_unwind()
                                .map(move |result| (index, started_at, result)),
                        );
                    }
                    Err(finished) => {
                        error!("{} failed before start: {}", action.key, finished.outcome);
                        reports[index] = Some(report(index, action, finished));
                        skip_downstream(plan, index, &dependents, &mut reports);
                    }
                }
            }

            let Some(joined) = running.join_next().await else {
                break;
            };

            // Panics are caught inside the task, so a join error means the
            // runtime is shutting down.
            let (index, started_at, finished) = match joined {
                Ok((index, started_at, Ok(finished))) => (index, started_at, finished),
                Ok((index, started_at, Err(panic))) => {
                    let cause = panic_message(panic.as_ref());
                    error!("Action {} panicked: {}", plan.actions[index].key, cause);
                    (index, started_at, Finished::failed(FailureKind::Panic, cause, 0))
                }
                Err(join_error) => {
                    error!("Action task did not complete: {join_error}");
                    continue;
                }
            };

            let action = &plan.actions[index];
            let mut action_report = report(index, action, finished.clone_outcome());
            action_report.started_at = Some(started_at);
            action_report.finished_at = Some(Utc::now());

            if finished.outcome.is_success() {
                if let Some(new_outputs) = finished.outputs {
                    outputs.insert(action.key.clone(), new_outputs);
                }
                reports[index] = Some(action_report);
                release(index, &dependents, &mut remaining, &mut ready);
            } else {
                warn!("{} {} failed: {}", action.kind, action.key, action_report.outcome);
                reports[index] = Some(action_report);
                skip_downstream(plan, index, &dependents, &mut reports);
            }
        }

        let cancelled = self.cancel.is_cancelled() && reports.iter().any(Option::is_none);
        let reports = reports
            .into_iter()
            .enumerate()
            .map(|(index, report)| {
                report.unwrap_or_else(|| {
                    let action = &plan.actions[index];
                    let reason = if cancelled {
                        "cancelled"
                    } else {
                        "dependency did not complete"
                    };
                    ActionReport::skipped(index, action.kind, action.key.clone(), reason)
                })
            })
            .collect();

        let result = ApplyResult { reports, cancelled };
        info!("Apply finished: {}", result);
        result
    }

    /// Resolves everything an action needs before it is spawned.
    fn prepare(
        &self,
        action: &ChangeAction,
        outputs: &HashMap<ResourceKey, Attributes>,
    ) -> Result<ActionTask, Finished> {
        let resource_type = self
            .registry
            .for_key(&action.key)
            .map_err(|e| Finished::failed(FailureKind::Permanent, e.to_string(), 0))?;

        let (attributes, dependencies) = match &action.node {
            Some(node) if action.kind != ActionKind::Delete => {
                let attributes = node
                    .evaluate(|reference| {
                        outputs
                            .get(&reference.target)
                            .and_then(|o| o.get(&reference.attribute))
                            .cloned()
                    })
                    .map_err(|e| Finished::failed(FailureKind::Resolution, e.to_string(), 0))?;
                (attributes, node.dependencies().into_iter().collect())
            }
            _ => (Attributes::new(), Vec::new()),
        };

        Ok(ActionTask {
            kind: action.kind,
            key: action.key.clone(),
            resource_type: Arc::clone(resource_type),
            store: Arc::clone(&self.store),
            attributes,
            prior: action.prior.clone(),
            declaration_hash: action.declaration_hash.clone().unwrap_or_default(),
            dependencies,
            retry: self.config.retry.clone(),
            timeout: self.config.action_timeout,
            cancel: self.cancel.clone(),
        })
    }
}

impl fmt::Debug for Executor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("store", &self.store.backend_type())
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl ActionTask {
    async fn run(self) -> Finished {
        match self.kind {
            ActionKind::Create => self.create().await,
            ActionKind::Update => self.update().await,
            ActionKind::Delete => self.delete().await,
            ActionKind::NoOp => Finished {
                outcome: ActionOutcome::Unchanged,
                attempts: 0,
                provider_id: self.prior.map(|r| r.provider_id),
                outputs: None,
            },
        }
    }

    async fn create(self) -> Finished {
        if let Err(stale) = self.check_state().await {
            return stale;
        }

        info!("Creating {}", self.key);
        let resource_type = &self.resource_type;
        let attributes = &self.attributes;
        let attempted = retry_call(&self.retry, self.timeout, &self.cancel, move || {
            resource_type.create(attributes)
        })
        .await;

        let provisioned = match attempted.result {
            Ok(provisioned) => provisioned,
            Err(e) => return Finished::provider_failed(&e, attempted.attempts),
        };

        let record = StateRecord::new(
            self.key.clone(),
            provisioned.provider_id.clone(),
            self.attributes.clone(),
            provisioned.outputs,
            self.declaration_hash.clone(),
            self.dependencies.clone(),
        );
        self.persist(record, attempted.attempts).await
    }

    async fn update(self) -> Finished {
        let Some(provider_id) = self.prior.as_ref().map(|r| r.provider_id.clone()) else {
            return Finished::failed(
                FailureKind::State,
                format!("no recorded identity for {}", self.key),
                0,
            );
        };
        if let Err(stale) = self.check_state().await {
            return stale;
        }

        info!("Updating {} ({})", self.key, provider_id);
        let resource_type = &self.resource_type;
        let attributes = &self.attributes;
        let id = provider_id.as_str();
        let attempted = retry_call(&self.retry, self.timeout, &self.cancel, move || {
            resource_type.update(id, attributes)
        })
        .await;

        let outputs = match attempted.result {
            Ok(outputs) => outputs,
            Err(e) => return Finished::provider_failed(&e, attempted.attempts),
        };

        let record = StateRecord::new(
            self.key.clone(),
            provider_id,
            self.attributes.clone(),
            outputs,
            self.declaration_hash.clone(),
            self.dependencies.clone(),
        );
        self.persist(record, attempted.attempts).await
    }

    async fn delete(self) -> Finished {
        let Some(provider_id) = self.prior.as_ref().map(|r| r.provider_id.clone()) else {
            return Finished::failed(
                FailureKind::State,
                format!("no recorded identity for {}", self.key),
                0,
            );
        };
        if let Err(stale) = self.check_state().await {
            return stale;
        }

        info!("Deleting {} ({})", self.key, provider_id);
        let resource_type = &self.resource_type;
        let id = provider_id.as_str();
        let attempted = retry_call(&self.retry, self.timeout, &self.cancel, move || {
            resource_type.delete(id)
        })
        .await;

        if let Err(e) = attempted.result {
            return Finished::provider_failed(&e, attempted.attempts);
        }

        // Only drop the record if it still names the deleted resource.
        let deleted = provider_id.clone();
        let removed = self
            .store
            .update(
                &self.key,
                Box::new(move |current: Option<StateRecord>| {
                    current.filter(|r| r.provider_id != deleted)
                }),
            )
            .await;

        match removed {
            Ok(_) => Finished {
                outcome: ActionOutcome::Applied,
                attempts: attempted.attempts,
                provider_id: Some(provider_id),
                outputs: None,
            },
            Err(e) => {
                error!("Deleted {} but could not update state: {}", self.key, e);
                Finished::failed(FailureKind::State, e.to_string(), attempted.attempts)
            }
        }
    }

    /// Provider identity the plan expects state to hold for this key.
    fn expected_identity(&self) -> Option<&str> {
        match self.kind {
            ActionKind::Create => None,
            _ => self.prior.as_ref().map(|r| r.provider_id.as_str()),
        }
    }

    /// Fails if another run changed this key's record since planning.
    async fn check_state(&self) -> Result<(), Finished> {
        let current = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| Finished::failed(FailureKind::State, e.to_string(), 0))?;
        let found = current.as_ref().map(|r| r.provider_id.as_str());
        let expected = self.expected_identity();
        if found == expected {
            return Ok(());
        }

        let cause = stale_state(expected, found);
        warn!("Not applying {} {}: {}", self.kind, self.key, cause);
        Err(Finished::failed(FailureKind::State, cause, 0))
    }

    /// Writes `record` only if the stored record is still the one planned
    /// against.
    async fn persist(&self, record: StateRecord, attempts: u32) -> Finished {
        let provider_id = record.provider_id.clone();
        let outputs = record.outputs.clone();
        let expected = self.expected_identity().map(str::to_string);
        let swapped = Arc::new(AtomicBool::new(false));
        let swap = Arc::clone(&swapped);
        let written = self
            .store
            .update(
                &self.key,
                Box::new(move |current: Option<StateRecord>| {
                    if current.as_ref().map(|r| r.provider_id.as_str()) != expected.as_deref() {
                        return current;
                    }
                    swap.store(true, Ordering::SeqCst);
                    Some(record.superseding(current.as_ref()))
                }),
            )
            .await;

        match written {
            Ok(stored) if !swapped.load(Ordering::SeqCst) => {
                let found = stored.as_ref().map(|r| r.provider_id.as_str());
                let cause = format!(
                    "{}; {} exists but is not recorded",
                    stale_state(self.expected_identity(), found),
                    provider_id
                );
                error!("{} {}", self.key, cause);
                let mut finished = Finished::failed(FailureKind::State, cause, attempts);
                finished.provider_id = Some(provider_id);
                finished
            }
            Ok(_) => {
                debug!("Recorded {} as {}", self.key, provider_id);
                Finished {
                    outcome: ActionOutcome::Applied,
                    attempts,
                    provider_id: Some(provider_id),
                    outputs: Some(outputs),
                }
            }
            Err(e) => {
                error!(
                    "{} exists as {} but could not be recorded: {}",
                    self.key, provider_id, e
                );
                let mut finished = Finished::failed(FailureKind::State, e.to_string(), attempts);
                finished.provider_id = Some(provider_id);
                finished
            }
        }
    }
}

impl Finished {
    fn unchanged(action: &ChangeAction) -> Self {
        Self {
            outcome: ActionOutcome::Unchanged,
            attempts: 0,
            provider_id: action.provider_id().map(str::to_string),
            outputs: None,
        }
    }

    const fn failed(kind: FailureKind, cause: String, attempts: u32) -> Self {
        Self {
            outcome: ActionOutcome::Failed { kind, cause },
            attempts,
            provider_id: None,
            outputs: None,
        }
    }

    fn provider_failed(error: &ProviderError, attempts: u32) -> Self {
        Self::failed(FailureKind::from(error), error.to_string(), attempts)
    }

    fn clone_outcome(&self) -> Self {
        Self {
            outcome: self.outcome.clone(),
            attempts: self.attempts,
            provider_id: self.provider_id.clone(),
            outputs: None,
        }
    }
}

fn report(index: usize, action: &ChangeAction, finished: Finished) -> ActionReport {
    ActionReport {
        index,
        kind: action.kind,
        key: action.key.clone(),
        outcome: finished.outcome,
        attempts: finished.attempts,
        provider_id: finished.provider_id,
        started_at: None,
        finished_at: None,
    }
}

/// Marks `index` complete and queues dependents that became ready.
fn release(
    index: usize,
    dependents: &[Vec<usize>],
    remaining: &mut [usize],
    ready: &mut VecDeque<usize>,
) {
    for &dependent in &dependents[index] {
        remaining[dependent] -= 1;
        if remaining[dependent] == 0 {
            ready.push_back(dependent);
        }
    }
}

/// Skips every action downstream of the failed action `index`.
fn skip_downstream(
    plan: &ChangePlan,
    index: usize,
    dependents: &[Vec<usize>],
    reports: &mut [Option<ActionReport>],
) {
    let failed = &plan.actions[index].key;
    let reason = format!("dependency {failed} failed");
    let mut stack: Vec<usize> = dependents[index].clone();

    while let Some(next) = stack.pop() {
        if reports[next].is_some() {
            continue;
        }
        let action = &plan.actions[next];
        debug!("Skipping {} {}: {}", action.kind, action.key, reason);
        reports[next] = Some(ActionReport::skipped(
            next,
            action.kind,
            action.key.clone(),
            reason.clone(),
        ));
        stack.extend(dependents[next].iter().copied());
    }
}

fn stale_state(expected: Option<&str>, found: Option<&str>) -> String {
    format!(
        "state changed since plan: expected {}, found {}",
        expected.unwrap_or("no record"),
        found.unwrap_or("no record")
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("action panicked"))
}
