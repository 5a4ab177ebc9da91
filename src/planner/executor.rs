//! Concurrent change order executor.
//!
//! A single coordinator owns the scheduling table. Steps whose dependencies
//! are all terminal are started in change order, never more than the
//! concurrency bound at a time. Each started step runs on its own task in a
//! [`JoinSet`]; dependents are only released after the worker was joined.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_CONCURRENCY;
use crate::error::{AggregateApplyError, RuntimeError, StepFailure};
use crate::runtime::{
    ApplyRequest, DeleteRequest, DeleteStatus, Runtime, RuntimeRegistry, RuntimeResult,
};
use crate::spec::{Resource, Spec};
use crate::state::{StackKey, StateResource};

use super::message::{Message, MessageSender, OpResult};
use super::plan::{Action, ChangeOrder, ChangeStep};

/// Cause prefix of steps skipped because a dependency failed.
pub const CAUSE_DEPENDENCY_FAILED: &str = "dependency failed";

/// Cause of steps not started after a fail-fast abort.
pub const CAUSE_ABORTED: &str = "aborted";

/// Cause of steps not started after the caller cancelled.
pub const CAUSE_CANCELLED: &str = "cancelled";

/// Reaction to a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop starting new steps after the first failure.
    #[default]
    FailFast,
    /// Keep running every step whose dependencies succeeded.
    ContinueOnError,
}

/// How a change order is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Reaction to a failed step.
    pub failure: FailurePolicy,
    /// Maximum number of steps in flight, at least 1.
    pub concurrency: usize,
    /// Ask runtimes to validate without changing anything.
    pub dry_run: bool,
}

/// Cooperative cancellation flag shared with a running execution.
///
/// Cancelling stops new steps from starting; in-flight steps finish.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

/// Result of executing a change order.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// Resource set to persist, in desired order then remaining prior order.
    pub resources: Vec<StateResource>,
    /// Terminal status of every step.
    pub statuses: HashMap<String, OpResult>,
    /// Every failed step, if any.
    pub result: Result<(), AggregateApplyError>,
}

/// Executes change orders against the registered runtimes.
#[derive(Debug, Clone)]
pub struct ApplyOperation {
    registry: RuntimeRegistry,
    policy: ExecutionPolicy,
    cancel: CancelHandle,
}

/// Final state entries by resource ID; `None` removes the resource.
type Accumulator = Arc<Mutex<HashMap<String, Option<StateResource>>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Terminal {
    Success,
    Failed {
        cause: String,
        /// False for aborted steps, whose dependents are aborted too.
        propagates: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    Pending,
    Running,
    Done(Terminal),
}

enum Start {
    Run(Arc<dyn Runtime>),
    Finish(Terminal),
}

/// Dependency bookkeeping for one execution.
struct Scheduler<'a> {
    steps: Vec<&'a ChangeStep>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    remaining: Vec<usize>,
    slots: Vec<Slot>,
    ready: BinaryHeap<Reverse<usize>>,
}

/// One runtime call, run on its own task.
struct StepTask {
    index: usize,
    step: ChangeStep,
    runtime: Arc<dyn Runtime>,
    stack: StackKey,
    dry_run: bool,
    results: Accumulator,
    tx: MessageSender,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::FailFast,
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
        }
    }
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FailFast => "fail_fast",
            Self::ContinueOnError => "continue_on_error",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fail_fast" => Ok(Self::FailFast),
            "continue_on_error" => Ok(Self::ContinueOnError),
            other => Err(format!("unknown failure policy '{other}'")),
        }
    }
}

impl CancelHandle {
    /// Creates a handle that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl ApplyOutcome {
    /// Returns true if every step succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns the IDs of failed steps.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<&str> {
        self.result
            .as_ref()
            .err()
            .map(AggregateApplyError::failed_ids)
            .unwrap_or_default()
    }
}

impl Terminal {
    fn failed(cause: impl Into<String>) -> Self {
        Self::Failed {
            cause: cause.into(),
            propagates: true,
        }
    }

    const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    fn message(&self, id: &str) -> Message {
        match self {
            Self::Success => Message::success(id),
            Self::Failed { cause, .. } => Message::failed(id, cause.clone()),
        }
    }
}

impl<'a> Scheduler<'a> {
    /// Builds the dependency table.
    ///
    /// Non-delete steps wait on their `dependsOn` steps. A delete of P waits
    /// on the step of every prior resource that depends on P. Edges to IDs
    /// outside the order are ignored.
    fn new(steps: Vec<&'a ChangeStep>, prior: &[StateResource]) -> Self {
        let index: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            let ids: Vec<&str> = if step.action == Action::Delete {
                prior
                    .iter()
                    .filter(|r| r.resource.depends_on_id(&step.id))
                    .map(|r| r.resource.id.as_str())
                    .collect()
            } else {
                step.depends_on().iter().map(String::as_str).collect()
            };

            let mut edges: Vec<usize> = ids
                .into_iter()
                .filter_map(|id| index.get(id).copied())
                .filter(|&d| d != i)
                .collect();
            edges.sort_unstable();
            edges.dedup();
            deps.push(edges);
        }

        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
        for (i, edges) in deps.iter().enumerate() {
            for &dep in edges {
                dependents[dep].push(i);
            }
        }

        let remaining: Vec<usize> = deps.iter().map(Vec::len).collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        Self {
            slots: vec![Slot::Pending; steps.len()],
            steps,
            deps,
            dependents,
            remaining,
            ready,
        }
    }

    fn next_ready(&mut self) -> Option<usize> {
        self.ready.pop().map(|Reverse(i)| i)
    }

    fn complete(&mut self, i: usize, terminal: Terminal) {
        self.slots[i] = Slot::Done(terminal);
        for &dependent in &self.dependents[i] {
            self.remaining[dependent] -= 1;
            if self.remaining[dependent] == 0 {
                self.ready.push(Reverse(dependent));
            }
        }
    }

    /// Returns the ID of a dependency whose failure blocks step `i`.
    fn failed_dependency(&self, i: usize) -> Option<&'a str> {
        self.deps[i]
            .iter()
            .find(|&&d| {
                matches!(
                    self.slots[d],
                    Slot::Done(Terminal::Failed {
                        propagates: true,
                        ..
                    })
                )
            })
            .map(|&d| self.steps[d].id.as_str())
    }
}

impl ApplyOperation {
    /// Creates an executor.
    #[must_use]
    pub fn new(registry: RuntimeRegistry, policy: ExecutionPolicy) -> Self {
        Self {
            registry,
            policy,
            cancel: CancelHandle::new(),
        }
    }

    /// Uses a caller-owned cancel handle.
    #[must_use]
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a handle that cancels this executor's runs.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Returns the execution policy.
    #[must_use]
    pub const fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    /// Executes a change order.
    ///
    /// Every step produces one `InProgress` message followed by one terminal
    /// message on `tx`. The sender is consumed and dropped after the last
    /// worker was joined, which closes the channel.
    pub async fn execute(
        &self,
        stack: &StackKey,
        order: &ChangeOrder,
        desired: &Spec,
        prior: &[StateResource],
        tx: MessageSender,
    ) -> ApplyOutcome {
        let mut seen = HashSet::new();
        let steps: Vec<&ChangeStep> = order
            .step_keys
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| {
                let step = order.get(id);
                if step.is_none() {
                    warn!("Change order has no step for key {id}, skipping");
                }
                step
            })
            .collect();

        let bound = self.policy.concurrency.max(1);
        info!(
            "Executing {} step(s) for {stack} (concurrency {bound}, policy {}{})",
            steps.len(),
            self.policy.failure,
            if self.policy.dry_run { ", dry run" } else { "" }
        );

        let mut sched = Scheduler::new(steps, prior);
        let results: Accumulator = Arc::default();
        let mut workers: JoinSet<(usize, Terminal)> = JoinSet::new();
        let mut halt: Option<&'static str> = None;

        loop {
            if halt.is_none() && self.cancel.is_cancelled() {
                warn!("Execution cancelled, no new steps will start");
                halt = Some(CAUSE_CANCELLED);
            }

            while halt.is_none() && workers.len() < bound {
                let Some(i) = sched.next_ready() else {
                    break;
                };
                let step = sched.steps[i];
                let _ = tx.send(Message::in_progress(&step.id));

                match self.start(&sched, i) {
                    Start::Run(runtime) => {
                        debug!("Starting {} {}", step.action, step.id);
                        sched.slots[i] = Slot::Running;
                        let task = StepTask {
                            index: i,
                            step: step.clone(),
                            runtime,
                            stack: stack.clone(),
                            dry_run: self.policy.dry_run,
                            results: Arc::clone(&results),
                            tx: tx.clone(),
                        };
                        workers.spawn(task.run());
                    }
                    Start::Finish(terminal) => {
                        let entry = finished_entry(step, &terminal, prior);
                        results.lock().await.insert(step.id.clone(), entry);
                        let _ = tx.send(terminal.message(&step.id));
                        if terminal.is_failed() {
                            halt = halt.or(self.halt_on_failure());
                        }
                        sched.complete(i, terminal);
                    }
                }
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            match joined {
                Ok((i, terminal)) => {
                    if terminal.is_failed() {
                        halt = halt.or(self.halt_on_failure());
                    }
                    sched.complete(i, terminal);
                }
                Err(e) => error!("Step worker could not be joined: {e}"),
            }
        }

        // Everything not terminal now is skipped.
        for i in 0..sched.slots.len() {
            if matches!(sched.slots[i], Slot::Done(_)) {
                continue;
            }
            let step = sched.steps[i];
            let terminal = if sched.slots[i] == Slot::Running {
                Terminal::failed("step worker was lost")
            } else if let Some(dep) = sched.failed_dependency(i) {
                Terminal::failed(format!("{CAUSE_DEPENDENCY_FAILED}: {dep}"))
            } else {
                Terminal::Failed {
                    cause: halt.unwrap_or("unresolvable dependencies").to_string(),
                    propagates: halt.is_none(),
                }
            };

            if sched.slots[i] == Slot::Pending {
                let _ = tx.send(Message::in_progress(&step.id));
            }
            let entry = finished_entry(step, &terminal, prior);
            results.lock().await.insert(step.id.clone(), entry);
            let _ = tx.send(terminal.message(&step.id));
            sched.slots[i] = Slot::Done(terminal);
        }
        drop(tx);

        let mut statuses = HashMap::new();
        let mut failures = Vec::new();
        for (step, slot) in sched.steps.iter().zip(&sched.slots) {
            if let Slot::Done(Terminal::Failed { cause, .. }) = slot {
                statuses.insert(step.id.clone(), OpResult::Failed);
                failures.push(StepFailure {
                    id: step.id.clone(),
                    cause: cause.clone(),
                });
            } else {
                statuses.insert(step.id.clone(), OpResult::Success);
            }
        }

        let entries = std::mem::take(&mut *results.lock().await);
        let step_ids: Vec<&str> = sched.steps.iter().map(|s| s.id.as_str()).collect();
        let resources = final_resources(desired, prior, &step_ids, entries);

        if failures.is_empty() {
            info!("All {} step(s) succeeded", statuses.len());
        } else {
            warn!("{} of {} step(s) failed", failures.len(), statuses.len());
        }

        ApplyOutcome {
            resources,
            statuses,
            result: if failures.is_empty() {
                Ok(())
            } else {
                Err(AggregateApplyError { failures })
            },
        }
    }

    const fn halt_on_failure(&self) -> Option<&'static str> {
        match self.policy.failure {
            FailurePolicy::FailFast => Some(CAUSE_ABORTED),
            FailurePolicy::ContinueOnError => None,
        }
    }

    /// Decides whether a ready step needs a runtime call.
    fn start(&self, sched: &Scheduler<'_>, i: usize) -> Start {
        let step = sched.steps[i];

        if let Some(dep) = sched.failed_dependency(i) {
            warn!("Skipping {} {}: dependency {dep} failed", step.action, step.id);
            return Start::Finish(Terminal::failed(format!("{CAUSE_DEPENDENCY_FAILED}: {dep}")));
        }

        let resource = match step.action {
            Action::UnChanged => return Start::Finish(Terminal::Success),
            Action::Undefined => {
                let reason = step.reason.as_deref().unwrap_or("prior state unknown");
                return Start::Finish(Terminal::failed(reason));
            }
            Action::Delete => step.from.as_ref(),
            Action::Create | Action::Update => step.to.as_ref(),
        };

        let Some(resource) = resource else {
            return Start::Finish(Terminal::failed(format!(
                "{} step has no resource",
                step.action
            )));
        };

        match self.registry.require(&resource.resource_type) {
            Ok(runtime) => Start::Run(runtime),
            Err(e) => Start::Finish(Terminal::failed(e.to_string())),
        }
    }
}

impl StepTask {
    async fn run(self) -> (usize, Terminal) {
        let Self {
            index,
            step,
            runtime,
            stack,
            dry_run,
            results,
            tx,
        } = self;

        // A panicking runtime fails its own step only.
        let call = tokio::spawn(invoke(runtime, stack, step.clone(), dry_run));
        let outcome = match call.await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("runtime call did not complete: {e}")),
        };

        let (entry, terminal) = match outcome {
            Ok(observed) => {
                debug!("{} {} succeeded", step.action, step.id);
                let entry = match step.action {
                    Action::Delete => None,
                    _ => observed.map(StateResource::converged),
                };
                (entry, Terminal::Success)
            }
            Err(cause) => {
                warn!("{} {} failed: {cause}", step.action, step.id);
                (failure_entry(&step, &cause), Terminal::failed(cause))
            }
        };

        results.lock().await.insert(step.id.clone(), entry);
        let _ = tx.send(terminal.message(&step.id));
        (index, terminal)
    }
}

async fn invoke(
    runtime: Arc<dyn Runtime>,
    stack: StackKey,
    step: ChangeStep,
    dry_run: bool,
) -> RuntimeResult<Option<Resource>> {
    if step.action == Action::Delete {
        let resource = step
            .from
            .ok_or_else(|| RuntimeError::failed("delete", &step.id, "no recorded resource"))?;
        let status = runtime
            .delete(&DeleteRequest {
                stack,
                resource,
                dry_run,
            })
            .await?;
        if status == DeleteStatus::NotFound {
            debug!("{} was already gone", step.id);
        }
        return Ok(None);
    }

    let planned = step
        .to
        .ok_or_else(|| RuntimeError::failed("apply", &step.id, "no desired resource"))?;
    let response = runtime
        .apply(&ApplyRequest {
            stack,
            prior: step.from,
            planned,
            dry_run,
        })
        .await?;
    Ok(Some(response.resource))
}

/// Entry recorded for a failed or skipped create, update or delete.
fn failure_entry(step: &ChangeStep, cause: &str) -> Option<StateResource> {
    let base = match step.action {
        Action::Create | Action::UnChanged => step.to.as_ref().or(step.from.as_ref()),
        Action::Update | Action::Delete | Action::Undefined => {
            step.from.as_ref().or(step.to.as_ref())
        }
    };
    base.map(|r| StateResource::failed(r.clone(), cause))
}

/// Entry recorded for a step finished without a runtime call.
fn finished_entry(step: &ChangeStep, terminal: &Terminal, prior: &[StateResource]) -> Option<StateResource> {
    if step.action == Action::Undefined {
        return prior.iter().find(|r| r.resource.id == step.id).cloned();
    }
    match terminal {
        Terminal::Success => step.to.clone().map(StateResource::converged),
        Terminal::Failed { cause, .. } => failure_entry(step, cause),
    }
}

/// Assembles the resource set to persist.
fn final_resources(
    desired: &Spec,
    prior: &[StateResource],
    step_ids: &[&str],
    mut entries: HashMap<String, Option<StateResource>>,
) -> Vec<StateResource> {
    let mut resources = Vec::new();
    let mut seen = HashSet::new();

    for resource in &desired.resources {
        if !seen.insert(resource.id.as_str()) {
            continue;
        }
        match entries.remove(&resource.id) {
            Some(entry) => resources.extend(entry),
            None => resources.extend(prior.iter().find(|r| r.resource.id == resource.id).cloned()),
        }
    }

    for record in prior {
        if !seen.insert(record.resource.id.as_str()) {
            continue;
        }
        match entries.remove(&record.resource.id) {
            Some(entry) => resources.extend(entry),
            None => resources.push(record.clone()),
        }
    }

    for id in step_ids {
        if let Some(entry) = entries.remove(*id) {
            resources.extend(entry);
        }
    }

    resources
}
