//! Engine driving preview, apply and destroy for one stack.
//!
//! Each operation loads the recorded state once. Apply and destroy run
//! under the stack's state lock and save the state exactly once.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigValidator, EngineConfig};
use crate::error::{AggregateApplyError, Result};
use crate::planner::{
    Action, ApplyOperation, ApplyOutcome, CancelHandle, ChangeOrder, ChangeSummary, MessageSender, OpResult,
    Planner,
};
use crate::runtime::RuntimeRegistry;
use crate::spec::{Generator, Spec, SpecHasher, run_generators, validate};
use crate::state::{HistoryEntry, Operation, StackKey, State, StateStore, generate_holder_id};

/// Orchestrates planning, execution and state persistence.
pub struct Engine {
    /// Engine configuration.
    config: EngineConfig,
    /// Runtimes by resource type.
    registry: RuntimeRegistry,
    /// Planner built from the configuration.
    planner: Planner,
    /// State backend.
    store: Box<dyn StateStore>,
    /// Stack key validator.
    validator: ConfigValidator,
    /// Spec hasher for history entries.
    hasher: SpecHasher,
}

/// Result of an apply or destroy.
#[derive(Debug, Serialize)]
pub struct ApplyReport {
    /// Stack the operation ran against.
    pub stack: StackKey,
    /// Operation that ran.
    pub operation: Operation,
    /// Planned actions per kind.
    pub summary: ChangeSummary,
    /// Terminal status of every step, in change order.
    pub steps: Vec<StepReport>,
    /// State serial after the save, `None` on a dry run.
    pub serial: Option<u64>,
    /// Whether the runtimes ran in dry-run mode.
    pub dry_run: bool,
}

/// Terminal status of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    /// Resource ID.
    pub id: String,
    /// Planned action.
    pub action: Action,
    /// Terminal status.
    pub status: OpResult,
    /// Failure cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Engine {
    /// Creates an engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: EngineConfig, registry: RuntimeRegistry, store: Box<dyn StateStore>) -> Result<Self> {
        let validator = ConfigValidator::new();
        let validation = validator.validate(&config)?;
        for warning in &validation.warnings {
            warn!("Configuration: {warning}");
        }

        let planner = Planner::new(registry.clone()).with_diff_engine(config.diff_engine());
        info!(
            "Engine ready (state backend: {}, runtimes: [{}])",
            store.backend_type(),
            registry.types().join(", ")
        );

        Ok(Self {
            config,
            registry,
            planner,
            store,
            validator,
            hasher: SpecHasher::new(),
        })
    }

    /// Creates an engine using the state backend named in the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the store cannot
    /// be opened.
    pub async fn from_config(config: EngineConfig, registry: RuntimeRegistry) -> Result<Self> {
        let store = config.state.open_store().await?;
        Self::new(config, registry, store)
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Injects implicit ordering edges and validates the resource graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid after preprocessing.
    pub fn prepare(&self, spec: &mut Spec) -> Result<()> {
        let ordering = self.config.ordering_generator();
        let generators: [&dyn Generator; 1] = [&ordering];
        run_generators(spec, &generators)?;
        validate(spec)?;
        debug!("Prepared spec with {} resource(s)", spec.len());
        Ok(())
    }

    /// Returns the recorded state of a stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack key is invalid or the state cannot be
    /// loaded.
    pub async fn state(&self, key: &StackKey) -> Result<Option<State>> {
        self.validator.validate_stack_key(key)?;
        self.store.load(key).await
    }

    /// Plans the changes that converge a stack to `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack key is invalid, the state cannot be
    /// loaded or the spec graph is invalid.
    pub async fn preview(&self, key: &StackKey, spec: &Spec) -> Result<ChangeOrder> {
        self.validator.validate_stack_key(key)?;
        let recorded = self.load_state(key).await?.resources;
        self.planner.preview(key, spec, &recorded).await
    }

    /// Executes a change order and records the outcome.
    ///
    /// The state is saved before a failed apply is reported. The state lock
    /// is taken once and not refreshed, so a run outlasting
    /// [`crate::state::LOCK_EXPIRY_SECS`] can lose it to another holder.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConvergeError::Apply`] if any step failed, or an
    /// error if the state cannot be locked, loaded or saved.
    pub async fn apply(&self, key: &StackKey, spec: &Spec, order: &ChangeOrder, tx: MessageSender) -> Result<ApplyReport> {
        self.apply_with_cancel(key, spec, order, tx, &CancelHandle::new()).await
    }

    /// Same as [`Engine::apply`], stopping new steps once `cancel` fires.
    ///
    /// The handle only affects this run.
    ///
    /// # Errors
    ///
    /// See [`Engine::apply`]. Steps that never started fail with "cancelled".
    pub async fn apply_with_cancel(
        &self,
        key: &StackKey,
        spec: &Spec,
        order: &ChangeOrder,
        tx: MessageSender,
        cancel: &CancelHandle,
    ) -> Result<ApplyReport> {
        self.validator.validate_stack_key(key)?;
        info!("Applying to {key}: {}", order.summary());

        let lock = self.store.acquire_lock(key, &generate_holder_id()).await?;
        debug!("Acquired state lock {} for {key}", lock.lock_id);

        let result = self.apply_locked(key, spec, order, tx, cancel).await;
        self.release(key, &lock.lock_id).await;
        result
    }

    /// Deletes every recorded resource of a stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ConvergeError::Apply`] if any delete failed, or an
    /// error if the state cannot be locked, loaded or saved.
    pub async fn destroy(&self, key: &StackKey, tx: MessageSender) -> Result<ApplyReport> {
        self.destroy_with_cancel(key, tx, &CancelHandle::new()).await
    }

    /// Same as [`Engine::destroy`], stopping new deletes once `cancel` fires.
    ///
    /// # Errors
    ///
    /// See [`Engine::destroy`].
    pub async fn destroy_with_cancel(&self, key: &StackKey, tx: MessageSender, cancel: &CancelHandle) -> Result<ApplyReport> {
        self.validator.validate_stack_key(key)?;
        info!("Destroying {key}");

        let lock = self.store.acquire_lock(key, &generate_holder_id()).await?;
        let result = self.destroy_locked(key, tx, cancel).await;
        self.release(key, &lock.lock_id).await;
        result
    }

    async fn apply_locked(
        &self,
        key: &StackKey,
        spec: &Spec,
        order: &ChangeOrder,
        tx: MessageSender,
        cancel: &CancelHandle,
    ) -> Result<ApplyReport> {
        let mut state = self.load_state(key).await?;
        let outcome = self
            .executor(cancel)
            .execute(key, order, spec, &state.resources, tx)
            .await;
        let spec_hash = self.hasher.hash_spec(spec);
        self.record(key, &mut state, Operation::Apply, &spec_hash, order, outcome).await
    }

    async fn destroy_locked(&self, key: &StackKey, tx: MessageSender, cancel: &CancelHandle) -> Result<ApplyReport> {
        let mut state = self.load_state(key).await?;
        let order = self.planner.plan_destroy(&state.resources);
        let outcome = self
            .executor(cancel)
            .execute(key, &order, &Spec::default(), &state.resources, tx)
            .await;
        self.record(key, &mut state, Operation::Destroy, "", &order, outcome).await
    }

    fn executor(&self, cancel: &CancelHandle) -> ApplyOperation {
        ApplyOperation::new(self.registry.clone(), self.config.execution_policy()).with_cancel_handle(cancel.clone())
    }

    async fn load_state(&self, key: &StackKey) -> Result<State> {
        Ok(self.store.load(key).await?.unwrap_or_else(|| {
            debug!("No recorded state for {key}, starting empty");
            State::new(key.clone())
        }))
    }

    async fn release(&self, key: &StackKey, lock_id: &str) {
        if let Err(e) = self.store.release_lock(key, lock_id).await {
            warn!("Failed to release state lock for {key}: {e}");
        }
    }

    /// Persists the outcome of an execution and builds its report.
    async fn record(
        &self,
        key: &StackKey,
        state: &mut State,
        operation: Operation,
        spec_hash: &str,
        order: &ChangeOrder,
        outcome: ApplyOutcome,
    ) -> Result<ApplyReport> {
        let ApplyOutcome {
            resources,
            statuses,
            result,
        } = outcome;
        let failures = result.as_ref().err();

        let steps: Vec<StepReport> = order
            .steps()
            .map(|step| StepReport {
                id: step.id.clone(),
                action: step.action,
                status: statuses.get(&step.id).copied().unwrap_or(OpResult::Pending),
                error: failures.and_then(|e| e.cause_of(&step.id)).map(String::from),
            })
            .collect();

        let serial = if self.config.dry_run {
            info!("Dry run, state of {key} left untouched");
            None
        } else {
            state.set_resources(resources);
            state.spec_hash = spec_hash.to_string();
            state.add_history(history_entry(operation, spec_hash, order, failures));
            state.touch();
            self.store.save(key, state).await?;
            debug!("Saved state of {key} at serial {}", state.serial);
            Some(state.serial)
        };

        let report = ApplyReport {
            stack: key.clone(),
            operation,
            summary: order.summary(),
            steps,
            serial,
            dry_run: self.config.dry_run,
        };

        match result {
            Ok(()) => {
                info!("{} of {key} succeeded", report.operation);
                Ok(report)
            }
            Err(e) => {
                error!("{} of {key} failed: {e}", report.operation);
                Err(e.into())
            }
        }
    }
}

fn history_entry(
    operation: Operation,
    spec_hash: &str,
    order: &ChangeOrder,
    failures: Option<&AggregateApplyError>,
) -> HistoryEntry {
    let touched: Vec<String> = order
        .steps()
        .filter(|step| step.action != Action::UnChanged)
        .map(|step| step.id.clone())
        .collect();

    match failures {
        Some(e) => HistoryEntry::failed(operation, spec_hash, touched, &e.to_string()),
        None => HistoryEntry::new(operation, spec_hash, touched),
    }
}

impl ApplyReport {
    /// Returns true if every step succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.status == OpResult::Success)
    }

    /// Returns the IDs of failed steps.
    #[must_use]
    pub fn failed_ids(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == OpResult::Failed)
            .map(|s| s.id.as_str())
            .collect()
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_success() { "succeeded" } else { "failed" };
        writeln!(f, "{} of {} {status}:", self.operation, self.stack)?;
        writeln!(f, "  {}", self.summary)?;

        for step in self.steps.iter().filter(|s| s.status != OpResult::Success) {
            write!(f, "  - {} {}: {}", step.action, step.id, step.status)?;
            if let Some(err) = &step.error {
                write!(f, " ({err})")?;
            }
            writeln!(f)?;
        }

        match self.serial {
            Some(serial) => write!(f, "  State serial: {serial}"),
            None => write!(f, "  Dry run, state not saved"),
        }
    }
}
