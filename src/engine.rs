//! Stack engine.
//!
//! Ties a declaration set to a state store and a provider backend. Plans
//! are read-only; `apply` and `destroy` hold the state lock for the whole
//! run and append a history entry when something changed or failed.

use tracing::{debug, error, info, warn};

use crate::config::ConfigHasher;
use crate::error::{Result, StateError};
use crate::graph::{DeclarationSet, DependencyGraph};
use crate::planner::{DEFAULT_PARALLELISM, ExecutionReport, Plan, PlanBuilder, PlanExecutor};
use crate::provider::ProviderBackend;
use crate::state::{HistoryEntry, Operation, StackState, StateStore};

/// Engine running plans for one stack.
pub struct Engine<'a, S: ?Sized, P: ?Sized> {
    /// Declared nodes.
    declarations: &'a DeclarationSet,
    /// Environment recorded in new state documents.
    environment: String,
    /// State store.
    store: &'a S,
    /// Provider backend.
    provider: &'a P,
    /// Maximum concurrent actions.
    parallelism: usize,
    planner: PlanBuilder,
}

/// Result of an `apply` or `destroy` run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Operation performed.
    pub operation: Operation,
    /// Plan that was executed.
    pub plan: Plan,
    /// Per-action results.
    pub report: ExecutionReport,
}

impl RunOutcome {
    /// Returns true if every action succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.report.success()
    }

    /// Converts a halted run into its error.
    ///
    /// # Errors
    ///
    /// Returns the execution error that halted the run.
    pub fn into_result(mut self) -> Result<Self> {
        match self.report.take_error() {
            Some(err) => Err(err.into()),
            None => Ok(self),
        }
    }
}

impl<'a, S, P> Engine<'a, S, P>
where
    S: StateStore + ?Sized,
    P: ProviderBackend + ?Sized,
{
    /// Creates a new engine.
    #[must_use]
    pub fn new(declarations: &'a DeclarationSet, store: &'a S, provider: &'a P) -> Self {
        Self {
            declarations,
            environment: String::from("default"),
            store,
            provider,
            parallelism: DEFAULT_PARALLELISM,
            planner: PlanBuilder::new(),
        }
    }

    /// Sets the environment name.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    /// Sets the maximum number of concurrent actions.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Loads the recorded state, or an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn load_state(&self) -> Result<StackState> {
        match self.store.load().await? {
            Some(state) => {
                if state.stack != self.declarations.name() {
                    warn!(
                        "State at {} belongs to stack '{}', declarations name '{}'",
                        self.store.location(),
                        state.stack,
                        self.declarations.name()
                    );
                }
                debug!("Loaded state with {} records", state.records.len());
                Ok(state)
            }
            None => {
                debug!("No state at {}, starting empty", self.store.location());
                Ok(StackState::new(self.declarations.name(), &self.environment))
            }
        }
    }

    /// Builds and validates the dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error for duplicate ids, dangling references or cycles.
    pub fn graph(&self) -> Result<DependencyGraph> {
        let graph = DependencyGraph::from_declarations(self.declarations)?;
        graph.topological_order()?;
        Ok(graph)
    }

    /// Computes the plan without side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or the state cannot be read.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.graph()?;
        let state = self.load_state().await?;
        Ok(self.planner.build(&graph, &state)?)
    }

    /// Plans and executes the declarations.
    ///
    /// Action failures are returned inside the outcome; see
    /// [`RunOutcome::into_result`].
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid, the lock is held elsewhere,
    /// or the state cannot be read or saved.
    pub async fn apply(&self) -> Result<RunOutcome> {
        // graph errors are reported before the store is touched
        let graph = self.graph()?;
        self.locked(Operation::Apply, |state| Ok(self.planner.build(&graph, state)?))
            .await
    }

    /// Like [`Self::apply`], but only runs if the plan rebuilt under the
    /// lock still matches `approved`.
    ///
    /// # Errors
    ///
    /// Returns `StalePlan` if the declarations or the recorded state
    /// changed since `approved` was built, plus everything
    /// [`Self::apply`] returns.
    pub async fn apply_approved(&self, approved: &Plan) -> Result<RunOutcome> {
        let graph = self.graph()?;
        self.locked(Operation::Apply, |state| {
            let plan = self.planner.build(&graph, state)?;
            if plan.is_equivalent(approved) {
                Ok(plan)
            } else {
                Err(StateError::StalePlan {
                    message: format!("approved {}, now {}", approved.summary(), plan.summary()),
                }
                .into())
            }
        })
        .await
    }

    /// Deletes every recorded node in reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held elsewhere or the state cannot be
    /// read or saved.
    pub async fn destroy(&self) -> Result<RunOutcome> {
        self.locked(Operation::Destroy, |state| Ok(self.planner.destroy(state)?))
            .await
    }

    async fn locked<F>(&self, operation: Operation, build: F) -> Result<RunOutcome>
    where
        F: FnOnce(&StackState) -> Result<Plan>,
    {
        let lock = self.store.acquire_lock("").await?;
        debug!("Acquired lock {} as {}", lock.lock_id, lock.holder);

        let result = self.run(operation, &lock.lock_id, build).await;

        if let Err(err) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release lock {}: {err}", lock.lock_id);
        }
        result
    }

    async fn run<F>(&self, operation: Operation, lock_id: &str, build: F) -> Result<RunOutcome>
    where
        F: FnOnce(&StackState) -> Result<Plan>,
    {
        let mut state = self.load_state().await?;
        let plan = build(&state)?;
        let summary = plan.summary();
        info!("Running {operation} for stack '{}': {summary}", self.declarations.name());

        let report = PlanExecutor::new(self.provider, self.store)
            .with_parallelism(self.parallelism)
            .with_lock(lock_id)
            .execute(&plan, &mut state)
            .await;

        let changed = report.changed_nodes();
        match &report.error {
            None => {
                if operation == Operation::Apply {
                    state.declaration_hash.clone_from(&plan.declaration_hash);
                }
                if plan.has_changes() {
                    state.add_history(HistoryEntry::new(operation, &plan.declaration_hash, changed));
                }
            }
            Some(err) => {
                state.add_history(HistoryEntry::failed(
                    operation,
                    &plan.declaration_hash,
                    changed,
                    &err.to_string(),
                ));
            }
        }

        let saved = match self.store.renew_lock(lock_id).await {
            Ok(_) => self.store.save(&state).await,
            Err(err) => Err(err),
        };
        if let Err(err) = saved {
            // a halted run already carries the error to report
            if report.error.is_none() {
                return Err(err);
            }
            error!("Failed to save final state: {err}");
        }

        Ok(RunOutcome {
            operation,
            plan,
            report,
        })
    }

    /// Hash of the current declarations.
    #[must_use]
    pub fn declaration_hash(&self) -> String {
        ConfigHasher::new().hash_declarations(self.declarations)
    }
}
