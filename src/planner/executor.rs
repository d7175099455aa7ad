//! Plan executor.
//!
//! Runs the actions of a plan against a provider backend, up to
//! `parallelism` at a time. An action starts only once every action it
//! depends on has succeeded; its references are resolved from the outputs
//! those actions published. The state is saved after every completed
//! action, so an interrupted run can resume by planning again.
//!
//! On the first failure, whether from the provider or from saving state, no
//! new action is started. Actions already running are allowed to finish and
//! are recorded. While a lock id is set, the lock is renewed on a heartbeat
//! and before every save.

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::error::{ExecutionError, ProviderError, Result};
use crate::graph::AttributeReference;
use crate::provider::{ApplyRequest, DeleteRequest, Outputs, ProviderBackend, ProviderResult};
use crate::state::{StackState, StateRecord, StateStore, LOCK_RENEW_SECS};

use super::plan::{Action, Plan, Verb};

/// Default number of actions run at the same time.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Executor for plans.
pub struct PlanExecutor<'a, P: ?Sized, S: ?Sized> {
    provider: &'a P,
    store: &'a S,
    parallelism: usize,
    lock_id: Option<&'a str>,
}

/// Lifecycle of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStatus {
    /// Not started.
    Pending,
    /// Resolving references.
    Resolving,
    /// Waiting on the provider.
    Applying,
    /// Completed and recorded.
    Succeeded,
    /// Failed; see the report error.
    Failed,
}

/// Result of a single action.
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Action index in the plan.
    pub index: usize,
    /// Target node id.
    pub node_id: String,
    /// Action verb.
    pub verb: Verb,
    /// Final status.
    pub status: ActionStatus,
    /// Outputs published by the action, if any.
    pub outputs: Option<Outputs>,
    /// Error message, if failed.
    pub error: Option<String>,
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct ExecutionReport {
    /// Per-action results, in plan order.
    pub results: Vec<ActionResult>,
    /// The error that halted execution, if any.
    pub error: Option<ExecutionError>,
}

/// What running an action amounts to once its inputs are resolved.
enum Step {
    Apply(ApplyRequest),
    Delete(DeleteRequest),
    Forget,
    Publish,
}

enum Outcome {
    Applied(Outputs),
    Deleted,
    Forgotten,
    Unchanged,
}

impl<'a, P, S> PlanExecutor<'a, P, S>
where
    P: ProviderBackend + ?Sized,
    S: StateStore + ?Sized,
{
    /// Creates a new executor.
    #[must_use]
    pub const fn new(provider: &'a P, store: &'a S) -> Self {
        Self {
            provider,
            store,
            parallelism: DEFAULT_PARALLELISM,
            lock_id: None,
        }
    }

    /// Sets the number of actions run at the same time.
    ///
    /// `1` runs the plan strictly in order. `0` is treated as `1`.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = if parallelism == 0 { 1 } else { parallelism };
        self
    }

    /// Renews `lock_id` while executing and before every save.
    ///
    /// A save is refused once the lock has been taken over.
    #[must_use]
    pub const fn with_lock(mut self, lock_id: &'a str) -> Self {
        self.lock_id = Some(lock_id);
        self
    }

    /// Executes a plan, updating and saving `state` as actions complete.
    ///
    /// Failures never abort the run midway: an action failure or a state
    /// save failure stops new actions from starting, lets in-flight ones
    /// finish and keeps recording them, and is reported in
    /// [`ExecutionReport::error`] together with the partial results.
    pub async fn execute(&self, plan: &Plan, state: &mut StackState) -> ExecutionReport {
        let total = plan.actions.len();
        info!(
            "Executing plan with {total} actions (parallelism {})",
            self.parallelism
        );

        let mut status = vec![ActionStatus::Pending; total];
        let mut outputs: Vec<Option<Outputs>> = vec![None; total];
        let mut errors: Vec<Option<String>> = vec![None; total];
        let mut published: HashMap<String, Outputs> = HashMap::new();
        let mut halted: Option<ExecutionError> = None;
        let mut unsaved = false;
        let mut in_flight = FuturesUnordered::new();
        let renew_every = Duration::from_secs(LOCK_RENEW_SECS);
        let mut heartbeat = interval_at(Instant::now() + renew_every, renew_every);

        loop {
            if halted.is_none() {
                for idx in 0..total {
                    if in_flight.len() >= self.parallelism {
                        break;
                    }
                    let action = &plan.actions[idx];
                    let ready = status[idx] == ActionStatus::Pending
                        && action
                            .dependencies
                            .iter()
                            .all(|&dep| status[dep] == ActionStatus::Succeeded);
                    if !ready {
                        continue;
                    }

                    status[idx] = ActionStatus::Resolving;
                    match Self::prepare(action, &published) {
                        Ok(step) => {
                            debug!("Starting action {idx}: {}", action.description());
                            status[idx] = ActionStatus::Applying;
                            in_flight.push(self.run(idx, action, step));
                        }
                        Err(err) => {
                            error!("{err}");
                            status[idx] = ActionStatus::Failed;
                            errors[idx] = Some(err.to_string());
                            halted = Some(err);
                            break;
                        }
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }
            let next = tokio::select! {
                next = in_flight.next() => next,
                _ = heartbeat.tick(), if self.lock_id.is_some() => {
                    if let Err(err) = self.renew_lock().await {
                        error!("Lost state lock during execution: {err}");
                        if halted.is_none() {
                            halted = Some(ExecutionError::LockLost {
                                message: err.to_string(),
                            });
                        }
                    }
                    continue;
                }
            };
            let Some((idx, result)) = next else {
                break;
            };
            let action = &plan.actions[idx];

            match result {
                Ok(outcome) => {
                    let (published_outputs, dirty) =
                        Self::record(action, outcome, state, &mut published);
                    outputs[idx] = published_outputs;
                    status[idx] = ActionStatus::Succeeded;

                    // a later successful save also covers earlier failed ones
                    if dirty || unsaved {
                        match self.persist(state).await {
                            Ok(()) => unsaved = false,
                            Err(err) => {
                                error!("Failed to save state after '{}': {err}", action.node_id);
                                unsaved = true;
                                if halted.is_none() {
                                    warn!("Halting plan; in-flight actions will finish");
                                    halted = Some(ExecutionError::StateNotSaved {
                                        node_id: action.node_id.clone(),
                                        message: err.to_string(),
                                    });
                                }
                            }
                        }
                    }
                }
                Err(source) => {
                    error!("Failed to {} '{}': {source}", action.verb, action.node_id);
                    if let Some(diagnostic) = &source.diagnostic {
                        debug!("Provider diagnostic for '{}': {diagnostic}", action.node_id);
                    }
                    status[idx] = ActionStatus::Failed;
                    errors[idx] = Some(source.to_string());
                    if halted.is_none() {
                        warn!("Halting plan; in-flight actions will finish");
                        halted = Some(ExecutionError::ActionFailed {
                            node_id: action.node_id.clone(),
                            verb: action.verb.to_string(),
                            source,
                        });
                    }
                }
            }
        }

        if unsaved {
            warn!("Some completed actions are recorded in memory only");
        }

        let results = plan
            .actions
            .iter()
            .enumerate()
            .map(|(index, action)| ActionResult {
                index,
                node_id: action.node_id.clone(),
                verb: action.verb,
                status: status[index],
                outputs: outputs[index].take(),
                error: errors[index].take(),
            })
            .collect();

        let report = ExecutionReport {
            results,
            error: halted,
        };
        info!("{report}");
        report
    }

    async fn renew_lock(&self) -> Result<()> {
        if let Some(lock_id) = self.lock_id {
            self.store.renew_lock(lock_id).await?;
        }
        Ok(())
    }

    /// Saves `state`, renewing the lock first so a lost lock never writes.
    async fn persist(&self, state: &StackState) -> Result<()> {
        self.renew_lock().await?;
        self.store.save(state).await
    }

    /// Resolves an action's references against the published outputs.
    fn prepare(action: &Action, published: &HashMap<String, Outputs>) -> std::result::Result<Step, ExecutionError> {
        match action.verb {
            Verb::NoOp => Ok(Step::Publish),
            Verb::Delete if action.is_forget() => Ok(Step::Forget),
            Verb::Delete => Ok(Step::Delete(DeleteRequest {
                node_id: action.node_id.clone(),
                kind: action.kind.clone(),
                last_outputs: action.prior_outputs.clone(),
            })),
            Verb::Create | Verb::Update => {
                let lookup = |r: &AttributeReference| {
                    published
                        .get(&r.node_id)
                        .and_then(|outputs| outputs.get(&r.output))
                };
                let inputs = action
                    .inputs
                    .iter()
                    .map(|(name, value)| value.resolve(&lookup).map(|v| (name.clone(), v)))
                    .collect::<std::result::Result<BTreeMap<_, _>, _>>()
                    .map_err(|missing| ExecutionError::UnresolvedReference {
                        consumer: action.node_id.clone(),
                        producer: missing.node_id,
                        output: missing.output,
                    })?;

                Ok(Step::Apply(ApplyRequest {
                    node_id: action.node_id.clone(),
                    kind: action.kind.clone(),
                    inputs,
                    declared_outputs: action.declared_outputs.clone(),
                    prior_outputs: action.prior_outputs.clone(),
                }))
            }
        }
    }

    async fn run(&self, index: usize, action: &Action, step: Step) -> (usize, ProviderResult<Outcome>) {
        let result = match step {
            Step::Apply(request) => self
                .provider
                .apply(&request)
                .await
                .and_then(|outputs| check_declared_outputs(&request, outputs))
                .map(Outcome::Applied),
            Step::Delete(request) => self.provider.delete(&request).await.map(|()| Outcome::Deleted),
            Step::Forget => {
                debug!("Retaining '{}', dropping its record only", action.node_id);
                Ok(Outcome::Forgotten)
            }
            Step::Publish => Ok(Outcome::Unchanged),
        };
        (index, result)
    }

    /// Applies a successful outcome to `state`.
    ///
    /// Returns the outputs to publish and whether the state needs saving.
    fn record(
        action: &Action,
        outcome: Outcome,
        state: &mut StackState,
        published: &mut HashMap<String, Outputs>,
    ) -> (Option<Outputs>, bool) {
        match outcome {
            Outcome::Applied(outputs) => {
                state.upsert_record(StateRecord {
                    node_id: action.node_id.clone(),
                    kind: action.kind.clone(),
                    last_applied_inputs: action.inputs.clone(),
                    last_known_outputs: outputs.clone(),
                    removal_policy: action.removal_policy,
                    position: action.position,
                    inputs_hash: action.fingerprint.clone(),
                    applied_at: Utc::now(),
                });
                info!("{}d {} '{}'", action.verb, action.kind, action.node_id);
                published.insert(action.node_id.clone(), outputs.clone());
                (Some(outputs), true)
            }
            Outcome::Deleted | Outcome::Forgotten => {
                state.remove_record(&action.node_id);
                if action.is_forget() {
                    info!("Forgot {} '{}' (retained)", action.kind, action.node_id);
                } else {
                    info!("Deleted {} '{}'", action.kind, action.node_id);
                }
                (None, true)
            }
            Outcome::Unchanged => {
                // policy and position are not inputs; refresh them in place
                let refreshed = state.records.get_mut(&action.node_id).is_some_and(|record| {
                    let stale = record.removal_policy != action.removal_policy
                        || record.position != action.position;
                    record.removal_policy = action.removal_policy;
                    record.position = action.position;
                    stale
                });
                published.insert(action.node_id.clone(), action.prior_outputs.clone());
                (Some(action.prior_outputs.clone()), refreshed)
            }
        }
    }
}

/// Rejects outputs that miss a declared name, since consumers may need it.
fn check_declared_outputs(request: &ApplyRequest, outputs: Outputs) -> ProviderResult<Outputs> {
    let missing: Vec<&str> = request
        .declared_outputs
        .iter()
        .filter(|name| !outputs.contains_key(*name))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(outputs)
    } else {
        Err(ProviderError::new(
            request.kind.as_str(),
            format!(
                "'{}' did not return declared output(s): {}",
                request.node_id,
                missing.join(", ")
            ),
        ))
    }
}

impl ExecutionReport {
    /// Returns true if every action succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none()
            && self
                .results
                .iter()
                .all(|r| r.status == ActionStatus::Succeeded)
    }

    /// Counts results with the given status.
    #[must_use]
    pub fn count(&self, status: ActionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Returns the ids of nodes whose change was applied.
    #[must_use]
    pub fn changed_nodes(&self) -> Vec<String> {
        self.results
            .iter()
            .filter(|r| r.status == ActionStatus::Succeeded && r.verb != Verb::NoOp)
            .map(|r| r.node_id.clone())
            .collect()
    }

    /// Returns the result for `node_id`.
    #[must_use]
    pub fn result_for(&self, node_id: &str) -> Option<&ActionResult> {
        self.results.iter().find(|r| r.node_id == node_id)
    }

    /// Takes the halting error, leaving the results in place.
    pub fn take_error(&mut self) -> Option<ExecutionError> {
        self.error.take()
    }
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Applying => "applying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ExecutionReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} succeeded, {} failed, {} not started",
            self.results.len(),
            self.count(ActionStatus::Succeeded),
            self.count(ActionStatus::Failed),
            self.count(ActionStatus::Pending)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DeclarationSet, DependencyGraph, InputValue, RemovalPolicy, ResourceNode};
    use crate::planner::PlanBuilder;
    use crate::provider::SimulatedProvider;
    use crate::error::StateError;
    use crate::state::{LocalStateStore, LockInfo};
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    mock! {
        Backend {}

        #[async_trait]
        impl ProviderBackend for Backend {
            async fn apply(&self, request: &ApplyRequest) -> ProviderResult<Outputs>;
            async fn delete(&self, request: &DeleteRequest) -> ProviderResult<()>;
            fn name(&self) -> &'static str;
        }
    }

    mock! {
        Store {}

        #[async_trait]
        impl StateStore for Store {
            async fn load(&self) -> Result<Option<StackState>>;
            async fn save(&self, state: &StackState) -> Result<()>;
            async fn delete(&self) -> Result<()>;
            async fn exists(&self) -> Result<bool>;
            async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;
            async fn release_lock(&self, lock_id: &str) -> Result<()>;
            async fn renew_lock(&self, lock_id: &str) -> Result<LockInfo>;
            async fn force_unlock(&self) -> Result<()>;
            async fn get_lock_info(&self) -> Result<Option<LockInfo>>;
            fn backend_type(&self) -> &'static str;
            fn location(&self) -> String;
        }
    }

    fn stack() -> DeclarationSet {
        DeclarationSet::new("test")
            .with(
                ResourceNode::new("bucket", "storage.bucket")
                    .with_input("encryption", InputValue::string("s3_managed"))
                    .with_output("arn"),
            )
            .with(
                ResourceNode::new("cdn", "cdn.distribution")
                    .with_input("origin", InputValue::reference("bucket", "arn"))
                    .with_output("domain_name"),
            )
    }

    fn plan_for(decls: &DeclarationSet, state: &StackState) -> Plan {
        let graph = DependencyGraph::from_declarations(decls).unwrap();
        PlanBuilder::new().build(&graph, state).unwrap()
    }

    fn store() -> (LocalStateStore, TempDir) {
        let temp = TempDir::new().unwrap();
        (LocalStateStore::with_base_dir(temp.path()), temp)
    }

    #[tokio::test]
    async fn test_apply_records_and_persists_every_action() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new();
        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&stack(), &state);

        let report = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await;

        assert!(report.success());
        assert_eq!(report.changed_nodes(), vec!["bucket", "cdn"]);
        assert_eq!(state.record_ids(), vec!["bucket", "cdn"]);

        let saved = store.load().await.unwrap().unwrap();
        assert_eq!(saved.records, state.records);
    }

    #[tokio::test]
    async fn test_references_resolve_to_producer_outputs() {
        let (store, _temp) = store();
        let mut provider = MockBackend::new();
        provider
            .expect_apply()
            .withf(|req| req.node_id == "bucket")
            .times(1)
            .returning(|_| Ok(Outputs::from([("arn".to_string(), json!("arn:aws:s3:::assets"))])));
        provider
            .expect_apply()
            .withf(|req| req.node_id == "cdn" && req.inputs["origin"] == json!("arn:aws:s3:::assets"))
            .times(1)
            .returning(|_| Ok(Outputs::from([("domain_name".to_string(), json!("d1.example.net"))])));

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&stack(), &state);
        let report = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await;

        assert!(report.success());
        // the record keeps the reference, not the resolved value
        assert_eq!(
            state.get_record("cdn").unwrap().last_applied_inputs["origin"],
            InputValue::reference("bucket", "arn")
        );
    }

    #[tokio::test]
    async fn test_failure_halts_consumers() {
        let (store, _temp) = store();
        let mut provider = MockBackend::new();
        provider
            .expect_apply()
            .withf(|req| req.node_id == "bucket")
            .times(1)
            .returning(|_| {
                Err(ProviderError::new("storage.bucket", "access denied").with_diagnostic("403"))
            });

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&stack(), &state);
        let mut report = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await;

        assert!(!report.success());
        assert_eq!(report.result_for("bucket").unwrap().status, ActionStatus::Failed);
        assert_eq!(report.result_for("cdn").unwrap().status, ActionStatus::Pending);
        assert!(state.is_empty());

        match report.take_error() {
            Some(ExecutionError::ActionFailed { node_id, verb, source }) => {
                assert_eq!(node_id, "bucket");
                assert_eq!(verb, "create");
                assert_eq!(source.diagnostic.as_deref(), Some("403"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_in_flight_actions_finish_after_failure() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new().with_failure("a", "boom");
        let decls = DeclarationSet::new("test")
            .with(ResourceNode::new("a", "k").with_output("id"))
            .with(ResourceNode::new("b", "k"))
            .with(ResourceNode::new("c", "k").with_input("x", InputValue::reference("a", "id")));

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&decls, &state);
        let report = PlanExecutor::new(&provider, &store)
            .with_parallelism(2)
            .execute(&plan, &mut state)
            .await;

        assert_eq!(report.result_for("a").unwrap().status, ActionStatus::Failed);
        assert_eq!(report.result_for("b").unwrap().status, ActionStatus::Succeeded);
        assert_eq!(report.result_for("c").unwrap().status, ActionStatus::Pending);
        assert_eq!(state.record_ids(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_sequential_execution_follows_plan_order() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new();
        let decls = stack().with(ResourceNode::new("param", "ssm.parameter"));

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&decls, &state);
        PlanExecutor::new(&provider, &store)
            .with_parallelism(1)
            .execute(&plan, &mut state)
            .await;

        let expected: Vec<String> = plan.actions.iter().map(|a| a.node_id.clone()).collect();
        assert_eq!(provider.called_nodes(), expected);
    }

    #[tokio::test]
    async fn test_no_ops_publish_recorded_outputs() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new();
        let mut state = StackState::new("test", "dev");
        let first = plan_for(&stack(), &state);
        PlanExecutor::new(&provider, &store)
            .execute(&first, &mut state)
            .await;

        // only the consumer changes; it must see the recorded bucket arn
        let changed = DeclarationSet::new("test")
            .with(stack().nodes()[0].clone())
            .with(stack().nodes()[1].clone().with_input("comment", InputValue::string("v2")));
        let second = plan_for(&changed, &state);
        assert_eq!(second.steps(), vec![(Verb::NoOp, "bucket"), (Verb::Update, "cdn")]);

        let report = PlanExecutor::new(&provider, &store)
            .execute(&second, &mut state)
            .await;
        assert!(report.success());
        assert_eq!(provider.called_nodes(), vec!["bucket", "cdn", "cdn"]);
    }

    #[tokio::test]
    async fn test_retained_nodes_are_forgotten_without_provider_call() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new();
        let decls = DeclarationSet::new("test").with(
            ResourceNode::new("pool", "identity.user_pool").with_removal_policy(RemovalPolicy::Retain),
        );

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&decls, &state);
        PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await;

        let teardown = Plan::destroy(&state).unwrap();
        let report = PlanExecutor::new(&provider, &store)
            .execute(&teardown, &mut state)
            .await;

        assert!(report.success());
        assert!(state.is_empty());
        assert!(provider.calls().iter().all(|call| !call.is_delete()));
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails_the_action() {
        let (store, _temp) = store();
        let mut provider = MockBackend::new();
        provider
            .expect_apply()
            .times(1)
            .returning(|_| Ok(Outputs::new()));

        let decls = DeclarationSet::new("test")
            .with(ResourceNode::new("bucket", "storage.bucket").with_output("arn"));
        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&decls, &state);
        let report = PlanExecutor::new(&provider, &store)
            .execute(&plan, &mut state)
            .await;

        assert!(matches!(report.error, Some(ExecutionError::ActionFailed { .. })));
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_failed_save_drains_in_flight_actions() {
        let provider = SimulatedProvider::new();
        let saves = Arc::new(AtomicUsize::new(0));
        let saved: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
        let mut store = MockStore::new();
        {
            let saves = Arc::clone(&saves);
            let saved = Arc::clone(&saved);
            store.expect_save().returning(move |state| {
                if saves.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(StateError::WriteFailed {
                        message: "disk full".into(),
                    }
                    .into());
                }
                let ids = state.record_ids().into_iter().map(String::from).collect();
                saved.lock().unwrap().push(ids);
                Ok(())
            });
        }

        let decls = DeclarationSet::new("test")
            .with(ResourceNode::new("a", "k"))
            .with(ResourceNode::new("b", "k"))
            .with(ResourceNode::new("c", "k"));
        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&decls, &state);
        let report = PlanExecutor::new(&provider, &store)
            .with_parallelism(2)
            .execute(&plan, &mut state)
            .await;

        assert_eq!(report.result_for("a").unwrap().status, ActionStatus::Succeeded);
        assert_eq!(report.result_for("b").unwrap().status, ActionStatus::Succeeded);
        assert_eq!(report.result_for("c").unwrap().status, ActionStatus::Pending);
        assert!(matches!(report.error, Some(ExecutionError::StateNotSaved { .. })));
        assert_eq!(provider.called_nodes().len(), 2);

        // the second save carries the record whose own save failed
        assert_eq!(state.record_ids(), vec!["a", "b"]);
        assert_eq!(saved.lock().unwrap().last().unwrap(), &vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_saves_renew_the_held_lock() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new();
        let lock = store.acquire_lock("apply").await.unwrap();

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&stack(), &state);
        let report = PlanExecutor::new(&provider, &store)
            .with_lock(&lock.lock_id)
            .execute(&plan, &mut state)
            .await;

        assert!(report.success());
        let held = store.get_lock_info().await.unwrap().unwrap();
        assert_eq!(held.lock_id, lock.lock_id);
        assert!(held.expires_at >= lock.expires_at);
    }

    #[tokio::test]
    async fn test_lost_lock_refuses_to_save() {
        let (store, _temp) = store();
        let provider = SimulatedProvider::new();
        let ours = store.acquire_lock("first-apply").await.unwrap();
        store.force_unlock().await.unwrap();
        store.acquire_lock("second-apply").await.unwrap();

        let mut state = StackState::new("test", "dev");
        let plan = plan_for(&stack(), &state);
        let report = PlanExecutor::new(&provider, &store)
            .with_lock(&ours.lock_id)
            .execute(&plan, &mut state)
            .await;

        match &report.error {
            Some(ExecutionError::StateNotSaved { node_id, message }) => {
                assert_eq!(node_id, "bucket");
                assert!(message.contains(&ours.lock_id));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(report.result_for("cdn").unwrap().status, ActionStatus::Pending);
        assert!(store.load().await.unwrap().is_none());
    }
}
