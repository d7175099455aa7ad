//! End-to-end tests running stacks through the engine with the simulated
//! provider and a local state store.

use skyform::config::ConfigParser;
use skyform::engine::Engine;
use skyform::error::{GraphError, SkyformError};
use skyform::graph::{DeclarationSet, InputValue, ResourceNode};
use skyform::planner::{ActionStatus, Verb};
use skyform::provider::{ProviderCall, SimulatedProvider};
use skyform::state::LocalStateStore;
use tempfile::TempDir;

fn node(id: &str, kind: &str) -> ResourceNode {
    ResourceNode::new(id, kind).with_output("arn")
}

fn refs(node: ResourceNode, input: &str, producer: &str) -> ResourceNode {
    node.with_input(input, InputValue::reference(producer, "arn"))
}

fn site() -> DeclarationSet {
    DeclarationSet::new("site")
        .with(
            node("bucket", "storage.bucket")
                .with_input("encryption", InputValue::string("s3_managed")),
        )
        .with(refs(node("cdn", "cdn.distribution"), "origin", "bucket"))
}

#[tokio::test]
async fn bucket_and_cdn_round_trip() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new();
    let decls = site();
    let engine = Engine::new(&decls, &store, &provider);

    let plan = engine.plan().await.unwrap();
    assert_eq!(plan.steps(), vec![(Verb::Create, "bucket"), (Verb::Create, "cdn")]);

    let outcome = engine.apply().await.unwrap();
    assert!(outcome.success());

    let state = engine.load_state().await.unwrap();
    assert_eq!(state.record_ids(), vec!["bucket", "cdn"]);
    let bucket_arn = &state.get_record("bucket").unwrap().last_known_outputs["arn"];
    let cdn = outcome.report.result_for("cdn").unwrap();
    assert_eq!(cdn.status, ActionStatus::Succeeded);

    // the provider saw the bucket arn, not the reference
    let cdn_call = provider
        .calls()
        .into_iter()
        .find(|call| call.node_id() == "cdn")
        .unwrap();
    match cdn_call {
        ProviderCall::Apply(request) => assert_eq!(&request.inputs["origin"], bucket_arn),
        ProviderCall::Delete(_) => panic!("cdn should not be deleted"),
    }

    let second = engine.plan().await.unwrap();
    assert_eq!(second.steps(), vec![(Verb::NoOp, "bucket"), (Verb::NoOp, "cdn")]);
}

#[tokio::test]
async fn producers_always_precede_consumers() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new();
    // declared consumers-first to make sure order comes from edges
    let decls = DeclarationSet::new("diamond")
        .with(
            refs(node("app", "compute.service"), "db", "db")
                .with_input("cache", InputValue::reference("cache", "arn")),
        )
        .with(refs(node("db", "database.instance"), "network", "network"))
        .with(refs(node("cache", "cache.cluster"), "network", "network"))
        .with(node("network", "network.vpc"))
        .with(node("dns", "dns.zone"));
    let engine = Engine::new(&decls, &store, &provider);

    let plan = engine.plan().await.unwrap();
    for consumer in decls.nodes() {
        for producer in consumer.producer_ids() {
            assert!(
                plan.position_of(producer) < plan.position_of(&consumer.id),
                "{producer} must come before {}",
                consumer.id
            );
        }
    }

    engine.apply().await.unwrap().into_result().unwrap();
    let calls = provider.called_nodes();
    let at = |id: &str| calls.iter().position(|c| c == id).unwrap();
    assert!(at("network") < at("db"));
    assert!(at("network") < at("cache"));
    assert!(at("db") < at("app"));
    assert!(at("cache") < at("app"));
}

#[tokio::test]
async fn cycles_are_reported_before_any_side_effect() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new();
    let decls = DeclarationSet::new("loop")
        .with(refs(node("a", "k"), "from", "c"))
        .with(refs(node("b", "k"), "from", "a"))
        .with(refs(node("c", "k"), "from", "b"))
        .with(node("free", "k"));

    let err = Engine::new(&decls, &store, &provider)
        .apply()
        .await
        .unwrap_err();
    match err {
        SkyformError::Graph(GraphError::CyclicDependency { cycle }) => {
            assert_eq!(cycle, vec!["a", "b", "c", "a"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(provider.calls().is_empty());
    assert!(!temp.path().join("state.json").exists());
}

#[tokio::test]
async fn failed_run_resumes_with_remaining_suffix() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new().with_failure("c", "quota exceeded");
    let decls = DeclarationSet::new("batch")
        .with(node("a", "k"))
        .with(node("b", "k"))
        .with(node("c", "k"))
        .with(node("d", "k"));
    let engine = Engine::new(&decls, &store, &provider).with_parallelism(1);

    let outcome = engine.apply().await.unwrap();
    assert!(!outcome.success());
    assert_eq!(outcome.report.result_for("d").unwrap().status, ActionStatus::Pending);
    assert_eq!(outcome.into_result().unwrap_err().exit_code(), 4);

    let resumed = engine.plan().await.unwrap();
    assert_eq!(
        resumed.steps(),
        vec![
            (Verb::NoOp, "a"),
            (Verb::NoOp, "b"),
            (Verb::Create, "c"),
            (Verb::Create, "d"),
        ]
    );

    provider.clear_failures();
    let outcome = engine.apply().await.unwrap();
    assert!(outcome.success());
    assert_eq!(outcome.report.changed_nodes(), vec!["c", "d"]);
}

#[tokio::test]
async fn removed_dependents_are_deleted_first() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new();

    let full = DeclarationSet::new("site")
        .with(node("a", "k"))
        .with(refs(node("b", "k"), "from", "a"))
        .with(node("keep", "k"));
    Engine::new(&full, &store, &provider)
        .apply()
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let trimmed = DeclarationSet::new("site").with(node("keep", "k"));
    let engine = Engine::new(&trimmed, &store, &provider);
    let plan = engine.plan().await.unwrap();
    assert_eq!(
        plan.steps(),
        vec![(Verb::NoOp, "keep"), (Verb::Delete, "b"), (Verb::Delete, "a")]
    );

    engine.apply().await.unwrap().into_result().unwrap();
    let deletes: Vec<String> = provider
        .calls()
        .iter()
        .filter(|call| call.is_delete())
        .map(|call| call.node_id().to_string())
        .collect();
    assert_eq!(deletes, vec!["b", "a"]);
    assert_eq!(engine.load_state().await.unwrap().record_ids(), vec!["keep"]);
}

#[tokio::test]
async fn template_stack_applies_and_resolves_templates() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new();

    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/templates/skyform.stack.yaml");
    let stack = ConfigParser::new().load_file(path).unwrap();
    let decls = stack.to_declarations().unwrap();
    let engine = Engine::new(&decls, &store, &provider);

    engine.apply().await.unwrap().into_result().unwrap();
    let state = engine.load_state().await.unwrap();
    assert_eq!(state.records.len(), decls.len());

    let cdn_domain = state.get_record("cdn").unwrap().last_known_outputs["domain_name"]
        .as_str()
        .unwrap()
        .to_string();
    let client = provider
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ProviderCall::Apply(request) if request.node_id == "user_pool_client" => Some(request),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        client.inputs["oauth"]["callback_urls"][1],
        format!("https://{cdn_domain}/auth/callback")
    );

    // the retained user pool is forgotten, not deleted
    engine.destroy().await.unwrap().into_result().unwrap();
    assert!(
        provider
            .calls()
            .iter()
            .filter(|call| call.is_delete())
            .all(|call| call.node_id() != "user_pool")
    );
    assert!(engine.load_state().await.unwrap().is_empty());
}

#[tokio::test]
async fn newly_declared_output_reaches_new_consumer() {
    let temp = TempDir::new().unwrap();
    let store = LocalStateStore::with_base_dir(temp.path());
    let provider = SimulatedProvider::new();

    let before = DeclarationSet::new("site").with(node("cdn", "cdn.distribution"));
    Engine::new(&before, &store, &provider)
        .apply()
        .await
        .unwrap()
        .into_result()
        .unwrap();

    let after = DeclarationSet::new("site")
        .with(node("cdn", "cdn.distribution").with_output("domain_name"))
        .with(
            node("pool", "identity.user_pool")
                .with_input("callback", InputValue::reference("cdn", "domain_name")),
        );
    let engine = Engine::new(&after, &store, &provider);
    let plan = engine.plan().await.unwrap();
    assert_eq!(plan.steps(), vec![(Verb::Update, "cdn"), (Verb::Create, "pool")]);

    engine.apply().await.unwrap().into_result().unwrap();
    let state = engine.load_state().await.unwrap();
    let domain = &state.get_record("cdn").unwrap().last_known_outputs["domain_name"];
    let pool = provider
        .calls()
        .into_iter()
        .find_map(|call| match call {
            ProviderCall::Apply(request) if request.node_id == "pool" => Some(request),
            _ => None,
        })
        .unwrap();
    assert_eq!(&pool.inputs["callback"], domain);

    let settled = engine.plan().await.unwrap();
    assert!(!settled.has_changes());
}
