//! End-to-end scenarios: parse, prepare, preview, apply and persist.

use async_trait::async_trait;
use converge::error::RuntimeError;
use converge::planner::{Action, Message, OpResult, channel};
use converge::runtime::{ApplyRequest, ApplyResponse, DeleteRequest, DeleteStatus, Runtime, RuntimeResult};
use converge::{
    ConvergeError, Engine, EngineConfig, MemoryStateStore, RuntimeRegistry, SpecParser, StackKey, StateStore,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const SPEC: &str = r"
resources:
  - id: v1:ServiceAccount:team-a:builder
    type: Kubernetes
    attributes:
      apiVersion: v1
      kind: ServiceAccount
      metadata:
        name: builder
        namespace: team-a
  - id: v1:Namespace:team-a
    type: Kubernetes
    attributes:
      apiVersion: v1
      kind: Namespace
      metadata:
        name: team-a
";

const NAMESPACE: &str = "v1:Namespace:team-a";
const SERVICE_ACCOUNT: &str = "v1:ServiceAccount:team-a:builder";

/// Records applied IDs; IDs in `fail` are rejected.
#[derive(Default)]
struct RecordingRuntime {
    fail: Vec<String>,
    applied: Mutex<Vec<String>>,
}

#[async_trait]
impl Runtime for RecordingRuntime {
    fn type_name(&self) -> &str {
        "Kubernetes"
    }

    async fn apply(&self, request: &ApplyRequest) -> RuntimeResult<ApplyResponse> {
        if self.fail.contains(&request.planned.id) {
            return Err(RuntimeError::failed("apply", &request.planned.id, "quota exceeded"));
        }
        self.applied.lock().expect("lock").push(request.planned.id.clone());
        Ok(ApplyResponse {
            resource: request.planned.clone(),
        })
    }

    async fn delete(&self, _request: &DeleteRequest) -> RuntimeResult<DeleteStatus> {
        Ok(DeleteStatus::Deleted)
    }
}

fn key() -> StackKey {
    StackKey::new("acme", "platform", "prod")
}

fn setup(runtime: Arc<RecordingRuntime>, store: &MemoryStateStore) -> Engine {
    let registry = RuntimeRegistry::new().with(runtime);
    Engine::new(EngineConfig::default(), registry, Box::new(store.clone())).expect("engine")
}

async fn drain(mut rx: converge::planner::MessageReceiver) -> Vec<Message> {
    let mut messages = Vec::new();
    while let Some(message) = rx.recv().await {
        messages.push(message);
    }
    messages
}

#[tokio::test]
async fn namespace_before_service_account() {
    let runtime = Arc::new(RecordingRuntime::default());
    let store = MemoryStateStore::new();
    let engine = setup(Arc::clone(&runtime), &store);

    let mut spec = SpecParser::new().parse_yaml(SPEC, None).expect("parse");
    engine.prepare(&mut spec).expect("prepare");

    let order = engine.preview(&key(), &spec).await.expect("preview");
    assert_eq!(order.step_keys, vec![NAMESPACE, SERVICE_ACCOUNT]);
    assert!(order.steps().all(|s| s.action == Action::Create));

    let (tx, rx) = channel();
    let report = engine.apply(&key(), &spec, &order, tx).await.expect("apply");
    assert!(report.is_success());
    assert_eq!(*runtime.applied.lock().expect("lock"), vec![NAMESPACE, SERVICE_ACCOUNT]);

    // One non-terminal message, then one terminal message, per resource.
    let mut per_resource: HashMap<String, Vec<OpResult>> = HashMap::new();
    for message in drain(rx).await {
        per_resource.entry(message.resource_id).or_default().push(message.op_result);
    }
    assert_eq!(per_resource.len(), 2);
    for results in per_resource.values() {
        assert_eq!(results, &vec![OpResult::InProgress, OpResult::Success]);
    }

    let state = store.load(&key()).await.expect("load").expect("state");
    let ids: Vec<&str> = state.resources.iter().map(|r| r.resource.id.as_str()).collect();
    assert_eq!(ids, vec![SERVICE_ACCOUNT, NAMESPACE]);
    assert!(state.failed_ids().is_empty());
}

#[tokio::test]
async fn precedence_injects_edges_once() {
    let store = MemoryStateStore::new();
    let engine = setup(Arc::new(RecordingRuntime::default()), &store);

    let mut spec = SpecParser::new().parse_yaml(SPEC, None).expect("parse");
    engine.prepare(&mut spec).expect("prepare");
    let once = spec.clone();
    engine.prepare(&mut spec).expect("prepare");

    assert_eq!(spec, once);
    let service_account = spec.get(SERVICE_ACCOUNT).expect("service account");
    assert_eq!(service_account.depends_on, vec![NAMESPACE]);
    assert!(spec.get(NAMESPACE).expect("namespace").depends_on.is_empty());
}

#[tokio::test]
async fn failure_propagates_and_is_persisted() {
    let runtime = Arc::new(RecordingRuntime {
        fail: vec![String::from("r1")],
        ..RecordingRuntime::default()
    });
    let store = MemoryStateStore::new();
    let engine = setup(Arc::clone(&runtime), &store);

    let yaml = r"
resources:
  - id: r1
    type: Kubernetes
    attributes: {kind: ConfigMap}
  - id: r2
    type: Kubernetes
    attributes: {kind: Secret}
    dependsOn: [r1]
  - id: r3
    type: Kubernetes
    attributes: {kind: Secret}
    dependsOn: [r2]
";
    let spec = SpecParser::new().parse_yaml(yaml, None).expect("parse");
    let order = engine.preview(&key(), &spec).await.expect("preview");

    let (tx, rx) = channel();
    let err = engine.apply(&key(), &spec, &order, tx).await.expect_err("must fail");
    let ConvergeError::Apply(aggregate) = err else {
        panic!("expected an aggregate apply error");
    };

    assert_eq!(aggregate.failed_ids(), vec!["r1", "r2", "r3"]);
    assert!(aggregate.cause_of("r1").is_some_and(|c| c.contains("quota exceeded")));
    assert_eq!(aggregate.cause_of("r2"), Some("dependency failed: r1"));
    assert_eq!(aggregate.cause_of("r3"), Some("dependency failed: r2"));
    assert!(runtime.applied.lock().expect("lock").is_empty());

    let failed: Vec<Message> = drain(rx)
        .await
        .into_iter()
        .filter(|m| m.op_result == OpResult::Failed)
        .collect();
    assert_eq!(failed.len(), 3);

    let state = store.load(&key()).await.expect("load").expect("state");
    assert_eq!(state.failed_ids(), vec!["r1", "r2", "r3"]);
    assert!(!store.is_locked(&key()).await.expect("is_locked"));
}

#[tokio::test]
async fn removed_resources_are_deleted() {
    let store = MemoryStateStore::new();
    let engine = setup(Arc::new(RecordingRuntime::default()), &store);

    let mut spec = SpecParser::new().parse_yaml(SPEC, None).expect("parse");
    engine.prepare(&mut spec).expect("prepare");
    let order = engine.preview(&key(), &spec).await.expect("preview");
    let (tx, _rx) = channel();
    engine.apply(&key(), &spec, &order, tx).await.expect("apply");

    spec.resources.retain(|r| r.id == NAMESPACE);
    let order = engine.preview(&key(), &spec).await.expect("preview");
    assert_eq!(order.get(NAMESPACE).map(|s| s.action), Some(Action::UnChanged));
    assert_eq!(order.get(SERVICE_ACCOUNT).map(|s| s.action), Some(Action::Delete));

    let (tx, _rx) = channel();
    engine.apply(&key(), &spec, &order, tx).await.expect("apply");

    let state = store.load(&key()).await.expect("load").expect("state");
    assert_eq!(state.resources.len(), 1);
    assert_eq!(state.resources[0].resource.id, NAMESPACE);
    assert_eq!(state.serial, 2);
}
