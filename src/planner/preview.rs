//! Change planning.
//!
//! The planner compares the desired spec with the prior resources and
//! produces a [`ChangeOrder`]. Prior values come from the runtime's live
//! read when the runtime supports it, otherwise from recorded state.

use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError};
use crate::runtime::{ReadRequest, RuntimeRegistry};
use crate::spec::{Resource, Spec, topological_order, validate};
use crate::state::{StackKey, StateResource};

use super::diff::DiffEngine;
use super::plan::{Action, ChangeOrder, ChangeStep};

/// Builds change orders.
#[derive(Debug, Clone, Default)]
pub struct Planner {
    registry: RuntimeRegistry,
    diff: DiffEngine,
}

/// Where the prior value of a resource came from.
enum Prior<'a> {
    /// The runtime reported the live resource, or that it does not exist.
    Live(Option<Resource>),
    /// The runtime cannot read; the recorded resource is used.
    Recorded(Option<&'a StateResource>),
}

impl Planner {
    /// Creates a planner that reads through the given runtimes.
    #[must_use]
    pub fn new(registry: RuntimeRegistry) -> Self {
        Self {
            registry,
            diff: DiffEngine::new(),
        }
    }

    /// Uses a diff engine with ignored fields.
    #[must_use]
    pub fn with_diff_engine(mut self, diff: DiffEngine) -> Self {
        self.diff = diff;
        self
    }

    /// Returns the diff engine.
    #[must_use]
    pub const fn diff_engine(&self) -> &DiffEngine {
        &self.diff
    }

    /// Plans the changes that converge `recorded` to `spec`.
    ///
    /// Non-delete steps come first in stable dependency order; deletes of
    /// recorded resources absent from the spec follow in reverse dependency
    /// order. A resource whose prior value cannot be determined becomes an
    /// `Undefined` step and does not abort planning.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec violates a graph invariant.
    pub async fn preview(&self, stack: &StackKey, spec: &Spec, recorded: &[StateResource]) -> Result<ChangeOrder> {
        validate(spec)?;
        let ordered = topological_order(&spec.resources)?;

        let mut by_id: HashMap<&str, Vec<&StateResource>> = HashMap::new();
        for record in recorded {
            by_id.entry(record.resource.id.as_str()).or_default().push(record);
        }

        let mut steps: HashMap<String, ChangeStep> = HashMap::with_capacity(spec.len());
        for desired in &spec.resources {
            let records = by_id.get(desired.id.as_str()).map_or(&[][..], Vec::as_slice);
            let step = self.plan_resource(stack, desired, records).await;
            debug!("Planned {} {}", step.action, step.id);
            steps.insert(desired.id.clone(), step);
        }

        let mut order = ChangeOrder::new();
        for id in ordered {
            if let Some(step) = steps.remove(&id) {
                order.push(step);
            }
        }

        let desired_ids: HashSet<&str> = spec.resources.iter().map(|r| r.id.as_str()).collect();
        for step in self.delete_steps(recorded, &desired_ids) {
            order.push(step);
        }

        info!("Preview for {stack}: {}", order.summary());
        Ok(order)
    }

    /// Plans the deletion of every recorded resource.
    #[must_use]
    pub fn plan_destroy(&self, recorded: &[StateResource]) -> ChangeOrder {
        let mut order = ChangeOrder::new();
        for step in self.delete_steps(recorded, &HashSet::new()) {
            order.push(step);
        }
        info!("Destroy plan: {}", order.summary());
        order
    }

    async fn plan_resource(&self, stack: &StackKey, desired: &Resource, records: &[&StateResource]) -> ChangeStep {
        let recorded = records.first().map(|r| r.resource.clone());

        if desired.id.trim().is_empty() {
            return ChangeStep::undefined(desired.id.clone(), None, Some(desired.clone()), "resource ID is empty");
        }
        if records.len() > 1 {
            return ChangeStep::undefined(
                desired.id.clone(),
                recorded,
                Some(desired.clone()),
                format!("{} recorded resources share this ID", records.len()),
            );
        }

        match self.lookup_prior(stack, desired, records.first().copied()).await {
            Ok(Prior::Live(live)) => self.classify(desired, live),
            Ok(Prior::Recorded(Some(record))) if record.is_failed() => {
                debug!("{} is recorded as failed, planning an update", desired.id);
                ChangeStep::new(
                    desired.id.clone(),
                    Action::Update,
                    Some(record.resource.clone()),
                    Some(desired.clone()),
                )
                .with_details(self.diff.details(Some(&record.resource), Some(desired)))
            }
            Ok(Prior::Recorded(record)) => self.classify(desired, record.map(|r| r.resource.clone())),
            Err(e) => {
                warn!("Cannot read prior state of {}: {e}", desired.id);
                ChangeStep::undefined(desired.id.clone(), recorded, Some(desired.clone()), e.to_string())
            }
        }
    }

    async fn lookup_prior<'a>(
        &self,
        stack: &StackKey,
        desired: &Resource,
        record: Option<&'a StateResource>,
    ) -> std::result::Result<Prior<'a>, RuntimeError> {
        let Some(runtime) = self.registry.get(&desired.resource_type) else {
            return Ok(Prior::Recorded(record));
        };

        let request = ReadRequest {
            stack: stack.clone(),
            prior: record.map(|r| r.resource.clone()),
            planned: desired.clone(),
        };

        match runtime.read(&request).await {
            Ok(response) => Ok(Prior::Live(response.resource)),
            Err(RuntimeError::NotFound { .. }) => Ok(Prior::Live(None)),
            Err(RuntimeError::Unsupported { .. }) => Ok(Prior::Recorded(record)),
            Err(e) => Err(e),
        }
    }

    fn classify(&self, desired: &Resource, prior: Option<Resource>) -> ChangeStep {
        let details = self.diff.details(prior.as_ref(), Some(desired));
        let action = match &prior {
            None => Action::Create,
            Some(p) if self.diff.is_equal(p, desired) => Action::UnChanged,
            Some(_) => Action::Update,
        };
        ChangeStep::new(desired.id.clone(), action, prior, Some(desired.clone())).with_details(details)
    }

    /// Delete steps for recorded resources not in `keep`, dependents first.
    fn delete_steps(&self, recorded: &[StateResource], keep: &HashSet<&str>) -> Vec<ChangeStep> {
        let mut seen = HashSet::new();
        let removed: Vec<Resource> = recorded
            .iter()
            .filter(|r| !keep.contains(r.resource.id.as_str()))
            .filter(|r| seen.insert(r.resource.id.as_str()))
            .map(|r| r.resource.clone())
            .collect();

        let mut ids = topological_order(&removed).unwrap_or_else(|e| {
            warn!("Recorded resources are not orderable ({e}), deleting in reverse recorded order");
            removed.iter().map(|r| r.id.clone()).collect()
        });
        ids.reverse();

        let by_id: HashMap<&str, &Resource> = removed.iter().map(|r| (r.id.as_str(), r)).collect();
        ids.iter()
            .filter_map(|id| by_id.get(id.as_str()))
            .map(|resource| {
                ChangeStep::new(resource.id.clone(), Action::Delete, Some((*resource).clone()), None)
                    .with_details(self.diff.details(Some(resource), None))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConvergeError, SpecError};
    use crate::runtime::{
        ApplyRequest, ApplyResponse, DeleteRequest, DeleteStatus, ReadResponse, Runtime, RuntimeResult,
    };
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn res(id: &str, attrs: Value, deps: &[&str]) -> Resource {
        let Value::Object(map) = attrs else {
            panic!("attributes must be an object");
        };
        Resource::new(id, "Kubernetes", map).with_depends_on(deps.iter().copied())
    }

    fn stack() -> StackKey {
        StackKey::new("t", "p", "dev")
    }

    /// Reads from a fixed live set; IDs in `broken` fail to read.
    struct LiveRuntime {
        live: Vec<Resource>,
        broken: Vec<String>,
    }

    #[async_trait]
    impl Runtime for LiveRuntime {
        fn type_name(&self) -> &str {
            "Kubernetes"
        }

        async fn apply(&self, request: &ApplyRequest) -> RuntimeResult<ApplyResponse> {
            Ok(ApplyResponse {
                resource: request.planned.clone(),
            })
        }

        async fn read(&self, request: &ReadRequest) -> RuntimeResult<ReadResponse> {
            if self.broken.contains(&request.planned.id) {
                return Err(RuntimeError::failed("read", &request.planned.id, "connection refused"));
            }
            Ok(ReadResponse {
                resource: self.live.iter().find(|r| r.id == request.planned.id).cloned(),
            })
        }

        async fn delete(&self, _request: &DeleteRequest) -> RuntimeResult<DeleteStatus> {
            Ok(DeleteStatus::Deleted)
        }
    }

    #[tokio::test]
    async fn test_create_update_unchanged_delete_from_records() {
        let spec = Spec::new(vec![
            res("ns", json!({"kind": "Namespace"}), &[]),
            res("cm", json!({"kind": "ConfigMap", "data": {"k": "v2"}}), &["ns"]),
            res("sa", json!({"kind": "ServiceAccount"}), &["ns"]),
        ]);
        let recorded = vec![
            StateResource::converged(res("ns", json!({"kind": "Namespace"}), &[])),
            StateResource::converged(res("cm", json!({"kind": "ConfigMap", "data": {"k": "v1"}}), &["ns"])),
            StateResource::converged(res("old", json!({"kind": "Secret"}), &[])),
        ];

        let order = Planner::default().preview(&stack(), &spec, &recorded).await.expect("plan");

        assert_eq!(order.step_keys, vec!["ns", "cm", "sa", "old"]);
        let actions: Vec<Action> = order.steps().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![Action::UnChanged, Action::Update, Action::Create, Action::Delete]
        );

        let update = order.get("cm").expect("cm");
        assert_eq!(update.details.len(), 1);
        assert_eq!(update.details[0].field, "data.k");
        assert!(order.get("old").is_some_and(|s| s.to.is_none()));
    }

    #[tokio::test]
    async fn test_deletes_run_dependents_first() {
        let recorded = vec![
            StateResource::converged(res("ns", json!({}), &[])),
            StateResource::converged(res("sa", json!({}), &["ns"])),
            StateResource::converged(res("cm", json!({}), &["sa"])),
        ];

        let order = Planner::default()
            .preview(&stack(), &Spec::default(), &recorded)
            .await
            .expect("plan");
        assert_eq!(order.step_keys, vec!["cm", "sa", "ns"]);

        let destroy = Planner::default().plan_destroy(&recorded);
        assert_eq!(destroy.step_keys, vec!["cm", "sa", "ns"]);
        assert_eq!(destroy.summary().delete, 3);
    }

    #[tokio::test]
    async fn test_failed_record_is_retried() {
        let desired = res("a", json!({"kind": "Namespace"}), &[]);
        let recorded = vec![StateResource::failed(desired.clone(), "timeout")];

        let order = Planner::default()
            .preview(&stack(), &Spec::new(vec![desired]), &recorded)
            .await
            .expect("plan");
        assert_eq!(order.get("a").map(|s| s.action), Some(Action::Update));
    }

    #[tokio::test]
    async fn test_undefined_steps_do_not_abort() {
        let spec = Spec::new(vec![
            res(" ", json!({}), &[]),
            res("dup", json!({}), &[]),
            res("fine", json!({}), &[]),
        ]);
        let recorded = vec![
            StateResource::converged(res("dup", json!({}), &[])),
            StateResource::converged(res("dup", json!({"x": 1}), &[])),
        ];

        let order = Planner::default().preview(&stack(), &spec, &recorded).await.expect("plan");

        assert_eq!(order.get(" ").map(|s| s.action), Some(Action::Undefined));
        assert_eq!(order.get("dup").map(|s| s.action), Some(Action::Undefined));
        assert_eq!(order.get("fine").map(|s| s.action), Some(Action::Create));

        let errors = order.planning_errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].to_string().contains("2 recorded resources share this ID"));
    }

    #[tokio::test]
    async fn test_live_read_takes_precedence() {
        let runtime = LiveRuntime {
            live: vec![res("a", json!({"kind": "Namespace", "meta": {"rv": "9"}}), &[])],
            broken: vec![String::from("c")],
        };
        let planner = Planner::new(RuntimeRegistry::new().with(Arc::new(runtime)))
            .with_diff_engine(DiffEngine::with_ignored_fields(["meta.rv"]));

        let spec = Spec::new(vec![
            res("a", json!({"kind": "Namespace", "meta": {}}), &[]),
            res("b", json!({"kind": "Namespace"}), &[]),
            res("c", json!({"kind": "Namespace"}), &[]),
        ]);
        // Recorded says b exists, but the live read reports it gone.
        let recorded = vec![StateResource::converged(res("b", json!({"kind": "Namespace"}), &[]))];

        let order = planner.preview(&stack(), &spec, &recorded).await.expect("plan");

        assert_eq!(order.get("a").map(|s| s.action), Some(Action::UnChanged));
        assert_eq!(order.get("b").map(|s| s.action), Some(Action::Create));
        let c = order.get("c").expect("c");
        assert_eq!(c.action, Action::Undefined);
        assert!(c.reason.as_deref().is_some_and(|r| r.contains("connection refused")));
    }

    #[tokio::test]
    async fn test_cycle_is_fatal() {
        let spec = Spec::new(vec![
            res("a", json!({}), &["b"]),
            res("b", json!({}), &["a"]),
        ]);

        let result = Planner::default().preview(&stack(), &spec, &[]).await;
        assert!(matches!(
            result,
            Err(ConvergeError::Spec(SpecError::CyclicDependency { .. }))
        ));
    }

    #[tokio::test]
    async fn test_step_keys_respect_dependencies() {
        let spec = Spec::new(vec![
            res("d", json!({}), &["c"]),
            res("c", json!({}), &["a", "b"]),
            res("b", json!({}), &[]),
            res("a", json!({}), &[]),
        ]);

        let order = Planner::default().preview(&stack(), &spec, &[]).await.expect("plan");
        assert_eq!(order.step_keys, vec!["b", "a", "c", "d"]);

        let position: HashMap<&str, usize> =
            order.step_keys.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();
        for resource in &spec.resources {
            for dep in &resource.depends_on {
                assert!(position[dep.as_str()] < position[resource.id.as_str()]);
            }
        }
    }
}
