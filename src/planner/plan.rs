//! Change order types.
//!
//! A [`ChangeOrder`] is the output of planning and the input of execution:
//! one [`ChangeStep`] per resource ID, plus the order in which the steps may
//! be started.

use serde::Serialize;
use std::collections::HashMap;

use crate::error::PlanError;
use crate::spec::Resource;

use super::diff::DiffDetail;

/// What the executor does for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Action {
    /// The resource does not exist yet.
    Create,
    /// The resource exists with different attributes.
    Update,
    /// The resource is recorded but no longer desired.
    Delete,
    /// The resource already matches.
    UnChanged,
    /// The prior state could not be determined.
    Undefined,
}

/// The planned change for one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeStep {
    /// Resource ID.
    pub id: String,
    /// Planned action.
    pub action: Action,
    /// Prior resource, if one was found.
    pub from: Option<Resource>,
    /// Desired resource, absent for deletes.
    pub to: Option<Resource>,
    /// Planning error cause, set for undefined steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Field-level differences between `from` and `to`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<DiffDetail>,
}

/// An ordered set of change steps.
///
/// Every key in `step_keys` has exactly one entry in `change_steps`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeOrder {
    /// Step IDs in a dependency-respecting order.
    pub step_keys: Vec<String>,
    /// Steps by resource ID.
    pub change_steps: HashMap<String, ChangeStep>,
}

/// Display view of one step.
#[derive(Debug, Clone, Serialize)]
pub struct Change<'a> {
    /// Resource ID.
    pub id: &'a str,
    /// Planned action.
    pub action: Action,
    /// Prior resource.
    pub from: Option<&'a Resource>,
    /// Desired resource.
    pub to: Option<&'a Resource>,
    /// Field-level differences.
    pub details: &'a [DiffDetail],
}

/// Number of steps per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    /// Steps creating a resource.
    pub create: usize,
    /// Steps updating a resource.
    pub update: usize,
    /// Steps deleting a resource.
    pub delete: usize,
    /// Steps with nothing to do.
    pub unchanged: usize,
    /// Steps that could not be planned.
    pub undefined: usize,
}

impl ChangeStep {
    /// Creates a step.
    #[must_use]
    pub fn new(id: impl Into<String>, action: Action, from: Option<Resource>, to: Option<Resource>) -> Self {
        Self {
            id: id.into(),
            action,
            from,
            to,
            reason: None,
            details: Vec::new(),
        }
    }

    /// Creates an undefined step carrying its planning error.
    #[must_use]
    pub fn undefined(id: impl Into<String>, from: Option<Resource>, to: Option<Resource>, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::new(id, Action::Undefined, from, to)
        }
    }

    /// Attaches field-level differences.
    #[must_use]
    pub fn with_details(mut self, details: Vec<DiffDetail>) -> Self {
        self.details = details;
        self
    }

    /// IDs this step depends on when creating or updating.
    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        self.to.as_ref().map_or(&[] as &[String], |r| r.depends_on.as_slice())
    }
}

impl ChangeOrder {
    /// Creates an empty order.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step at the end of the order.
    ///
    /// A step for an ID already present replaces it and keeps its position.
    pub fn push(&mut self, step: ChangeStep) {
        if !self.change_steps.contains_key(&step.id) {
            self.step_keys.push(step.id.clone());
        }
        self.change_steps.insert(step.id.clone(), step);
    }

    /// Gets the step for a resource ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ChangeStep> {
        self.change_steps.get(id)
    }

    /// Iterates over steps in order.
    pub fn steps(&self) -> impl Iterator<Item = &ChangeStep> {
        self.step_keys.iter().filter_map(|id| self.change_steps.get(id))
    }

    /// Returns the number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.step_keys.len()
    }

    /// Returns true if there are no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.step_keys.is_empty()
    }

    /// Returns the ordered display views of every step.
    #[must_use]
    pub fn changes(&self) -> Vec<Change<'_>> {
        self.steps()
            .map(|step| Change {
                id: &step.id,
                action: step.action,
                from: step.from.as_ref(),
                to: step.to.as_ref(),
                details: &step.details,
            })
            .collect()
    }

    /// Counts steps per action.
    #[must_use]
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for step in self.steps() {
            match step.action {
                Action::Create => summary.create += 1,
                Action::Update => summary.update += 1,
                Action::Delete => summary.delete += 1,
                Action::UnChanged => summary.unchanged += 1,
                Action::Undefined => summary.undefined += 1,
            }
        }
        summary
    }

    /// Returns the planning error of every undefined step.
    #[must_use]
    pub fn planning_errors(&self) -> Vec<PlanError> {
        self.steps()
            .filter(|step| step.action == Action::Undefined)
            .map(|step| PlanError::Undefined {
                id: step.id.clone(),
                reason: step.reason.clone().unwrap_or_default(),
            })
            .collect()
    }
}

impl ChangeSummary {
    /// Returns true if any step changes a resource.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.create > 0 || self.update > 0 || self.delete > 0
    }

    /// Returns the number of steps that change a resource.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.create + self.update + self.delete
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::UnChanged => "UnChanged",
            Self::Undefined => "Undefined",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ChangeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.id)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({reason})")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} unchanged",
            self.create, self.update, self.delete, self.unchanged
        )?;
        if self.undefined > 0 {
            write!(f, ", {} undefined", self.undefined)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ChangeOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No resources");
        }

        writeln!(f, "Change order ({} steps):", self.len())?;
        for (i, step) in self.steps().enumerate() {
            writeln!(f, "  {}. {step}", i + 1)?;
            for detail in &step.details {
                writeln!(f, "       {detail}")?;
            }
        }
        write!(f, "Summary: {}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn res(id: &str) -> Resource {
        Resource::new(id, "Kubernetes", Map::new())
    }

    fn sample_order() -> ChangeOrder {
        let mut order = ChangeOrder::new();
        order.push(ChangeStep::new("a", Action::Create, None, Some(res("a"))));
        order.push(ChangeStep::new("b", Action::UnChanged, Some(res("b")), Some(res("b"))));
        order.push(ChangeStep::undefined("c", None, Some(res("c")), "read timed out"));
        order.push(ChangeStep::new("d", Action::Delete, Some(res("d")), None));
        order
    }

    #[test]
    fn test_push_keeps_order_and_replaces() {
        let mut order = sample_order();
        order.push(ChangeStep::new("b", Action::Update, Some(res("b")), Some(res("b"))));

        assert_eq!(order.step_keys, vec!["a", "b", "c", "d"]);
        assert_eq!(order.len(), order.change_steps.len());
        assert_eq!(order.get("b").map(|s| s.action), Some(Action::Update));
    }

    #[test]
    fn test_summary_and_errors() {
        let order = sample_order();
        let summary = order.summary();

        assert_eq!(
            summary,
            ChangeSummary {
                create: 1,
                update: 0,
                delete: 1,
                unchanged: 1,
                undefined: 1,
            }
        );
        assert!(summary.has_changes());
        assert_eq!(summary.total_changes(), 2);

        let errors = order.planning_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].to_string(), "Cannot determine action for c: read timed out");
    }

    #[test]
    fn test_changes_view_serializes() {
        let order = sample_order();
        let changes = order.changes();
        let ids: Vec<&str> = changes.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);

        let json = serde_json::to_value(&changes).expect("serialize");
        assert_eq!(json[0]["action"], "Create");
        assert!(json[0]["from"].is_null());
        assert!(json[3]["to"].is_null());
    }

    #[test]
    fn test_display() {
        let text = sample_order().to_string();
        assert!(text.starts_with("Change order (4 steps):"));
        assert!(text.contains("3. Undefined c (read timed out)"));
        assert!(text.ends_with("1 to create, 0 to update, 1 to delete, 1 unchanged, 1 undefined"));

        assert_eq!(ChangeOrder::new().to_string(), "No resources");
    }
}
