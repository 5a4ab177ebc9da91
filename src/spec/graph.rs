//! Dependency graph validation and ordering.
//!
//! Edges point from a resource to the resources listed in its `dependsOn`.
//! Ordering is a stable topological sort: among resources whose dependencies
//! are satisfied, the one declared first wins.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

use crate::error::SpecError;

use super::resource::{Resource, Spec};

/// Validates the graph invariants of a spec.
///
/// # Errors
///
/// Returns an error on duplicate IDs, on a `dependsOn` entry that names no
/// resource of the spec, or on a dependency cycle.
pub fn validate(spec: &Spec) -> Result<(), SpecError> {
    let mut seen = HashSet::new();
    for resource in &spec.resources {
        if !seen.insert(resource.id.as_str()) {
            return Err(SpecError::DuplicateId {
                id: resource.id.clone(),
            });
        }
    }

    for resource in &spec.resources {
        if let Some(missing) = resource
            .depends_on
            .iter()
            .find(|dep| !seen.contains(dep.as_str()))
        {
            return Err(SpecError::UnresolvedDependency {
                id: resource.id.clone(),
                dependency: missing.clone(),
            });
        }
    }

    topological_order(&spec.resources).map(|_| ())
}

/// Returns resource IDs in a dependency-respecting order.
///
/// Edges to IDs outside `resources` are ignored. Ties between independent
/// resources keep their input order.
///
/// # Errors
///
/// Returns [`SpecError::CyclicDependency`] if the edges form a cycle.
pub fn topological_order(resources: &[Resource]) -> Result<Vec<String>, SpecError> {
    let index: HashMap<&str, usize> = resources
        .iter()
        .enumerate()
        .map(|(i, r)| (r.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0_usize; resources.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); resources.len()];

    for (i, resource) in resources.iter().enumerate() {
        let deps: HashSet<usize> = resource
            .depends_on
            .iter()
            .filter_map(|dep| index.get(dep.as_str()).copied())
            .collect();
        in_degree[i] = deps.len();
        for dep in deps {
            dependents[dep].push(i);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(resources.len());
    while let Some(Reverse(i)) = ready.pop() {
        order.push(resources[i].id.clone());
        for &dependent in &dependents[i] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != resources.len() {
        let cycle = find_cycle(resources, &index, &in_degree);
        debug!("Dependency cycle: {cycle}");
        return Err(SpecError::CyclicDependency { cycle });
    }

    Ok(order)
}

/// Walks unresolved nodes until one repeats and renders that loop.
fn find_cycle(resources: &[Resource], index: &HashMap<&str, usize>, in_degree: &[usize]) -> String {
    let Some(start) = in_degree.iter().position(|d| *d > 0) else {
        return String::from("unknown");
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = position.get(&current) {
            let mut ids: Vec<&str> = path[at..]
                .iter()
                .map(|&i| resources[i].id.as_str())
                .collect();
            ids.push(resources[current].id.as_str());
            return ids.join(" -> ");
        }
        position.insert(current, path.len());
        path.push(current);

        // Every node left with a positive in-degree has an unresolved
        // dependency that is itself part of, or leads into, a cycle.
        let next = resources[current]
            .depends_on
            .iter()
            .filter_map(|dep| index.get(dep.as_str()).copied())
            .find(|&dep| in_degree[dep] > 0);

        match next {
            Some(n) => current = n,
            None => return resources[start].id.clone(),
        }
    }
}
