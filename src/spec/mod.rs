//! Resource graph model.
//!
//! This module handles everything about the desired state document:
//! - Resource and spec types, with the kind accessor used for ordering
//! - Parsing spec documents from YAML
//! - Graph validation and stable topological ordering
//! - Implicit dependency injection by kind precedence
//! - Hashing specs for change tracking

mod graph;
mod hash;
mod ordering;
mod parser;
mod resource;

pub use graph::{topological_order, validate};
pub use hash::SpecHasher;
pub use ordering::{DEFAULT_ORDERED_KINDS, Generator, OrderedResourcesGenerator, run_generators};
pub use parser::SpecParser;
pub use resource::{Attributes, KUBERNETES, Resource, Spec, TERRAFORM, build_id};
