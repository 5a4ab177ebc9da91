// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Converge
//!
//! A change-planning and concurrent execution engine for declarative
//! infrastructure stacks.
//!
//! ## Overview
//!
//! A stack is described by a spec: a list of resources, each with an ID, a
//! backend `type`, free-form attributes and optional `dependsOn` edges.
//! Converge compares that spec with the recorded state of the stack, plans
//! the changes and executes them concurrently against pluggable runtimes.
//!
//! ## Architecture
//!
//! 1. **Prepare**: implicit edges are injected from a kind precedence list
//!    (`Namespace` before `ServiceAccount`, ...) and the graph is validated
//! 2. **Preview**: every resource is classified as `Create`, `Update`,
//!    `Delete`, `UnChanged` or `Undefined`, in dependency order
//! 3. **Apply**: steps run on a bounded worker pool as soon as their
//!    dependencies are terminal, streaming progress messages
//! 4. **Persist**: the resulting resource set is saved once, under a lock
//!
//! ## Modules
//!
//! - [`spec`]: Resource graph model, parsing and implicit ordering
//! - [`planner`]: Diffing, change orders, preview and execution
//! - [`runtime`]: Backend runtime contract and registry
//! - [`state`]: State storage backends (local, S3, memory)
//! - [`config`]: Engine configuration and validation
//! - [`engine`]: Preview, apply and destroy orchestration
//! - [`logging`]: Tracing subscriber setup
//!
//! ## Example
//!
//! ```yaml
//! resources:
//!   - id: v1:Namespace:team-a
//!     type: Kubernetes
//!     attributes:
//!       apiVersion: v1
//!       kind: Namespace
//!       metadata:
//!         name: team-a
//!   - id: v1:ServiceAccount:team-a:builder
//!     type: Kubernetes
//!     attributes:
//!       apiVersion: v1
//!       kind: ServiceAccount
//!       metadata:
//!         name: builder
//!         namespace: team-a
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod planner;
pub mod runtime;
pub mod spec;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{ConfigParser, ConfigValidator, EngineConfig};
pub use engine::{ApplyReport, Engine, StepReport};
pub use error::{AggregateApplyError, ConvergeError, Result};
pub use logging::{LogFormat, init_logging};
pub use planner::{
    Action, ApplyOperation, CancelHandle, ChangeOrder, ChangeStep, DiffEngine, ExecutionPolicy, FailurePolicy, Message,
    OpResult, Planner,
};
pub use runtime::{Runtime, RuntimeRegistry};
pub use spec::{OrderedResourcesGenerator, Resource, Spec, SpecParser};
pub use state::{LocalStateStore, MemoryStateStore, S3StateStore, StackKey, State, StateStore};
