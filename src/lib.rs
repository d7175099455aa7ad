// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
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

//! # Skyform
//!
//! A declarative infrastructure-composition engine.
//!
//! ## Overview
//!
//! Skyform lets you declare resources and the wiring between them, then
//! brings recorded state in line with the declarations:
//!
//! - Declare resources as a graph of nodes in a YAML file
//! - Wire one resource's output into another's input with `${node.output}`
//! - Plan creates, updates and deletes in dependency order
//! - Apply the plan through a pluggable provider, recording state as it goes
//!
//! ## Architecture
//!
//! 1. **Declarations**: nodes with inputs, outputs and a removal policy
//! 2. **Dependency graph**: edges derived from attribute references
//! 3. **Plan**: topological order diffed against the recorded state
//! 4. **Executor**: runs actions, resolving references as producers finish
//!
//! ## Modules
//!
//! - [`graph`]: Nodes, references and the dependency graph
//! - [`config`]: Declaration file parsing, validation and hashing
//! - [`planner`]: Diff computation, planning and execution
//! - [`provider`]: Provider backends that perform the side effects
//! - [`state`]: State storage backends (local, S3)
//! - [`engine`]: Locked plan/apply/destroy runs
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: site
//!   environment: dev
//!
//! resources:
//!   - id: bucket
//!     kind: storage.bucket
//!     outputs: [arn]
//!   - id: cdn
//!     kind: cdn.distribution
//!     inputs:
//!       origin: "${bucket.arn}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod planner;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackFile};
pub use engine::{Engine, RunOutcome};
pub use error::{Result, SkyformError};
pub use graph::{AttributeReference, DeclarationSet, DependencyGraph, InputValue, ResourceNode};
pub use planner::{Plan, PlanBuilder, PlanExecutor};
pub use provider::{CommandProvider, ProviderBackend, SimulatedProvider};
pub use state::{LocalStateStore, S3StateStore, StackState, StateStore};
