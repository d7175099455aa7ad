//! Resource graph model.
//!
//! This module provides:
//! - Input values, attribute references and template parsing
//! - Resource nodes and declaration sets
//! - The dependency graph and its deterministic ordering

mod declaration;
mod dependency;
mod node;
mod value;

pub use declaration::DeclarationSet;
pub use dependency::DependencyGraph;
pub use node::{RemovalPolicy, ResourceKind, ResourceNode};
pub use value::{AttributeReference, InputValue, TemplatePart};
