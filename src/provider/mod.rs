//! Provider backends.
//!
//! A provider performs the side effects behind each planned action. The
//! engine only ever talks to the [`ProviderBackend`] trait:
//! - [`SimulatedProvider`]: deterministic in-process outputs, for local runs
//!   and tests
//! - [`CommandProvider`]: delegates each action to an external program

mod backend;
mod command;
mod simulated;

pub use backend::{ApplyRequest, DeleteRequest, Outputs, ProviderBackend, ProviderResult};
pub use command::CommandProvider;
pub use simulated::{ProviderCall, SimulatedProvider};
