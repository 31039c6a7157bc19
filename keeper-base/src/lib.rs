//! Ambient plumbing shared by every keeper job: settings loading, tracing
//! setup, the Slack notifier, the status store, subgraph access and the job
//! runner.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use job::*;
pub use notifier::*;
pub use store::*;
pub use subgraph::*;

/// Settings and tracing configuration
pub mod settings;

mod job;
mod notifier;
mod store;
mod subgraph;
