//! GPU plan overrides for a host query engine.
//!
//! The crate decides, node by node, whether a host physical plan can run on
//! the GPU and rewrites it into a mixed host/device plan with explicit
//! transitions. See [`overrides::Overrides`] for the entry point.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod host;
pub mod overrides;
pub mod types;

pub use config::AccelConf;
pub use error::{OverrideError, Result};
pub use overrides::{ConvertedPlan, ExplainMode, OverrideOutput, Overrides, Registry};
