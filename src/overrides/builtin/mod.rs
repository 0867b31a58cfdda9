//! Built-in rules registered by [`Registry::builtin`].
//!
//! [`Registry::builtin`]: crate::overrides::rule::Registry::builtin

mod execs;
mod exprs;

use crate::overrides::rule::Registry;

/// Formats accepted by the file scan rule.
pub const SCAN_FORMATS: [&str; 3] = ["parquet", "orc", "csv"];

/// Join types the GPU hash joins implement.
pub const SUPPORTED_JOIN_TYPES: [&str; 6] = [
    "inner",
    "left_outer",
    "right_outer",
    "left_semi",
    "left_anti",
    "full_outer",
];

pub(crate) fn register_all(registry: &mut Registry) {
    exprs::register(&mut registry.exprs);
    execs::register(&mut registry.execs);
}
