#![forbid(unsafe_code)]

//! Plan override pipeline.
//!
//! [`Overrides::apply`] wraps a host plan in a [`PlanMeta`] tree, tags every
//! node against the [`Registry`] and the resolved [`AccelConf`], runs the
//! fix-up passes and converts the result into a mixed host/GPU plan.

pub mod builtin;
pub mod convert;
pub mod explain;
pub mod meta;
pub mod parity;
pub mod rule;

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::AccelConf;
use crate::error::{OverrideError, Result};
use crate::host::HostPlan;

pub use convert::{ConversionStats, ConvertedPlan, ExecNode, ExecOp, GpuExec, GpuExpr, HostExec};
pub use explain::{explain, ExplainMode};
pub use meta::{ExprMeta, Meta, PlanMeta, TagContext};
pub use rule::{Convertible, Registry, Rule, RuleDoc, RuleKind, RuleRegistry};

const EXCHANGE_OVERHEAD_REASON: &str =
    "columnar exchange without columnar children and parent is inefficient";

/// Output of [`Overrides::apply`].
#[derive(Clone, Debug)]
pub struct OverrideOutput {
    /// Converted plan.
    pub plan: ConvertedPlan,
    /// Tagging report in the configured explain mode; empty for `NONE`.
    pub explain: String,
}

/// Entry point of the override pipeline.
#[derive(Clone, Debug)]
pub struct Overrides {
    registry: Arc<Registry>,
    conf: Arc<AccelConf>,
}

impl Overrides {
    /// Pipeline over the built-in rules.
    pub fn new(conf: Arc<AccelConf>) -> Self {
        Self::with_registry(Registry::shared(), conf)
    }

    /// Pipeline over a caller-supplied registry.
    pub fn with_registry(registry: Arc<Registry>, conf: Arc<AccelConf>) -> Self {
        Self { registry, conf }
    }

    /// Registry in use.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Configuration snapshot in use.
    pub fn conf(&self) -> &AccelConf {
        &self.conf
    }

    /// Builds and tags the meta tree for `plan`, including fix-up passes.
    pub fn tag<'a>(&'a self, plan: &'a HostPlan) -> PlanMeta<'a> {
        let mut meta = PlanMeta::wrap(plan, &self.registry);
        meta.tag_for_gpu(&self.conf);
        if self.conf.fixup_exchange_overhead() {
            fixup_exchange_overhead(&mut meta, false);
        }
        let (eligible, total) = meta.eligibility_counts();
        debug!(eligible, total, "overrides.tag.completed");
        meta
    }

    /// Rewrites `plan` into a mixed host/GPU plan.
    ///
    /// Returns the host plan unchanged when `accel.sql.enabled` is false.
    /// In test mode, fails with [`OverrideError::NotOnGpu`] for the first
    /// operator left on the host that is not explicitly allowed.
    pub fn apply(&self, plan: &HostPlan) -> Result<OverrideOutput> {
        if !self.conf.is_sql_enabled() {
            debug!("overrides.disabled");
            return Ok(OverrideOutput {
                plan: ConvertedPlan::host_only(plan),
                explain: String::new(),
            });
        }
        let meta = self.tag(plan);
        let mode = self.conf.explain();
        let report = explain(&meta, mode);
        if !report.is_empty() {
            info!(mode = %mode, report = %report, "overrides.explain");
        }
        if self.conf.is_test_enabled() {
            assert_on_gpu(&meta, self.conf.allowed_non_gpu())?;
        }
        let converted = ConvertedPlan::new(meta.convert_if_needed(&self.conf)?);
        info!(
            gpu_nodes = converted.stats.gpu_nodes,
            host_nodes = converted.stats.host_nodes,
            transitions = converted.stats.transitions,
            fingerprint = converted.fingerprint,
            "overrides.convert.completed"
        );
        Ok(OverrideOutput {
            plan: converted,
            explain: report,
        })
    }
}

/// Keeps exchanges on the host when neither side of them is on the GPU.
///
/// Runs top-down so each exchange sees its parent's final decision. The
/// root's consumer is treated as host.
fn fixup_exchange_overhead(meta: &mut PlanMeta<'_>, parent_on_gpu: bool) {
    if meta.is_exchange()
        && meta.can_this_be_replaced()
        && !parent_on_gpu
        && meta.children().iter().all(|child| !child.can_this_be_replaced())
    {
        debug!(node = meta.short_name(), "overrides.fixup.exchange");
        meta.will_not_work_on_gpu(EXCHANGE_OVERHEAD_REASON);
    }
    let on_gpu = meta.can_this_be_replaced();
    for child in meta.children_mut() {
        fixup_exchange_overhead(child, on_gpu);
    }
}

fn assert_on_gpu(meta: &PlanMeta<'_>, allowed: &[String]) -> Result<()> {
    first_unexpected_host_node(meta, allowed).map_or(Ok(()), Err)
}

/// Pre-order over a node, its expressions, then its children; the order
/// the explain report uses.
fn first_unexpected_host_node<N: Convertible>(
    meta: &Meta<'_, N>,
    allowed: &[String],
) -> Option<OverrideError> {
    if !meta.can_this_be_replaced() && !allowed.iter().any(|name| name == meta.short_name()) {
        return Some(OverrideError::NotOnGpu {
            node: meta.short_name().to_string(),
            reasons: meta.reasons().to_vec(),
        });
    }
    meta.exprs()
        .iter()
        .find_map(|expr| first_unexpected_host_node(expr, allowed))
        .or_else(|| {
            meta.children()
                .iter()
                .find_map(|child| first_unexpected_host_node(child, allowed))
        })
}
