//! Declared correspondence between host node parameters and the parameters
//! of their GPU replacements.
//!
//! Converters copy parameters implicitly, so a converter that forgets a host
//! parameter, or adds an undeclared one, only shows up here.

use std::collections::BTreeSet;

use crate::config::AccelConf;
use crate::host::{HostExpr, HostPlan, NodeClass, ParamValue};
use crate::overrides::rule::{Registry, RuleKind};
use crate::types::{DataType, ScalarValue};

/// One row of the parity table.
#[derive(Clone, Copy, Debug)]
pub struct ParamParity {
    /// Short class name of the host node.
    pub host: &'static str,
    /// Rule category.
    pub kind: RuleKind,
    /// Host fields and parameters the replacement must carry.
    pub host_params: &'static [&'static str],
    /// Expected GPU node name.
    pub gpu: &'static str,
    /// Exact parameter set of the GPU node.
    pub gpu_params: &'static [&'static str],
}

const fn row(
    host: &'static str,
    kind: RuleKind,
    host_params: &'static [&'static str],
    gpu: &'static str,
    gpu_params: &'static [&'static str],
) -> ParamParity {
    ParamParity {
        host,
        kind,
        host_params,
        gpu,
        gpu_params,
    }
}

/// Rules whose host node carries parameters.
pub const PARAM_PARITY: &[ParamParity] = &[
    row("Literal", RuleKind::Expression, &["value"], "GpuLiteral", &["value"]),
    row("AttributeReference", RuleKind::Expression, &["name"], "GpuAttributeReference", &["name"]),
    row("Alias", RuleKind::Expression, &["name"], "GpuAlias", &["name"]),
    row(
        "SortOrder",
        RuleKind::Expression,
        &["ascending", "nulls_first"],
        "GpuSortOrder",
        &["ascending", "nulls_first"],
    ),
    row("AggregateExpression", RuleKind::Expression, &["distinct"], "GpuAggregateExpression", &["distinct"]),
    row("HashPartitioning", RuleKind::Partitioning, &["num_partitions"], "GpuHashPartitioning", &["num_partitions"]),
    row("RangePartitioning", RuleKind::Partitioning, &["num_partitions"], "GpuRangePartitioning", &["num_partitions"]),
    row(
        "RoundRobinPartitioning",
        RuleKind::Partitioning,
        &["num_partitions"],
        "GpuRoundRobinPartitioning",
        &["num_partitions"],
    ),
    row("HashAggregateExec", RuleKind::Exec, &["num_grouping"], "GpuHashAggregateExec", &["num_grouping"]),
    row("LocalLimitExec", RuleKind::Exec, &["limit"], "GpuLocalLimitExec", &["limit"]),
    row("GlobalLimitExec", RuleKind::Exec, &["limit", "offset"], "GpuGlobalLimitExec", &["limit", "offset"]),
    row("SortExec", RuleKind::Exec, &["global"], "GpuSortExec", &["global"]),
    row(
        "ShuffledHashJoinExec",
        RuleKind::Exec,
        &["join_type", "num_left_keys"],
        "GpuShuffledHashJoinExec",
        &["join_type", "num_left_keys"],
    ),
    row(
        "BroadcastHashJoinExec",
        RuleKind::Exec,
        &["build_side", "join_type", "num_left_keys"],
        "GpuBroadcastHashJoinExec",
        &["build_side", "join_type", "num_left_keys"],
    ),
    row("CoalesceBatchesExec", RuleKind::Exec, &[], "GpuCoalesceBatchesExec", &["target_batch_bytes"]),
    row(
        "FileSourceScanExec",
        RuleKind::Scan,
        &["format"],
        "GpuFileSourceScanExec",
        &["batch_size_bytes", "format"],
    ),
];

/// Runs every row's converter on a sample node and returns one message per
/// mismatch.
pub fn check_param_parity(registry: &Registry, conf: &AccelConf) -> Vec<String> {
    PARAM_PARITY
        .iter()
        .filter_map(|entry| check_row(registry, conf, entry).err())
        .collect()
}

fn check_row(registry: &Registry, conf: &AccelConf, entry: &ParamParity) -> Result<(), String> {
    let (name, params): (String, BTreeSet<String>) = match entry.kind {
        RuleKind::Expression | RuleKind::Partitioning => {
            let class = NodeClass::expression(entry.host);
            let rule = registry
                .exprs
                .lookup(&class)
                .ok_or_else(|| format!("{}: no rule registered", entry.host))?;
            let mut host = HostExpr::call(entry.host, DataType::Int, Vec::new());
            for param in entry.host_params {
                if *param == "name" {
                    host.name = Some("c".to_string());
                } else {
                    host.params.insert(param.to_string(), sample_value(param));
                }
            }
            let gpu = rule.convert_node(&host, conf, Vec::new());
            (gpu.name, gpu.params.into_keys().collect())
        }
        RuleKind::Exec | RuleKind::Scan => {
            let class = NodeClass::exec(entry.host);
            let rule = registry
                .execs
                .lookup(&class)
                .ok_or_else(|| format!("{}: no rule registered", entry.host))?;
            let mut host = HostPlan::new(entry.host);
            for param in entry.host_params {
                host.params.insert(param.to_string(), sample_value(param));
            }
            let gpu = rule.convert_node(&host, conf, Vec::new());
            (gpu.name, gpu.params.into_keys().collect())
        }
    };
    if name != entry.gpu {
        return Err(format!("{}: converts to {name}, expected {}", entry.host, entry.gpu));
    }
    let expected: BTreeSet<String> = entry.gpu_params.iter().map(|p| p.to_string()).collect();
    if params != expected {
        return Err(format!(
            "{}: GPU params {:?} do not match declared {:?}",
            entry.host, params, expected
        ));
    }
    Ok(())
}

fn sample_value(param: &str) -> ParamValue {
    match param {
        "value" => ParamValue::Scalar(ScalarValue::Int(1)),
        "format" => ParamValue::Str("parquet".to_string()),
        "join_type" => ParamValue::Str("inner".to_string()),
        "build_side" => ParamValue::Str("right".to_string()),
        "ascending" | "nulls_first" | "distinct" | "global" => ParamValue::Bool(true),
        _ => ParamValue::Int(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_converters_match_parity_table() {
        let mismatches = check_param_parity(&Registry::builtin(), &AccelConf::default());
        assert!(mismatches.is_empty(), "{mismatches:#?}");
    }

    #[test]
    fn dropped_parameter_is_reported() {
        let mut registry = Registry::builtin();
        registry.register_exec(
            crate::overrides::rule::Rule::exec("LocalLimitExec", "limit").convert_with(
                |plan, _conf, exprs| {
                    let mut exec = crate::overrides::convert::GpuExec::from_host(plan, exprs);
                    exec.params.clear();
                    exec
                },
            ),
        );
        let mismatches = check_param_parity(&registry, &AccelConf::default());
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].starts_with("LocalLimitExec"));
    }

    #[test]
    fn every_row_names_a_distinct_class() {
        let unique: BTreeSet<&str> = PARAM_PARITY.iter().map(|row| row.host).collect();
        assert_eq!(unique.len(), PARAM_PARITY.len());
    }
}
