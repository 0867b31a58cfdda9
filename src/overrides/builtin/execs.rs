use crate::config::AccelConf;
use crate::host::{HostPlan, NodeClass, ParamValue};
use crate::overrides::convert::{GpuExec, GpuExpr};
use crate::overrides::meta::TagContext;
use crate::overrides::rule::{Rule, RuleRegistry};
use crate::types::{DataType, TypeSig};

use super::{SCAN_FORMATS, SUPPORTED_JOIN_TYPES};

type PlanCtx<'m, 'a> = TagContext<'m, 'a, HostPlan>;

pub(super) fn register(registry: &mut RuleRegistry<HostPlan>) {
    let columns = TypeSig::COMMON | TypeSig::NESTED;

    let rules = [
        Rule::exec("ProjectExec", "The backend for most select, withColumn and dropColumn statements")
            .output(columns)
            .tag_with(tag_identity_projection),
        Rule::exec("FilterExec", "The backend for most filter statements")
            .output(columns)
            .tag_with(tag_filter_condition),
        Rule::exec("HashAggregateExec", "The backend for hash based aggregations")
            .output(columns)
            .tag_with(tag_grouping_keys),
        Rule::exec("SortExec", "The backend for the sort operator")
            .output(columns)
            .tag_with(tag_sort_keys),
        Rule::exec("LocalLimitExec", "Per-partition limiting of results")
            .output(columns)
            .tag_with(tag_limit),
        Rule::exec("GlobalLimitExec", "Limiting of results across partitions")
            .output(columns)
            .tag_with(tag_limit),
        Rule::exec("UnionExec", "The backend for the union operator")
            .output(columns)
            .tag_with(tag_union_arity),
        Rule::exec("ShuffleExchangeExec", "The backend for most data being exchanged between processes")
            .output(columns)
            .exchange()
            .tag_with(tag_shuffle_partitioning),
        Rule::exec("BroadcastExchangeExec", "The backend for broadcast exchange of data")
            .output(columns)
            .exchange(),
        Rule::exec("ShuffledHashJoinExec", "Implementation of join using hashed shuffled data")
            .output(columns)
            .tag_with(tag_hash_join),
        Rule::exec("BroadcastHashJoinExec", "Implementation of join using broadcast data")
            .output(columns)
            .tag_with(|ctx: &mut PlanCtx<'_, '_>| {
                tag_hash_join(ctx);
                tag_broadcast_build_side(ctx);
            }),
        Rule::exec("CartesianProductExec", "Implementation of join using brute force")
            .output(columns)
            .disabled_by_default("large joins can cause out of memory errors"),
        Rule::exec("CoalesceBatchesExec", "The backend for combining small batches into larger ones")
            .output(columns)
            .convert_with(convert_with_batch_size("target_batch_bytes")),
        Rule::scan("FileSourceScanExec", "Reading data from files, often from Hive tables")
            .output(columns)
            .tag_with(tag_file_scan)
            .convert_with(convert_with_batch_size("batch_size_bytes")),
    ];
    for rule in rules {
        registry.register(rule);
    }
}

fn convert_with_batch_size(
    param: &'static str,
) -> impl Fn(&HostPlan, &AccelConf, Vec<GpuExpr>) -> GpuExec + Send + Sync + 'static {
    move |plan, conf, exprs| {
        let bytes = i64::try_from(conf.batch_size_bytes()).unwrap_or(i64::MAX);
        GpuExec::from_host(plan, exprs).with_param(param, ParamValue::Int(bytes))
    }
}

fn tag_identity_projection(ctx: &mut PlanCtx<'_, '_>) {
    let plan = ctx.node();
    let [child] = plan.children.as_slice() else {
        return;
    };
    let column = NodeClass::expression("AttributeReference");
    let identity = plan.expressions.len() == child.output.len()
        && plan
            .expressions
            .iter()
            .zip(&child.output)
            .all(|(expr, attr)| {
                expr.class == column
                    && expr.name.as_deref() == Some(attr.name.as_str())
                    && expr.data_type == attr.data_type
            });
    if identity {
        ctx.mark_no_op();
    }
}

fn tag_filter_condition(ctx: &mut PlanCtx<'_, '_>) {
    match ctx.node().expressions.first() {
        None => ctx.will_not_work_on_gpu("FilterExec has no condition"),
        Some(cond) if cond.data_type != DataType::Boolean => {
            let ty = cond.data_type.to_string();
            ctx.will_not_work_on_gpu(format!("filter condition must be boolean, but is {ty}"));
        }
        Some(_) => {}
    }
}

fn tag_grouping_keys(ctx: &mut PlanCtx<'_, '_>) {
    let plan = ctx.node();
    let grouping = usize::try_from(plan.int_param("num_grouping").unwrap_or(0)).unwrap_or(usize::MAX);
    let Some(keys) = plan.expressions.get(..grouping) else {
        ctx.will_not_work_on_gpu(format!(
            "num_grouping {grouping} exceeds the {} aggregate expressions",
            plan.expressions.len()
        ));
        return;
    };
    for key in keys.iter().filter(|key| !key.data_type.is_hashable()) {
        ctx.will_not_work_on_gpu(format!("grouping on {} is not supported", key.data_type));
    }
}

fn tag_sort_keys(ctx: &mut PlanCtx<'_, '_>) {
    let plan = ctx.node();
    for key in plan.expressions.iter().filter(|key| !key.data_type.is_orderable()) {
        ctx.will_not_work_on_gpu(format!("sorting on {} is not supported", key.data_type));
    }
}

fn tag_limit(ctx: &mut PlanCtx<'_, '_>) {
    match ctx.node().int_param("limit") {
        Some(limit) if limit >= 0 => {}
        _ => ctx.will_not_work_on_gpu("limit must be a non-negative integer"),
    }
}

fn tag_union_arity(ctx: &mut PlanCtx<'_, '_>) {
    let mut widths = ctx.node().children.iter().map(|child| child.output.len());
    if let Some(first) = widths.next() {
        if widths.any(|width| width != first) {
            ctx.will_not_work_on_gpu("union inputs must have the same number of columns");
        }
    }
}

fn tag_shuffle_partitioning(ctx: &mut PlanCtx<'_, '_>) {
    if ctx.node().partitioning.is_none() {
        ctx.will_not_work_on_gpu("ShuffleExchangeExec has no output partitioning");
    }
}

fn tag_hash_join(ctx: &mut PlanCtx<'_, '_>) {
    let plan = ctx.node();
    if !ctx.conf().is_join_enabled() {
        ctx.will_not_work_on_gpu(
            "hash joins have been disabled by configuration; set accel.sql.join.enabled to true to enable",
        );
    }
    let join_type = plan.str_param("join_type").unwrap_or("inner");
    if !SUPPORTED_JOIN_TYPES.contains(&join_type) {
        ctx.will_not_work_on_gpu(format!("{join_type} joins are not supported"));
    }
    let left_keys = usize::try_from(plan.int_param("num_left_keys").unwrap_or(0)).unwrap_or(usize::MAX);
    if left_keys.checked_mul(2) != Some(plan.expressions.len()) {
        ctx.will_not_work_on_gpu(format!(
            "join has {} keys but {left_keys} left keys; left and right key counts must match",
            plan.expressions.len()
        ));
    }
    for key in plan.expressions.iter().filter(|key| !key.data_type.is_hashable()) {
        ctx.will_not_work_on_gpu(format!("joining on {} is not supported", key.data_type));
    }
}

fn tag_broadcast_build_side(ctx: &mut PlanCtx<'_, '_>) {
    let side = match ctx.node().str_param("build_side").unwrap_or("right") {
        "left" => 0,
        _ => 1,
    };
    match ctx.children().get(side) {
        Some(build) if build.short_name() != "BroadcastExchangeExec" => ctx.will_not_work_on_gpu(
            format!("the build side must be a BroadcastExchangeExec, not {}", build.short_name()),
        ),
        Some(build) if !build.can_this_be_replaced() => {
            ctx.will_not_work_on_gpu("the broadcast for this join must be on the GPU too")
        }
        Some(_) => {}
        None => ctx.will_not_work_on_gpu("broadcast join is missing its build side"),
    }
}

fn tag_file_scan(ctx: &mut PlanCtx<'_, '_>) {
    let plan = ctx.node();
    let Some(format) = plan.str_param("format").map(str::to_ascii_lowercase) else {
        ctx.will_not_work_on_gpu("scan has no file format");
        return;
    };
    if !SCAN_FORMATS.contains(&format.as_str()) {
        ctx.will_not_work_on_gpu(format!("{format} files are not supported"));
        return;
    }
    if !ctx.conf().is_format_enabled(&format) {
        ctx.will_not_work_on_gpu(format!(
            "reading {format} files has been disabled by configuration; \
             set accel.sql.format.{format}.enabled to true to enable"
        ));
    }
    if format == "csv" {
        for attr in plan.output.iter().filter(|attr| attr.data_type.is_nested()) {
            ctx.will_not_work_on_gpu(format!(
                "csv does not support column {} of type {}",
                attr.name, attr.data_type
            ));
        }
    }
}
