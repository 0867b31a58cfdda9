use tracing::debug;

use crate::config::AccelConf;
use crate::host::HostExpr;
use crate::overrides::convert::GpuExpr;
use crate::overrides::meta::TagContext;
use crate::overrides::rule::{Rule, RuleRegistry};
use crate::types::{cast_scalar, DataType, TypeSig};

type ExprCtx<'m, 'a> = TagContext<'m, 'a, HostExpr>;

pub(super) fn register(registry: &mut RuleRegistry<HostExpr>) {
    let common = TypeSig::COMMON;
    let with_nested = TypeSig::COMMON | TypeSig::NESTED;
    let numeric = TypeSig::NUMERIC;
    let boolean = TypeSig::BOOLEAN;

    let rules = [
        Rule::expression("Literal", "Holds a static value from the query").output(common),
        Rule::expression("AttributeReference", "References an input column").output(with_nested),
        Rule::expression("Alias", "Gives a column a name")
            .inputs(with_nested)
            .output(with_nested),
        Rule::expression("Add", "Addition").inputs(numeric).output(numeric),
        Rule::expression("Subtract", "Subtraction").inputs(numeric).output(numeric),
        Rule::expression("Multiply", "Multiplication").inputs(numeric).output(numeric),
        Rule::expression("Divide", "Division")
            .inputs(numeric)
            .output(numeric)
            .tag_with(tag_ansi_division),
        Rule::expression("Remainder", "Remainder or modulo")
            .inputs(numeric)
            .output(numeric)
            .tag_with(tag_ansi_division),
        Rule::expression("UnaryMinus", "Negate a numeric value")
            .inputs(numeric)
            .output(numeric)
            .tag_with(tag_ansi_integral_overflow),
        Rule::expression("Abs", "Absolute value")
            .inputs(numeric)
            .output(numeric)
            .tag_with(tag_ansi_integral_overflow),
        Rule::expression("EqualTo", "Check if the values are equal")
            .inputs(common)
            .output(boolean),
        Rule::expression("LessThan", "< operator").inputs(common).output(boolean),
        Rule::expression("LessThanOrEqual", "<= operator")
            .inputs(common)
            .output(boolean),
        Rule::expression("GreaterThan", "> operator").inputs(common).output(boolean),
        Rule::expression("GreaterThanOrEqual", ">= operator")
            .inputs(common)
            .output(boolean),
        Rule::expression("And", "Logical AND").inputs(boolean).output(boolean),
        Rule::expression("Or", "Logical OR").inputs(boolean).output(boolean),
        Rule::expression("Not", "Boolean not operator").inputs(boolean).output(boolean),
        Rule::expression("IsNull", "Checks if a value is null")
            .inputs(with_nested)
            .output(boolean),
        Rule::expression("IsNotNull", "Checks if a value is not null")
            .inputs(with_nested)
            .output(boolean),
        Rule::expression("Coalesce", "Returns the first non-null argument if exists")
            .inputs(common)
            .output(common),
        Rule::expression("If", "IF expression").inputs(common).output(common),
        Rule::expression("Cast", "Convert a column of one type of data into another type")
            .inputs(common)
            .output(common)
            .tag_with(tag_cast)
            .convert_with(convert_cast),
        Rule::expression("Upper", "String uppercase operator")
            .inputs(TypeSig::STRING)
            .output(TypeSig::STRING)
            .incompat(CASE_CHANGE_INCOMPAT),
        Rule::expression("Lower", "String lowercase operator")
            .inputs(TypeSig::STRING)
            .output(TypeSig::STRING)
            .incompat(CASE_CHANGE_INCOMPAT),
        Rule::expression("Substring", "Substring operator")
            .inputs(TypeSig::STRING | TypeSig::INTEGRAL)
            .output(TypeSig::STRING),
        Rule::expression("Length", "String character length")
            .inputs(TypeSig::STRING)
            .output(TypeSig::INTEGRAL),
        Rule::expression("Sqrt", "Square root")
            .inputs(TypeSig::FP)
            .output(TypeSig::FP),
        Rule::expression("Hour", "Returns the hour component of the string/timestamp")
            .inputs(TypeSig::TIMESTAMP)
            .output(TypeSig::INTEGRAL)
            .tag_with(tag_requires_utc),
        Rule::expression("DateAdd", "Returns the date that is num_days after start_date")
            .inputs(TypeSig::DATE | TypeSig::INTEGRAL)
            .output(TypeSig::DATE),
        Rule::expression("SortOrder", "Sort order")
            .inputs(common)
            .output(common),
        Rule::expression("AggregateExpression", "Aggregate expression")
            .inputs(common)
            .output(common)
            .tag_with(tag_aggregate_owner),
        Rule::expression("Count", "Count aggregate operator")
            .inputs(with_nested)
            .output(TypeSig::INTEGRAL),
        Rule::expression("Sum", "Sum aggregate operator")
            .inputs(numeric)
            .output(numeric)
            .tag_with(|ctx: &mut ExprCtx<'_, '_>| {
                tag_variable_float_agg(ctx);
                tag_ansi_integral_agg(ctx);
            }),
        Rule::expression("Min", "Min aggregate operator")
            .inputs(common)
            .output(common)
            .tag_with(tag_nans),
        Rule::expression("Max", "Max aggregate operator")
            .inputs(common)
            .output(common)
            .tag_with(tag_nans),
        Rule::expression("Average", "Average aggregate operator")
            .inputs(numeric)
            .output(numeric)
            .tag_with(|ctx: &mut ExprCtx<'_, '_>| {
                tag_variable_float_agg(ctx);
                tag_ansi_integral_agg(ctx);
            }),
        Rule::partitioning("HashPartitioning", "Hash based partitioning")
            .inputs(with_nested)
            .tag_with(tag_hashable_keys),
        Rule::partitioning("RangePartitioning", "Range partitioning").inputs(common),
        Rule::partitioning("SinglePartition", "Single partitioning"),
        Rule::partitioning("RoundRobinPartitioning", "Round robin partitioning"),
    ];
    for rule in rules {
        registry.register(rule);
    }
}

const CASE_CHANGE_INCOMPAT: &str =
    "in some cases unicode characters change byte width when changing the case";

fn first_input(ctx: &ExprCtx<'_, '_>) -> Option<DataType> {
    ctx.node().children.first().map(|child| child.data_type.clone())
}

fn tag_ansi_division(ctx: &mut ExprCtx<'_, '_>) {
    if ctx.conf().is_ansi_enabled() {
        let short = ctx.node().class.short_name();
        ctx.will_not_work_on_gpu(format!(
            "{short} cannot raise division by zero errors under ANSI mode"
        ));
    }
}

fn tag_ansi_integral_overflow(ctx: &mut ExprCtx<'_, '_>) {
    if ctx.conf().is_ansi_enabled() && ctx.node().data_type.is_integral() {
        let short = ctx.node().class.short_name();
        ctx.will_not_work_on_gpu(format!(
            "{short} on integral types cannot detect overflow under ANSI mode"
        ));
    }
}

fn tag_requires_utc(ctx: &mut ExprCtx<'_, '_>) {
    if !ctx.conf().is_utc() {
        let zone = ctx.conf().session_time_zone().to_string();
        ctx.will_not_work_on_gpu(format!(
            "only UTC is supported for time zone aware expressions, but the session time zone is {zone}"
        ));
    }
}

fn tag_cast(ctx: &mut ExprCtx<'_, '_>) {
    let Some(from) = first_input(ctx) else {
        ctx.will_not_work_on_gpu("Cast requires exactly one input");
        return;
    };
    let to = ctx.node().data_type.clone();
    if from == to {
        ctx.mark_no_op();
        return;
    }
    let conf = ctx.conf();
    if from.is_floating() && to == DataType::String && !conf.is_cast_float_to_string_enabled() {
        ctx.will_not_work_on_gpu(format!(
            "casting {from} to string can produce different results than the host; \
             set accel.sql.castFloatToString.enabled to true to enable"
        ));
    }
    if from == DataType::String && to.is_floating() && !conf.is_cast_string_to_float_enabled() {
        ctx.will_not_work_on_gpu(format!(
            "casting string to {to} can produce different results than the host; \
             set accel.sql.castStringToFloat.enabled to true to enable"
        ));
    }
    if conf.is_ansi_enabled()
        && (from == DataType::String || from.is_floating())
        && to.is_integral()
    {
        ctx.will_not_work_on_gpu(format!(
            "casting {from} to {to} cannot detect overflow under ANSI mode"
        ));
    }
    if from == DataType::String && matches!(to, DataType::Date | DataType::Timestamp) {
        ctx.will_not_work_on_gpu(format!("casting string to {to} is not supported"));
    }
    if from.is_zoned() || to.is_zoned() {
        tag_requires_utc(ctx);
    }
}

/// Folds casts of literals; anything that cannot be folded stays a GPU cast
/// so failures surface at execution time.
fn convert_cast(host: &HostExpr, conf: &AccelConf, children: Vec<GpuExpr>) -> GpuExpr {
    if let Some(value) = children.first().and_then(GpuExpr::literal_value) {
        match cast_scalar(value, &host.data_type, conf.is_ansi_enabled()) {
            Ok(folded) => return GpuExpr::literal(folded),
            Err(err) => debug!(error = %err, "overrides.cast.not_folded"),
        }
    }
    GpuExpr::from_host(host, children)
}

fn tag_aggregate_owner(ctx: &mut ExprCtx<'_, '_>) {
    if let Some(owner) = ctx.owner() {
        let short = owner.class.short_name();
        if short != "HashAggregateExec" {
            ctx.will_not_work_on_gpu(format!(
                "aggregate expressions are only supported in HashAggregateExec, not {short}"
            ));
        }
    }
}

fn tag_variable_float_agg(ctx: &mut ExprCtx<'_, '_>) {
    let floating = first_input(ctx).is_some_and(|ty| ty.is_floating());
    if floating && !ctx.conf().is_variable_float_agg_enabled() {
        let short = ctx.node().class.short_name();
        ctx.will_not_work_on_gpu(format!(
            "{short} over floating point input can produce different results \
             depending on the order of aggregation; set \
             accel.sql.variableFloatAgg.enabled to true to enable"
        ));
    }
}

fn tag_ansi_integral_agg(ctx: &mut ExprCtx<'_, '_>) {
    let integral = first_input(ctx).is_some_and(|ty| ty.is_integral());
    if integral && ctx.conf().is_ansi_enabled() {
        let short = ctx.node().class.short_name();
        ctx.will_not_work_on_gpu(format!(
            "{short} over integral input cannot detect overflow under ANSI mode"
        ));
    }
}

fn tag_nans(ctx: &mut ExprCtx<'_, '_>) {
    let floating = first_input(ctx).is_some_and(|ty| ty.is_floating());
    if floating && ctx.conf().has_nans() {
        let short = ctx.node().class.short_name();
        ctx.will_not_work_on_gpu(format!(
            "{short} over floating point input does not order NaN like the host; \
             set accel.sql.hasNans to false if the data contains no NaN"
        ));
    }
}

fn tag_hashable_keys(ctx: &mut ExprCtx<'_, '_>) {
    let unhashable: Vec<String> = ctx
        .node()
        .children
        .iter()
        .filter(|key| !key.data_type.is_hashable())
        .map(|key| key.data_type.to_string())
        .collect();
    for ty in unhashable {
        ctx.will_not_work_on_gpu(format!("hashing {ty} is not supported"));
    }
}
