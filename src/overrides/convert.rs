//! GPU plan representation and the conversion pass.
//!
//! Conversion is a pure function of a tagged [`PlanMeta`]: eligible nodes
//! become GPU operators, ineligible ones stay on the host, and a transition
//! is inserted wherever a producer's data format differs from what its
//! consumer expects. The final root always produces rows.

use std::fmt::{self, Write as _};
use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::config::AccelConf;
use crate::error::{OverrideError, Result};
use crate::host::{Attribute, HostExpr, HostPlan, NodeClass, ParamValue, Params};
use crate::overrides::meta::{ExprMeta, PlanMeta};
use crate::types::{DataType, ScalarValue};

const FINGERPRINT_SEED: u64 = 0x6163_6365_6c70_6c6e;

/// GPU expression node.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GpuExpr {
    /// GPU class name, `Gpu<ShortName>` by default.
    pub name: String,
    /// Result type.
    pub data_type: DataType,
    /// Whether the result may be null.
    pub nullable: bool,
    /// Parameters carried over from the host node.
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
    /// Converted children.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<GpuExpr>,
}

impl GpuExpr {
    /// Default conversion: same type, same parameters, `Gpu` prefix.
    pub fn from_host(host: &HostExpr, children: Vec<GpuExpr>) -> Self {
        let mut params = host.params.clone();
        if let Some(name) = &host.name {
            params.insert("name".to_string(), ParamValue::Str(name.clone()));
        }
        Self {
            name: gpu_name(&host.class),
            data_type: host.data_type.clone(),
            nullable: host.nullable,
            params,
            children,
        }
    }

    /// GPU literal.
    pub fn literal(value: ScalarValue) -> Self {
        let mut params = Params::new();
        let data_type = value.data_type();
        let nullable = value.is_null();
        params.insert("value".to_string(), ParamValue::Scalar(value));
        Self {
            name: "GpuLiteral".to_string(),
            data_type,
            nullable,
            params,
            children: Vec::new(),
        }
    }

    /// Literal payload, when this is a literal.
    pub fn literal_value(&self) -> Option<&ScalarValue> {
        match self.params.get("value") {
            Some(ParamValue::Scalar(value)) if self.name == "GpuLiteral" => Some(value),
            _ => None,
        }
    }

    fn render(&self) -> String {
        if let Some(value) = self.literal_value() {
            return value.to_string();
        }
        if self.name == "GpuAttributeReference" {
            if let Some(ParamValue::Str(name)) = self.params.get("name") {
                return name.clone();
            }
        }
        let args: Vec<String> = self.children.iter().map(GpuExpr::render).collect();
        format!("{}({})", self.name, args.join(", "))
    }

    fn hash_into(&self, hasher: &mut Xxh64) {
        hasher.write(self.name.as_bytes());
        hasher.write(self.data_type.to_string().as_bytes());
        hash_params(&self.params, hasher);
        hasher.write_usize(self.children.len());
        for child in &self.children {
            child.hash_into(hasher);
        }
    }
}

impl fmt::Display for GpuExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// GPU operator produced by an exec rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GpuExec {
    /// GPU operator name, `Gpu<ShortName>` by default.
    pub name: String,
    /// Host class the operator replaces.
    pub replaces: NodeClass,
    /// Output columns.
    pub output: Vec<Attribute>,
    /// Converted expressions, in the host operator's order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exprs: Vec<GpuExpr>,
    /// Converted output partitioning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<GpuExpr>,
    /// Operator parameters.
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl GpuExec {
    /// Default conversion. `exprs` holds the converted expressions followed
    /// by the converted partitioning when the host operator has one.
    pub fn from_host(host: &HostPlan, mut exprs: Vec<GpuExpr>) -> Self {
        let partitioning = if host.partitioning.is_some() {
            exprs.pop()
        } else {
            None
        };
        Self {
            name: gpu_name(&host.class),
            replaces: host.class.clone(),
            output: host.output.clone(),
            exprs,
            partitioning,
            params: host.params.clone(),
        }
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Operator left on the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HostExec {
    /// Host class.
    pub class: NodeClass,
    /// Output columns.
    pub output: Vec<Attribute>,
    /// Expressions evaluated on the host.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<HostExpr>,
    /// Output partitioning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<HostExpr>,
    /// Operator parameters.
    #[serde(skip_serializing_if = "Params::is_empty")]
    pub params: Params,
}

impl From<&HostPlan> for HostExec {
    fn from(plan: &HostPlan) -> Self {
        Self {
            class: plan.class.clone(),
            output: plan.output.clone(),
            expressions: plan.expressions.clone(),
            partitioning: plan.partitioning.clone(),
            params: plan.params.clone(),
        }
    }
}

/// Operator of a converted plan node.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecOp {
    /// Columnar GPU operator.
    Gpu(GpuExec),
    /// Row-based host operator.
    Host(HostExec),
    /// Converts host rows into GPU batches.
    RowToColumnar {
        /// Target batch size in bytes.
        target_batch_bytes: u64,
    },
    /// Converts GPU batches into host rows.
    ColumnarToRow,
}

/// Node of a converted plan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecNode {
    /// Operator at this node.
    pub op: ExecOp,
    /// Input nodes.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ExecNode>,
}

impl ExecNode {
    /// GPU operator node.
    pub fn gpu(exec: GpuExec, inputs: Vec<ExecNode>) -> Self {
        Self {
            op: ExecOp::Gpu(exec),
            inputs,
        }
    }

    /// Host operator node.
    pub fn host(exec: HostExec, inputs: Vec<ExecNode>) -> Self {
        Self {
            op: ExecOp::Host(exec),
            inputs,
        }
    }

    /// Host plan copied without any GPU replacement.
    pub fn host_tree(plan: &HostPlan) -> Self {
        Self::host(
            HostExec::from(plan),
            plan.children.iter().map(Self::host_tree).collect(),
        )
    }

    /// True when the node produces GPU batches.
    pub fn is_columnar(&self) -> bool {
        matches!(self.op, ExecOp::Gpu(_) | ExecOp::RowToColumnar { .. })
    }

    /// Makes the output columnar, inserting a row-to-columnar transition.
    pub fn into_columnar(self, target_batch_bytes: u64) -> Self {
        if self.is_columnar() {
            self
        } else {
            Self {
                op: ExecOp::RowToColumnar { target_batch_bytes },
                inputs: vec![self],
            }
        }
    }

    /// Makes the output row-based, inserting a columnar-to-row transition.
    pub fn into_rows(self) -> Self {
        if self.is_columnar() {
            Self {
                op: ExecOp::ColumnarToRow,
                inputs: vec![self],
            }
        } else {
            self
        }
    }

    /// Operator label used in renderings.
    pub fn label(&self) -> String {
        match &self.op {
            ExecOp::Gpu(exec) => exec.name.clone(),
            ExecOp::Host(exec) => exec.class.short_name().to_string(),
            ExecOp::RowToColumnar { .. } => "RowToColumnar".to_string(),
            ExecOp::ColumnarToRow => "ColumnarToRow".to_string(),
        }
    }

    /// Indented text tree, one node per line.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        self.render_into(0, &mut out);
        out
    }

    fn render_into(&self, depth: usize, out: &mut String) {
        let _ = write!(out, "{}{}", "  ".repeat(depth), self.label());
        match &self.op {
            ExecOp::Gpu(exec) if !exec.exprs.is_empty() || exec.partitioning.is_some() => {
                let exprs: Vec<String> = exec
                    .exprs
                    .iter()
                    .chain(exec.partitioning.iter())
                    .map(GpuExpr::to_string)
                    .collect();
                let _ = write!(out, " [{}]", exprs.join(", "));
            }
            ExecOp::Host(exec) if !exec.expressions.is_empty() => {
                let exprs: Vec<String> = exec.expressions.iter().map(HostExpr::sql).collect();
                let _ = write!(out, " [{}]", exprs.join(", "));
            }
            ExecOp::RowToColumnar { target_batch_bytes } => {
                let _ = write!(out, " target={target_batch_bytes}");
            }
            _ => {}
        }
        out.push('\n');
        for input in &self.inputs {
            input.render_into(depth + 1, out);
        }
    }

    fn hash_into(&self, hasher: &mut Xxh64) {
        match &self.op {
            ExecOp::Gpu(exec) => {
                hasher.write_u8(1);
                hasher.write(exec.name.as_bytes());
                for expr in exec.exprs.iter().chain(exec.partitioning.iter()) {
                    expr.hash_into(hasher);
                }
                hash_params(&exec.params, hasher);
            }
            ExecOp::Host(exec) => {
                hasher.write_u8(2);
                hasher.write(exec.class.as_str().as_bytes());
                for expr in exec.expressions.iter().chain(exec.partitioning.iter()) {
                    hasher.write(expr.sql().as_bytes());
                }
                hash_params(&exec.params, hasher);
            }
            ExecOp::RowToColumnar { target_batch_bytes } => {
                hasher.write_u8(3);
                hasher.write_u64(*target_batch_bytes);
            }
            ExecOp::ColumnarToRow => hasher.write_u8(4),
        }
        hasher.write_usize(self.inputs.len());
        for input in &self.inputs {
            input.hash_into(hasher);
        }
    }

    fn accumulate(&self, stats: &mut ConversionStats) {
        match self.op {
            ExecOp::Gpu(_) => stats.gpu_nodes += 1,
            ExecOp::Host(_) => stats.host_nodes += 1,
            ExecOp::RowToColumnar { .. } | ExecOp::ColumnarToRow => stats.transitions += 1,
        }
        for input in &self.inputs {
            input.accumulate(stats);
        }
    }
}

fn hash_params(params: &Params, hasher: &mut Xxh64) {
    for (key, value) in params {
        hasher.write(key.as_bytes());
        hasher.write(value.to_string().as_bytes());
    }
}

fn gpu_name(class: &NodeClass) -> String {
    format!("Gpu{}", class.short_name())
}

/// Node counts of a converted plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    /// GPU operators.
    pub gpu_nodes: usize,
    /// Host operators.
    pub host_nodes: usize,
    /// Inserted transitions.
    pub transitions: usize,
}

/// Result of the override pass.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConvertedPlan {
    /// Root node; always produces rows.
    pub root: ExecNode,
    /// Stable hash of the plan shape.
    pub fingerprint: u64,
    /// Node counts.
    pub stats: ConversionStats,
}

impl ConvertedPlan {
    /// Finalizes a converted tree, adding the trailing row transition.
    pub fn new(root: ExecNode) -> Self {
        let root = root.into_rows();
        let mut hasher = Xxh64::new(FINGERPRINT_SEED);
        root.hash_into(&mut hasher);
        let mut stats = ConversionStats::default();
        root.accumulate(&mut stats);
        Self {
            root,
            fingerprint: hasher.finish(),
            stats,
        }
    }

    /// Plan left entirely on the host.
    pub fn host_only(plan: &HostPlan) -> Self {
        Self::new(ExecNode::host_tree(plan))
    }

    /// True when any operator runs on the GPU.
    pub fn uses_gpu(&self) -> bool {
        self.stats.gpu_nodes > 0
    }
}

impl<'a> ExprMeta<'a> {
    /// Converts an eligible expression tree.
    ///
    /// Fails with [`OverrideError::ConversionInvariant`] when any node in the
    /// tree was tagged ineligible.
    pub fn convert_to_gpu(&self, conf: &AccelConf) -> Result<GpuExpr> {
        if let Some(done) = self.converted() {
            return Ok(done.clone());
        }
        let rule = self.ensure_eligible()?;
        let children = self
            .children()
            .iter()
            .map(|child| child.convert_to_gpu(conf))
            .collect::<Result<Vec<_>>>()?;
        let gpu = if self.is_no_op() {
            children.into_iter().next().ok_or_else(|| {
                OverrideError::InvalidPlan(format!(
                    "{} was marked as a no-op but has no child",
                    self.short_name()
                ))
            })?
        } else {
            rule.convert_node(self.wrapped(), conf, children)
        };
        self.cache_converted(&gpu);
        Ok(gpu)
    }
}

impl<'a> PlanMeta<'a> {
    /// Converts an eligible operator; inputs are converted as needed.
    pub fn convert_to_gpu(&self, conf: &AccelConf) -> Result<ExecNode> {
        let rule = self.ensure_eligible()?;
        if self.is_no_op() {
            let child = self.children().first().ok_or_else(|| {
                OverrideError::InvalidPlan(format!(
                    "{} was marked as a no-op but has no input",
                    self.short_name()
                ))
            })?;
            return child.convert_if_needed(conf);
        }
        let exprs = self
            .exprs()
            .iter()
            .map(|expr| expr.convert_to_gpu(conf))
            .collect::<Result<Vec<_>>>()?;
        let exec = match self.converted() {
            Some(done) => done.clone(),
            None => {
                let exec = rule.convert_node(self.wrapped(), conf, exprs);
                self.cache_converted(&exec);
                exec
            }
        };
        let batch = conf.batch_size_bytes();
        let inputs = self
            .children()
            .iter()
            .map(|child| child.convert_if_needed(conf).map(|node| node.into_columnar(batch)))
            .collect::<Result<Vec<_>>>()?;
        Ok(ExecNode::gpu(exec, inputs))
    }

    /// Converts eligible operators and keeps the rest on the host.
    pub fn convert_if_needed(&self, conf: &AccelConf) -> Result<ExecNode> {
        if self.can_this_be_replaced() {
            return self.convert_to_gpu(conf);
        }
        let inputs = self
            .children()
            .iter()
            .map(|child| child.convert_if_needed(conf).map(ExecNode::into_rows))
            .collect::<Result<Vec<_>>>()?;
        Ok(ExecNode::host(HostExec::from(self.wrapped()), inputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overrides::rule::{Registry, Rule};
    use crate::types::{ScalarValue, TypeSig};

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_expr(Rule::expression("Literal", "literal"));
        registry.register_expr(Rule::expression("AttributeReference", "column"));
        registry.register_exec(Rule::exec("ProjectExec", "projection").output(TypeSig::COMMON));
        registry.register_exec(Rule::exec("FilterExec", "filter"));
        registry
    }

    fn scan() -> HostPlan {
        HostPlan::new("ScanExec").with_output(vec![Attribute::new("a", DataType::Int)])
    }

    #[test]
    fn gpu_root_gets_row_transition_and_host_input_gets_columnar_transition() {
        let registry = registry();
        let plan = HostPlan::new("ProjectExec")
            .with_output(vec![Attribute::new("a", DataType::Int)])
            .with_exprs(vec![HostExpr::column("a", DataType::Int)])
            .with_child(scan());
        let mut meta = PlanMeta::wrap(&plan, &registry);
        let conf = AccelConf::default();
        meta.tag_for_gpu(&conf);
        let converted = ConvertedPlan::new(meta.convert_if_needed(&conf).expect("convert"));
        let root = &converted.root;
        assert_eq!(root.op, ExecOp::ColumnarToRow);
        assert_eq!(root.inputs[0].label(), "GpuProjectExec");
        assert!(matches!(
            root.inputs[0].inputs[0].op,
            ExecOp::RowToColumnar { .. }
        ));
        assert_eq!(root.inputs[0].inputs[0].inputs[0].label(), "ScanExec");
        assert_eq!(
            converted.stats,
            ConversionStats {
                gpu_nodes: 1,
                host_nodes: 1,
                transitions: 2
            }
        );
    }

    #[test]
    fn adjacent_gpu_nodes_need_no_transition() {
        let registry = registry();
        let filter = HostPlan::new("FilterExec").with_child(HostPlan::new("ProjectExec"));
        let mut meta = PlanMeta::wrap(&filter, &registry);
        let conf = AccelConf::default();
        meta.tag_for_gpu(&conf);
        let node = meta.convert_to_gpu(&conf).expect("convert");
        assert_eq!(node.label(), "GpuFilterExec");
        assert_eq!(node.inputs[0].label(), "GpuProjectExec");
    }

    #[test]
    fn converting_ineligible_node_is_an_error() {
        let registry = registry();
        let plan = scan();
        let mut meta = PlanMeta::wrap(&plan, &registry);
        let conf = AccelConf::default();
        meta.tag_for_gpu(&conf);
        let err = meta.convert_to_gpu(&conf).unwrap_err();
        assert_eq!(err.code(), "ConversionInvariant");
        let host = meta.convert_if_needed(&conf).expect("host fallback");
        assert_eq!(host.label(), "ScanExec");
    }

    #[test]
    fn expression_conversion_is_cached() {
        let registry = registry();
        let expr = HostExpr::literal(ScalarValue::Long(7));
        let mut meta = ExprMeta::wrap(&expr, &registry);
        let conf = AccelConf::default();
        meta.tag_for_gpu(&conf);
        assert!(meta.converted().is_none());
        let gpu = meta.convert_to_gpu(&conf).expect("convert");
        assert_eq!(gpu.to_string(), "7L");
        assert_eq!(meta.converted(), Some(&gpu));
    }

    #[test]
    fn fingerprint_tracks_shape() {
        let a = ConvertedPlan::host_only(&scan());
        let b = ConvertedPlan::host_only(&scan());
        let c = ConvertedPlan::host_only(&HostPlan::new("OtherExec"));
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
        assert!(!a.uses_gpu());
    }
}
