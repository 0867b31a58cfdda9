//! Per-node tagging metadata mirroring a host tree.
//!
//! A [`Meta`] borrows the host node it wraps and the rule that matched it.
//! Tagging runs bottom-up: children and owned expressions are tagged before
//! their parent, so a parent check may read its dependencies' outcomes.
//! Reasons only accumulate; nothing ever makes a node eligible again.

use std::cell::OnceCell;

use smallvec::SmallVec;

use crate::config::AccelConf;
use crate::error::{OverrideError, Result};
use crate::host::{HostExpr, HostNode, HostPlan};
use crate::overrides::rule::{Convertible, Registry, Rule, RuleKind};

/// Tagging metadata for expression and partitioning nodes.
pub type ExprMeta<'a> = Meta<'a, HostExpr>;
/// Tagging metadata for operator and scan nodes.
pub type PlanMeta<'a> = Meta<'a, HostPlan>;

/// Decision record for one host node.
#[derive(Debug)]
pub struct Meta<'a, N: Convertible> {
    wrapped: &'a N,
    rule: Option<&'a Rule<N>>,
    kind: RuleKind,
    parent: Option<&'a N>,
    owner: Option<&'a HostPlan>,
    children: Vec<Meta<'a, N>>,
    exprs: Vec<ExprMeta<'a>>,
    reasons: SmallVec<[String; 2]>,
    no_op: bool,
    converted: OnceCell<N::Op>,
}

impl<'a, N: Convertible> Meta<'a, N> {
    /// The wrapped host node.
    pub fn wrapped(&self) -> &'a N {
        self.wrapped
    }

    /// Matching rule, if one was registered.
    pub fn rule(&self) -> Option<&'a Rule<N>> {
        self.rule
    }

    /// Category of the node.
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Host parent of the same tree type, if any.
    pub fn parent(&self) -> Option<&'a N> {
        self.parent
    }

    /// Operator owning this expression tree, if any.
    pub fn owner(&self) -> Option<&'a HostPlan> {
        self.owner
    }

    /// Metas of child nodes of the same tree type.
    pub fn children(&self) -> &[Meta<'a, N>] {
        &self.children
    }

    /// Metas of expressions the node evaluates.
    pub fn exprs(&self) -> &[ExprMeta<'a>] {
        &self.exprs
    }

    /// Reasons the node cannot run on the GPU, in insertion order.
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }

    /// Short class name of the wrapped node.
    pub fn short_name(&self) -> &'a str {
        self.wrapped.class().short_name()
    }

    /// True when no reasons have been recorded.
    pub fn can_this_be_replaced(&self) -> bool {
        self.reasons.is_empty()
    }

    /// True when conversion elides this node.
    pub fn is_no_op(&self) -> bool {
        self.no_op
    }

    /// Records a reason the node cannot run on the GPU.
    pub fn will_not_work_on_gpu(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// Cached result of a successful conversion.
    pub fn converted(&self) -> Option<&N::Op> {
        self.converted.get()
    }

    pub(crate) fn cache_converted(&self, op: &N::Op) {
        let _ = self.converted.set(op.clone());
    }

    /// Tags every node in the tree, dependencies first.
    pub fn tag_for_gpu(&mut self, conf: &AccelConf) {
        for child in &mut self.children {
            child.tag_for_gpu(conf);
        }
        for expr in &mut self.exprs {
            expr.tag_for_gpu(conf);
        }
        self.tag_self(conf);
    }

    fn tag_self(&mut self, conf: &AccelConf) {
        let Some(rule) = self.rule else {
            let reason = format!(
                "no GPU implementation of {} {} could be found",
                self.kind.label().to_ascii_lowercase(),
                self.short_name()
            );
            self.will_not_work_on_gpu(reason);
            return;
        };
        if !rule.is_enabled(conf) {
            self.will_not_work_on_gpu(rule.disabled_reason());
        }
        for reason in rule.type_reasons(self.wrapped) {
            self.will_not_work_on_gpu(reason);
        }
        if let Some(tag) = rule.tag_fn() {
            let mut ctx = TagContext {
                node: self.wrapped,
                parent: self.parent,
                owner: self.owner,
                conf,
                children: &self.children,
                exprs: &self.exprs,
                reasons: &mut self.reasons,
                no_op: &mut self.no_op,
            };
            tag(&mut ctx);
        }
        if let Some(reason) = N::dependency_reason(self) {
            self.will_not_work_on_gpu(reason);
        }
    }

    /// Fails with the recorded reasons when the node is ineligible.
    pub fn ensure_eligible(&self) -> Result<&'a Rule<N>> {
        match self.rule {
            Some(rule) if self.can_this_be_replaced() => Ok(rule),
            _ => Err(OverrideError::ConversionInvariant {
                node: self.short_name().to_string(),
                reasons: self.reasons.to_vec(),
            }),
        }
    }

    /// Visits this meta and its descendants of the same type, pre-order.
    pub fn walk<'s>(&'s self, visit: &mut dyn FnMut(&'s Meta<'a, N>)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Counts (eligible, total) over this tree, expressions included.
    pub fn eligibility_counts(&self) -> (usize, usize) {
        let mut eligible = usize::from(self.can_this_be_replaced());
        let mut total = 1;
        for expr in &self.exprs {
            let (e, t) = expr.eligibility_counts();
            eligible += e;
            total += t;
        }
        for child in &self.children {
            let (e, t) = child.eligibility_counts();
            eligible += e;
            total += t;
        }
        (eligible, total)
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Meta<'a, N>] {
        &mut self.children
    }
}

impl<'a> ExprMeta<'a> {
    /// Wraps a standalone expression tree.
    pub fn wrap(expr: &'a HostExpr, registry: &'a Registry) -> Self {
        Self::wrap_expr(expr, None, None, RuleKind::Expression, registry)
    }

    fn wrap_expr(
        expr: &'a HostExpr,
        parent: Option<&'a HostExpr>,
        owner: Option<&'a HostPlan>,
        default_kind: RuleKind,
        registry: &'a Registry,
    ) -> Self {
        let rule = registry.exprs.lookup(&expr.class);
        let children = expr
            .children
            .iter()
            .map(|child| {
                Self::wrap_expr(child, Some(expr), owner, RuleKind::Expression, registry)
            })
            .collect();
        Meta {
            wrapped: expr,
            rule,
            kind: rule.map_or(default_kind, Rule::kind),
            parent,
            owner,
            children,
            exprs: Vec::new(),
            reasons: SmallVec::new(),
            no_op: false,
            converted: OnceCell::new(),
        }
    }
}

impl<'a> PlanMeta<'a> {
    /// Wraps a host plan, its expressions and its inputs.
    pub fn wrap(plan: &'a HostPlan, registry: &'a Registry) -> Self {
        Self::wrap_plan(plan, None, registry)
    }

    fn wrap_plan(plan: &'a HostPlan, parent: Option<&'a HostPlan>, registry: &'a Registry) -> Self {
        let rule = registry.execs.lookup(&plan.class);
        let exprs = plan
            .expressions
            .iter()
            .map(|expr| ExprMeta::wrap_expr(expr, None, Some(plan), RuleKind::Expression, registry))
            .chain(plan.partitioning.iter().map(|part| {
                ExprMeta::wrap_expr(part, None, Some(plan), RuleKind::Partitioning, registry)
            }))
            .collect();
        let children = plan
            .children
            .iter()
            .map(|child| Self::wrap_plan(child, Some(plan), registry))
            .collect();
        Meta {
            wrapped: plan,
            rule,
            kind: rule.map_or(RuleKind::Exec, Rule::kind),
            parent,
            owner: None,
            children,
            exprs,
            reasons: SmallVec::new(),
            no_op: false,
            converted: OnceCell::new(),
        }
    }

    /// True when the operator is an exchange.
    pub fn is_exchange(&self) -> bool {
        self.rule.is_some_and(Rule::is_exchange)
    }
}

/// View handed to a rule's tag function.
///
/// Dependencies are read-only; the node's own reasons and no-op flag are the
/// only writable state.
pub struct TagContext<'m, 'a, N: Convertible> {
    node: &'a N,
    parent: Option<&'a N>,
    owner: Option<&'a HostPlan>,
    conf: &'m AccelConf,
    children: &'m [Meta<'a, N>],
    exprs: &'m [ExprMeta<'a>],
    reasons: &'m mut SmallVec<[String; 2]>,
    no_op: &'m mut bool,
}

impl<'m, 'a, N: Convertible> TagContext<'m, 'a, N> {
    /// Node being tagged.
    pub fn node(&self) -> &'a N {
        self.node
    }

    /// Host parent of the same tree type.
    pub fn parent(&self) -> Option<&'a N> {
        self.parent
    }

    /// Operator owning the expression being tagged.
    pub fn owner(&self) -> Option<&'a HostPlan> {
        self.owner
    }

    /// Effective configuration.
    pub fn conf(&self) -> &'m AccelConf {
        self.conf
    }

    /// Already-tagged child metas.
    pub fn children(&self) -> &'m [Meta<'a, N>] {
        self.children
    }

    /// Already-tagged expression metas.
    pub fn exprs(&self) -> &'m [ExprMeta<'a>] {
        self.exprs
    }

    /// Records a reason the node cannot run on the GPU.
    pub fn will_not_work_on_gpu(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }

    /// Marks the node for elision during conversion.
    pub fn mark_no_op(&mut self) {
        *self.no_op = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, ScalarValue, TypeSig};

    fn lit(v: i32) -> HostExpr {
        HostExpr::literal(ScalarValue::Int(v))
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register_expr(
            Rule::expression("Literal", "literal").output(TypeSig::COMMON),
        );
        registry.register_expr(
            Rule::expression("Add", "addition")
                .inputs(TypeSig::NUMERIC)
                .output(TypeSig::NUMERIC),
        );
        registry
    }

    #[test]
    fn eligible_tree_has_no_reasons() {
        let registry = registry();
        let expr = HostExpr::call("Add", DataType::Int, vec![lit(1), lit(2)]);
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.tag_for_gpu(&AccelConf::default());
        assert!(meta.can_this_be_replaced());
        assert!(meta.children().iter().all(Meta::can_this_be_replaced));
        assert_eq!(meta.children()[0].parent(), Some(&expr));
    }

    #[test]
    fn missing_rule_has_single_reason() {
        let registry = registry();
        let expr = HostExpr::call(
            "Mystery",
            DataType::Int,
            vec![HostExpr::call("Mystery", DataType::Int, vec![])],
        );
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.tag_for_gpu(&AccelConf::default());
        assert_eq!(
            meta.reasons(),
            ["no GPU implementation of expression Mystery could be found"]
        );
    }

    #[test]
    fn ineligible_child_poisons_parent() {
        let registry = registry();
        let expr = HostExpr::call(
            "Add",
            DataType::Int,
            vec![lit(1), HostExpr::call("Mystery", DataType::Int, vec![])],
        );
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.tag_for_gpu(&AccelConf::default());
        assert!(!meta.can_this_be_replaced());
        assert!(meta
            .reasons()
            .contains(&"not all child expressions can run on GPU: Mystery".to_string()));
    }

    #[test]
    fn type_signature_rejects_unsupported_output() {
        let registry = registry();
        let expr = HostExpr::call(
            "Add",
            DataType::String,
            vec![lit(1), lit(2)],
        );
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.tag_for_gpu(&AccelConf::default());
        assert_eq!(meta.reasons(), ["Add output type string is not supported"]);
    }

    #[test]
    fn ensure_eligible_reports_reasons() {
        let registry = registry();
        let expr = HostExpr::call("Mystery", DataType::Int, vec![]);
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.tag_for_gpu(&AccelConf::default());
        let err = meta.ensure_eligible().unwrap_err();
        assert_eq!(err.code(), "ConversionInvariant");
        assert!(err.to_string().contains("Mystery"));
    }

    #[test]
    fn reasons_keep_insertion_order() {
        let registry = registry();
        let expr = lit(1);
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.will_not_work_on_gpu("y");
        meta.will_not_work_on_gpu("x");
        meta.will_not_work_on_gpu("y");
        assert_eq!(meta.reasons(), ["y", "x", "y"]);
    }
}
