//! Rules and the capability registry.

use std::fmt::{self, Write as _};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;
use tracing::warn;

use crate::config::AccelConf;
use crate::error::{OverrideError, Result};
use crate::host::{HostExpr, HostNode, HostPlan, NodeClass};
use crate::overrides::convert::{GpuExec, GpuExpr};
use crate::overrides::meta::{Meta, TagContext};
use crate::types::{DataType, TypeSig};

/// Category of host node a rule replaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RuleKind {
    /// Scalar or aggregate expression.
    Expression,
    /// Physical operator.
    Exec,
    /// Data source scan.
    Scan,
    /// Exchange output partitioning.
    Partitioning,
}

impl RuleKind {
    /// Segment used in per-rule configuration keys.
    pub fn config_segment(self) -> &'static str {
        match self {
            RuleKind::Expression => "expression",
            RuleKind::Exec => "exec",
            RuleKind::Scan => "input",
            RuleKind::Partitioning => "partitioning",
        }
    }

    /// Label used in reasons and explain output.
    pub fn label(self) -> &'static str {
        match self {
            RuleKind::Expression => "Expression",
            RuleKind::Exec => "Exec",
            RuleKind::Scan => "Scan",
            RuleKind::Partitioning => "Partitioning",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Host tree types that rules can replace.
pub trait Convertible: HostNode + Sized + 'static {
    /// What a rule's converter produces for one node.
    type Op: Clone + fmt::Debug + Send + Sync;

    /// Converter used when a rule does not supply one.
    fn default_convert(node: &Self, exprs: Vec<GpuExpr>) -> Self::Op;

    /// Types the node produces, checked against a rule's output signature.
    fn output_types(&self) -> Vec<&DataType>;

    /// Types the node consumes, checked against a rule's input signature.
    fn input_types(&self) -> Vec<&DataType>;

    /// Parent policy over already-tagged dependencies; returns a reason
    /// when the node cannot run because of them.
    fn dependency_reason(meta: &Meta<'_, Self>) -> Option<String>;
}

/// Node-specific eligibility check.
pub type TagFn<N> = Arc<dyn for<'m, 'a> Fn(&mut TagContext<'m, 'a, N>) + Send + Sync>;

/// Node-specific converter.
pub type ConvertFn<N> =
    Arc<dyn Fn(&N, &AccelConf, Vec<GpuExpr>) -> <N as Convertible>::Op + Send + Sync>;

/// Immutable descriptor of one GPU replacement.
pub struct Rule<N: Convertible> {
    class: NodeClass,
    kind: RuleKind,
    description: String,
    incompat: Option<String>,
    disabled: Option<String>,
    input_sig: Option<TypeSig>,
    output_sig: Option<TypeSig>,
    exchange: bool,
    tag: Option<TagFn<N>>,
    convert: Option<ConvertFn<N>>,
}

impl<N: Convertible> fmt::Debug for Rule<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("class", &self.class)
            .field("kind", &self.kind)
            .field("incompat", &self.incompat)
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

impl Rule<HostExpr> {
    /// Rule for an expression class (short names resolve to built-in classes).
    pub fn expression(class: &str, description: impl Into<String>) -> Self {
        Self::with_kind(NodeClass::expression(class), RuleKind::Expression, description)
    }

    /// Rule for a partitioning class.
    pub fn partitioning(class: &str, description: impl Into<String>) -> Self {
        Self::with_kind(NodeClass::expression(class), RuleKind::Partitioning, description)
    }
}

impl Rule<HostPlan> {
    /// Rule for an operator class.
    pub fn exec(class: &str, description: impl Into<String>) -> Self {
        Self::with_kind(NodeClass::exec(class), RuleKind::Exec, description)
    }

    /// Rule for a scan class.
    pub fn scan(class: &str, description: impl Into<String>) -> Self {
        Self::with_kind(NodeClass::exec(class), RuleKind::Scan, description)
    }
}

impl<N: Convertible> Rule<N> {
    /// Rule for an explicit class identity.
    pub fn with_kind(class: NodeClass, kind: RuleKind, description: impl Into<String>) -> Self {
        Self {
            class,
            kind,
            description: description.into(),
            incompat: None,
            disabled: None,
            input_sig: None,
            output_sig: None,
            exchange: false,
            tag: None,
            convert: None,
        }
    }

    /// Marks the replacement as not fully compatible with host semantics.
    pub fn incompat(mut self, explanation: impl Into<String>) -> Self {
        self.incompat = Some(explanation.into());
        self
    }

    /// Disables the rule unless its key is set explicitly.
    pub fn disabled_by_default(mut self, explanation: impl Into<String>) -> Self {
        self.disabled = Some(explanation.into());
        self
    }

    /// Types accepted from inputs.
    pub fn inputs(mut self, sig: TypeSig) -> Self {
        self.input_sig = Some(sig);
        self
    }

    /// Types accepted as output.
    pub fn output(mut self, sig: TypeSig) -> Self {
        self.output_sig = Some(sig);
        self
    }

    /// Marks the operator as a data exchange.
    pub fn exchange(mut self) -> Self {
        self.exchange = true;
        self
    }

    /// Adds a node-specific eligibility check.
    pub fn tag_with<F>(mut self, tag: F) -> Self
    where
        F: for<'m, 'a> Fn(&mut TagContext<'m, 'a, N>) + Send + Sync + 'static,
    {
        self.tag = Some(Arc::new(tag));
        self
    }

    /// Replaces the default converter.
    pub fn convert_with<F>(mut self, convert: F) -> Self
    where
        F: Fn(&N, &AccelConf, Vec<GpuExpr>) -> N::Op + Send + Sync + 'static,
    {
        self.convert = Some(Arc::new(convert));
        self
    }

    /// Class identity.
    pub fn class(&self) -> &NodeClass {
        &self.class
    }

    /// Rule category.
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Incompatibility explanation, if any.
    pub fn incompat_doc(&self) -> Option<&str> {
        self.incompat.as_deref()
    }

    /// Explanation for rules that are off by default, if any.
    pub fn disabled_doc(&self) -> Option<&str> {
        self.disabled.as_deref()
    }

    /// True for exchange operators.
    pub fn is_exchange(&self) -> bool {
        self.exchange
    }

    /// Per-rule enable key, `accel.sql.<kind>.<ShortName>`.
    pub fn config_key(&self) -> String {
        format!(
            "accel.sql.{}.{}",
            self.kind.config_segment(),
            self.class.short_name()
        )
    }

    /// Whether the rule is on by default, ignoring explicit overrides.
    pub fn enabled_by_default(&self) -> bool {
        self.incompat.is_none() && self.disabled.is_none()
    }

    /// Resolves the enable flag against `conf`.
    pub fn is_enabled(&self, conf: &AccelConf) -> bool {
        conf.is_operator_enabled(
            &self.config_key(),
            self.incompat.is_some(),
            self.disabled.is_some(),
        )
    }

    /// Reason added when configuration turns the rule off.
    pub(crate) fn disabled_reason(&self) -> String {
        let mut reason = format!(
            "{} {} has been disabled by configuration; set {} to true to enable",
            self.kind.label().to_ascii_lowercase(),
            self.class.short_name(),
            self.config_key()
        );
        if let Some(text) = self.incompat.as_deref().or(self.disabled.as_deref()) {
            let _ = write!(reason, " ({text})");
        }
        reason
    }

    /// Type signature violations for `node`, in input-then-output order.
    pub(crate) fn type_reasons(&self, node: &N) -> Vec<String> {
        let mut reasons = Vec::new();
        let short = self.class.short_name();
        if let Some(sig) = &self.input_sig {
            for ty in node.input_types() {
                if let Some(why) = sig.reason_not_supported(ty) {
                    reasons.push(format!("{short} input type {why}"));
                }
            }
        }
        if let Some(sig) = &self.output_sig {
            for ty in node.output_types() {
                if let Some(why) = sig.reason_not_supported(ty) {
                    reasons.push(format!("{short} output type {why}"));
                }
            }
        }
        reasons
    }

    pub(crate) fn tag_fn(&self) -> Option<&TagFn<N>> {
        self.tag.as_ref()
    }

    /// Runs the rule's converter (or the default) on one node.
    pub fn convert_node(&self, node: &N, conf: &AccelConf, exprs: Vec<GpuExpr>) -> N::Op {
        match &self.convert {
            Some(convert) => convert(node, conf, exprs),
            None => N::default_convert(node, exprs),
        }
    }
}

/// Rules for one host tree type, keyed by class identity.
#[derive(Debug)]
pub struct RuleRegistry<N: Convertible> {
    rules: FxHashMap<NodeClass, Rule<N>>,
}

impl<N: Convertible> Default for RuleRegistry<N> {
    fn default() -> Self {
        Self {
            rules: FxHashMap::default(),
        }
    }
}

impl<N: Convertible> RuleRegistry<N> {
    /// Registers `rule`, replacing and returning any rule with the same class.
    pub fn register(&mut self, rule: Rule<N>) -> Option<Rule<N>> {
        let previous = self.rules.insert(rule.class.clone(), rule);
        if let Some(prev) = &previous {
            warn!(class = %prev.class, "overrides.registry.replaced");
        }
        previous
    }

    /// Registers `rule`, failing if its class is already taken.
    pub fn try_register(&mut self, rule: Rule<N>) -> Result<()> {
        if self.rules.contains_key(&rule.class) {
            return Err(OverrideError::DuplicateRule {
                key: rule.class.to_string(),
            });
        }
        self.rules.insert(rule.class.clone(), rule);
        Ok(())
    }

    /// Exact-match lookup by class identity.
    pub fn lookup(&self, class: &NodeClass) -> Option<&Rule<N>> {
        self.rules.get(class)
    }

    /// Number of registered rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are registered.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Registered rules in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &Rule<N>> {
        self.rules.values()
    }
}

/// Documentation row for one rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuleDoc {
    /// Per-rule enable key.
    pub key: String,
    /// Rule description.
    pub description: String,
    /// Whether the rule is on without explicit settings.
    pub default_enabled: bool,
    /// Incompatibility or disabled-by-default explanation.
    pub notes: Option<String>,
}

/// Expression and operator rules used by one override pass.
#[derive(Debug, Default)]
pub struct Registry {
    /// Expression and partitioning rules.
    pub exprs: RuleRegistry<HostExpr>,
    /// Operator and scan rules.
    pub execs: RuleRegistry<HostPlan>,
}

static SHARED: OnceLock<Arc<Registry>> = OnceLock::new();

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in rule.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::overrides::builtin::register_all(&mut registry);
        registry
    }

    /// Process-wide built-in registry, created on first use.
    pub fn shared() -> Arc<Registry> {
        Arc::clone(SHARED.get_or_init(|| Arc::new(Registry::builtin())))
    }

    /// Registers an expression or partitioning rule.
    pub fn register_expr(&mut self, rule: Rule<HostExpr>) -> Option<Rule<HostExpr>> {
        self.exprs.register(rule)
    }

    /// Registers an operator or scan rule.
    pub fn register_exec(&mut self, rule: Rule<HostPlan>) -> Option<Rule<HostPlan>> {
        self.execs.register(rule)
    }

    /// Documentation rows for every rule, sorted by key.
    pub fn rule_docs(&self) -> Vec<RuleDoc> {
        let mut docs: Vec<RuleDoc> = self
            .exprs
            .iter()
            .map(doc_row)
            .chain(self.execs.iter().map(doc_row))
            .collect();
        docs.sort_by(|a, b| a.key.cmp(&b.key));
        docs
    }

    /// Markdown table of [`Registry::rule_docs`].
    pub fn render_rule_docs_markdown(&self) -> String {
        let mut out = String::from(
            "Name | Description | Default Value | Notes\n-----|-------------|---------------|------\n",
        );
        for doc in self.rule_docs() {
            let _ = writeln!(
                out,
                "<a name=\"{key}\"></a>{key}|{desc}|{default}|{notes}",
                key = doc.key,
                desc = doc.description,
                default = doc.default_enabled,
                notes = doc.notes.as_deref().unwrap_or("None")
            );
        }
        out
    }
}

fn doc_row<N: Convertible>(rule: &Rule<N>) -> RuleDoc {
    RuleDoc {
        key: rule.config_key(),
        description: rule.description.clone(),
        default_enabled: rule.enabled_by_default(),
        notes: rule
            .incompat
            .as_ref()
            .map(|text| format!("This is not 100% compatible with the host version: {text}"))
            .or_else(|| rule.disabled.as_ref().map(|text| format!("This is disabled by default because {text}"))),
    }
}

impl Convertible for HostExpr {
    type Op = GpuExpr;

    fn default_convert(node: &Self, exprs: Vec<GpuExpr>) -> GpuExpr {
        GpuExpr::from_host(node, exprs)
    }

    fn output_types(&self) -> Vec<&DataType> {
        vec![&self.data_type]
    }

    fn input_types(&self) -> Vec<&DataType> {
        self.children.iter().map(|child| &child.data_type).collect()
    }

    fn dependency_reason(meta: &Meta<'_, Self>) -> Option<String> {
        meta.children()
            .iter()
            .find(|child| !child.can_this_be_replaced())
            .map(|child| {
                format!(
                    "not all child expressions can run on GPU: {}",
                    child.short_name()
                )
            })
    }
}

impl Convertible for HostPlan {
    type Op = GpuExec;

    fn default_convert(node: &Self, exprs: Vec<GpuExpr>) -> GpuExec {
        GpuExec::from_host(node, exprs)
    }

    fn output_types(&self) -> Vec<&DataType> {
        self.output.iter().map(|attr| &attr.data_type).collect()
    }

    fn input_types(&self) -> Vec<&DataType> {
        self.children
            .iter()
            .flat_map(|child| child.output.iter().map(|attr| &attr.data_type))
            .collect()
    }

    fn dependency_reason(meta: &Meta<'_, Self>) -> Option<String> {
        let failing: Vec<&str> = meta
            .exprs()
            .iter()
            .filter(|expr| !expr.can_this_be_replaced())
            .map(|expr| expr.short_name())
            .collect();
        if failing.is_empty() {
            None
        } else {
            Some(format!(
                "not all expressions can be replaced: {}",
                failing.join(", ")
            ))
        }
    }
}
