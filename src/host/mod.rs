#![forbid(unsafe_code)]

//! Host engine plan and expression trees consumed by the override pipeline.
//!
//! The pipeline assumes only that nodes have ordered children and a stable
//! class identity usable as a registry key. Everything else (types,
//! parameters, output attributes) is read by individual rules.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{OverrideError, Result};
use crate::types::{DataType, ScalarValue};

/// Package prefix of built-in host expression classes.
pub const EXPRESSION_PACKAGE: &str = "host.expressions";
/// Package prefix of built-in host operator classes.
pub const EXECUTION_PACKAGE: &str = "host.execution";

/// Stable identity of a host node type, keyed by its fully qualified name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeClass(String);

impl NodeClass {
    /// Wraps a fully qualified class name.
    pub fn new(name: impl Into<String>) -> Self {
        NodeClass(name.into())
    }

    /// Resolves a built-in expression class; qualified names pass through.
    pub fn expression(name: &str) -> Self {
        Self::qualify(EXPRESSION_PACKAGE, name)
    }

    /// Resolves a built-in operator class; qualified names pass through.
    pub fn exec(name: &str) -> Self {
        Self::qualify(EXECUTION_PACKAGE, name)
    }

    fn qualify(package: &str, name: &str) -> Self {
        if name.contains('.') {
            NodeClass(name.to_string())
        } else {
            NodeClass(format!("{package}.{name}"))
        }
    }

    /// Fully qualified name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Segment after the last `.`, used for configuration keys and reports.
    pub fn short_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rule-specific parameter attached to a host node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer setting.
    Int(i64),
    /// Floating setting.
    Float(f64),
    /// Free-form text.
    Str(String),
    /// Data type (cast targets and similar).
    Type(DataType),
    /// Literal value.
    Scalar(ScalarValue),
    /// Ordered list of names.
    List(Vec<String>),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
            ParamValue::Type(v) => write!(f, "{v}"),
            ParamValue::Scalar(v) => write!(f, "{v}"),
            ParamValue::List(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

/// Ordered parameter map.
pub type Params = BTreeMap<String, ParamValue>;

/// Output column of a host operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// Column name.
    pub name: String,
    /// Column type.
    pub data_type: DataType,
    /// Whether the column may hold nulls.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

impl Attribute {
    /// Nullable attribute.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }
}

fn default_nullable() -> bool {
    true
}

/// Common view over host trees, used by generic metadata and reports.
pub trait HostNode: fmt::Debug + Send + Sync {
    /// Class identity used for rule lookup.
    fn class(&self) -> &NodeClass;
    /// Ordered children of the same tree type.
    fn children(&self) -> &[Self]
    where
        Self: Sized;
    /// Short human-readable rendering for explain output.
    fn describe(&self) -> String;
}

/// Host expression node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostExpr {
    /// Class identity.
    pub class: NodeClass,
    /// Result type.
    pub data_type: DataType,
    /// Whether the result may be null.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Column or alias name, when the class has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Class-specific parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
    /// Ordered child expressions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HostExpr>,
}

impl HostExpr {
    /// Expression of a built-in (or qualified) class with the given children.
    pub fn call(class: &str, data_type: DataType, children: Vec<HostExpr>) -> Self {
        Self {
            class: NodeClass::expression(class),
            data_type,
            nullable: true,
            name: None,
            params: Params::new(),
            children,
        }
    }

    /// Literal value.
    pub fn literal(value: ScalarValue) -> Self {
        let nullable = value.is_null();
        let mut expr = Self::call("Literal", value.data_type(), Vec::new());
        expr.nullable = nullable;
        expr.params
            .insert("value".to_string(), ParamValue::Scalar(value));
        expr
    }

    /// Reference to an input column.
    pub fn column(name: impl Into<String>, data_type: DataType) -> Self {
        let mut expr = Self::call("AttributeReference", data_type, Vec::new());
        expr.name = Some(name.into());
        expr
    }

    /// Named output expression.
    pub fn alias(child: HostExpr, name: impl Into<String>) -> Self {
        let mut expr = Self::call("Alias", child.data_type.clone(), vec![child]);
        expr.name = Some(name.into());
        expr
    }

    /// Cast to `to`.
    pub fn cast(child: HostExpr, to: DataType) -> Self {
        Self::call("Cast", to, vec![child])
    }

    /// Sort key with direction.
    pub fn sort_order(child: HostExpr, ascending: bool) -> Self {
        Self::call("SortOrder", child.data_type.clone(), vec![child])
            .with_param("ascending", ParamValue::Bool(ascending))
    }

    /// Wraps an aggregate function in an aggregate expression.
    pub fn aggregate(function: HostExpr) -> Self {
        Self::call("AggregateExpression", function.data_type.clone(), vec![function])
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Marks the expression as never null.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Literal payload, when this is a literal.
    pub fn literal_value(&self) -> Option<&ScalarValue> {
        match self.params.get("value") {
            Some(ParamValue::Scalar(value)) if self.class.short_name() == "Literal" => Some(value),
            _ => None,
        }
    }

    /// Boolean parameter lookup.
    pub fn bool_param(&self, key: &str) -> Option<bool> {
        match self.params.get(key) {
            Some(ParamValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    /// Renders the expression as compact SQL-like text.
    pub fn sql(&self) -> String {
        let short = self.class.short_name();
        match short {
            "Literal" => self
                .literal_value()
                .map(ToString::to_string)
                .unwrap_or_else(|| "?".to_string()),
            "AttributeReference" => self.name.clone().unwrap_or_else(|| "?".to_string()),
            "Alias" => format!(
                "{} AS {}",
                self.children
                    .first()
                    .map(HostExpr::sql)
                    .unwrap_or_default(),
                self.name.as_deref().unwrap_or("?")
            ),
            "Cast" => format!(
                "cast({} as {})",
                self.children
                    .first()
                    .map(HostExpr::sql)
                    .unwrap_or_default(),
                self.data_type
            ),
            _ => {
                let args: Vec<String> = self.children.iter().map(HostExpr::sql).collect();
                format!("{}({})", short.to_ascii_lowercase(), args.join(", "))
            }
        }
    }
}

impl HostNode for HostExpr {
    fn class(&self) -> &NodeClass {
        &self.class
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn describe(&self) -> String {
        self.sql()
    }
}

/// Host physical operator node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostPlan {
    /// Class identity.
    pub class: NodeClass,
    /// Output columns.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<Attribute>,
    /// Expressions evaluated by this operator, in operator-defined order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expressions: Vec<HostExpr>,
    /// Output partitioning for exchanges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<HostExpr>,
    /// Operator-specific parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
    /// Input operators.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<HostPlan>,
}

impl HostPlan {
    /// Operator of a built-in (or qualified) class with no inputs.
    pub fn new(class: &str) -> Self {
        Self {
            class: NodeClass::exec(class),
            output: Vec::new(),
            expressions: Vec::new(),
            partitioning: None,
            params: Params::new(),
            children: Vec::new(),
        }
    }

    /// File scan over `format` producing `output`.
    pub fn scan(format: &str, output: Vec<Attribute>) -> Self {
        Self::new("FileSourceScanExec")
            .with_output(output)
            .with_param("format", ParamValue::Str(format.to_string()))
    }

    /// Sets the output columns.
    pub fn with_output(mut self, output: Vec<Attribute>) -> Self {
        self.output = output;
        self
    }

    /// Sets the evaluated expressions.
    pub fn with_exprs(mut self, expressions: Vec<HostExpr>) -> Self {
        self.expressions = expressions;
        self
    }

    /// Sets the output partitioning.
    pub fn with_partitioning(mut self, partitioning: HostExpr) -> Self {
        self.partitioning = Some(partitioning);
        self
    }

    /// Appends an input operator.
    pub fn with_child(mut self, child: HostPlan) -> Self {
        self.children.push(child);
        self
    }

    /// Adds a parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// String parameter lookup.
    pub fn str_param(&self, key: &str) -> Option<&str> {
        match self.params.get(key) {
            Some(ParamValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    /// Integer parameter lookup.
    pub fn int_param(&self, key: &str) -> Option<i64> {
        match self.params.get(key) {
            Some(ParamValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Expressions followed by the partitioning expression, if any.
    pub fn all_expressions(&self) -> impl Iterator<Item = &HostExpr> {
        self.expressions.iter().chain(self.partitioning.iter())
    }

    /// Parses a plan from JSON and checks its structure.
    pub fn from_json(text: &str) -> Result<Self> {
        let plan: HostPlan = serde_json::from_str(text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Rejects nodes with empty class names anywhere in the tree.
    pub fn validate(&self) -> Result<()> {
        if self.class.as_str().trim().is_empty() {
            return Err(OverrideError::InvalidPlan(
                "operator class must not be empty".into(),
            ));
        }
        for expr in self.all_expressions() {
            validate_expr(expr)?;
        }
        for child in &self.children {
            child.validate()?;
        }
        Ok(())
    }
}

fn validate_expr(expr: &HostExpr) -> Result<()> {
    if expr.class.as_str().trim().is_empty() {
        return Err(OverrideError::InvalidPlan(
            "expression class must not be empty".into(),
        ));
    }
    expr.children.iter().try_for_each(validate_expr)
}

impl HostNode for HostPlan {
    fn class(&self) -> &NodeClass {
        &self.class
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn describe(&self) -> String {
        if self.output.is_empty() {
            return String::new();
        }
        let names: Vec<&str> = self.output.iter().map(|a| a.name.as_str()).collect();
        format!("[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_strip_package() {
        let class = NodeClass::expression("Add");
        assert_eq!(class.as_str(), "host.expressions.Add");
        assert_eq!(class.short_name(), "Add");
        assert_eq!(NodeClass::exec("org.other.MyExec").as_str(), "org.other.MyExec");
        assert_eq!(NodeClass::new("Bare").short_name(), "Bare");
    }

    #[test]
    fn sql_rendering() {
        let expr = HostExpr::alias(
            HostExpr::call(
                "Add",
                DataType::Int,
                vec![
                    HostExpr::column("a", DataType::Int),
                    HostExpr::literal(ScalarValue::Int(1)),
                ],
            ),
            "b",
        );
        assert_eq!(expr.sql(), "add(a, 1) AS b");
        let cast = HostExpr::cast(HostExpr::column("s", DataType::String), DataType::Long);
        assert_eq!(cast.sql(), "cast(s as bigint)");
    }

    #[test]
    fn plan_json_round_trip_keeps_shape() {
        let plan = HostPlan::new("ProjectExec")
            .with_output(vec![Attribute::new("a", DataType::Int)])
            .with_exprs(vec![HostExpr::column("a", DataType::Int)])
            .with_child(HostPlan::scan(
                "parquet",
                vec![Attribute::new("a", DataType::Int)],
            ));
        let json = serde_json::to_string(&plan).expect("serialize");
        let parsed = HostPlan::from_json(&json).expect("parse");
        assert_eq!(parsed, plan);
        assert_eq!(parsed.children[0].str_param("format"), Some("parquet"));
    }

    #[test]
    fn empty_class_is_rejected() {
        let json = r#"{"class":"host.execution.ProjectExec","expressions":[{"class":"","data_type":"int"}]}"#;
        let err = HostPlan::from_json(json).unwrap_err();
        assert_eq!(err.code(), "InvalidPlan");
    }
}
