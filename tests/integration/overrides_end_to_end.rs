#![allow(missing_docs)]

use std::sync::Arc;

use accelplan::host::{Attribute, HostExpr, HostPlan};
use accelplan::overrides::{explain, ExecNode, ExecOp, ExprMeta, PlanMeta};
use accelplan::types::{DataType, ScalarValue};
use accelplan::{AccelConf, ExplainMode, OverrideError, Overrides, Registry};
use proptest::prelude::*;

fn conf(pairs: &[(&str, &str)]) -> Arc<AccelConf> {
    Arc::new(AccelConf::from_pairs(pairs.iter().copied()).expect("valid settings"))
}

fn scan(format: &str, columns: &[(&str, DataType)]) -> HostPlan {
    HostPlan::scan(
        format,
        columns
            .iter()
            .map(|(name, ty)| Attribute::new(*name, ty.clone()))
            .collect(),
    )
}

fn project(exprs: Vec<HostExpr>, output: Vec<Attribute>, child: HostPlan) -> HostPlan {
    HostPlan::new("ProjectExec")
        .with_exprs(exprs)
        .with_output(output)
        .with_child(child)
}

#[test]
fn projection_of_literal_addition_runs_fully_on_gpu() {
    let sum = HostExpr::call(
        "Add",
        DataType::Int,
        vec![
            HostExpr::literal(ScalarValue::Int(1)),
            HostExpr::literal(ScalarValue::Int(2)),
        ],
    );
    let plan = project(
        vec![sum],
        vec![Attribute::new("x", DataType::Int)],
        scan("parquet", &[("a", DataType::Int)]),
    );
    let output = Overrides::new(conf(&[])).apply(&plan).expect("apply");
    let root = &output.plan.root;
    assert_eq!(root.op, ExecOp::ColumnarToRow);
    let gpu_project = &root.inputs[0];
    assert_eq!(gpu_project.label(), "GpuProjectExec");
    match &gpu_project.op {
        ExecOp::Gpu(exec) => assert_eq!(exec.exprs[0].to_string(), "GpuAdd(1, 2)"),
        other => panic!("expected a GPU operator, got {other:?}"),
    }
    assert_eq!(gpu_project.inputs[0].label(), "GpuFileSourceScanExec");
    assert_eq!(output.plan.stats.gpu_nodes, 2);
    assert_eq!(output.plan.stats.host_nodes, 0);
    assert_eq!(output.plan.stats.transitions, 1);
}

#[test]
fn incompatible_upper_needs_explicit_opt_in() {
    let upper = HostExpr::call(
        "Upper",
        DataType::String,
        vec![HostExpr::column("s", DataType::String)],
    );
    let plan = project(
        vec![upper],
        vec![Attribute::new("u", DataType::String)],
        scan("parquet", &[("s", DataType::String)]),
    );

    let registry = Registry::builtin();
    let settings = AccelConf::default();
    let mut meta = PlanMeta::wrap(&plan, &registry);
    meta.tag_for_gpu(&settings);
    assert!(!meta.can_this_be_replaced());
    assert!(meta.reasons()[0].starts_with("not all expressions can be replaced"));
    assert!(meta.reasons()[0].contains("Upper"));
    let report = explain(&meta, ExplainMode::NotOnGpu);
    assert!(report.lines().any(|l| l.starts_with("!Exec <ProjectExec>")));
    assert!(report.lines().any(|l| l.trim_start().starts_with("!Expression <Upper>")));

    let default = Overrides::new(conf(&[])).apply(&plan).expect("apply");
    assert_eq!(default.plan.root.label(), "ProjectExec");
    assert_eq!(default.plan.root.inputs[0].op, ExecOp::ColumnarToRow);
    assert_eq!(default.plan.stats.transitions, 1);

    let opted_in = Overrides::new(conf(&[("accel.sql.expression.Upper", "true")]))
        .apply(&plan)
        .expect("apply");
    assert_eq!(opted_in.plan.root.inputs[0].label(), "GpuProjectExec");
    assert_eq!(opted_in.plan.stats.host_nodes, 0);
}

#[test]
fn not_on_gpu_report_and_transitions_for_mixed_plan() {
    let plan = project(
        vec![HostExpr::alias(HostExpr::column("a", DataType::Int), "b")],
        vec![Attribute::new("b", DataType::Int)],
        HostPlan::new("MysteryExec")
            .with_output(vec![Attribute::new("a", DataType::Int)])
            .with_child(HostPlan::new("ProjectExec").with_child(scan("csv", &[("a", DataType::Int)]))),
    );
    let output = Overrides::new(conf(&[("accel.sql.explain", "NOT_ON_GPU")]))
        .apply(&plan)
        .expect("apply");
    let lines: Vec<&str> = output.explain.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("  !NOT_FOUND <MysteryExec>"));
    assert!(lines[1].starts_with("      !Scan <FileSourceScanExec>"));
    assert!(lines[1].ends_with(
        "reading csv files has been disabled by configuration; set accel.sql.format.csv.enabled to true to enable"
    ));

    let stats = output.plan.stats;
    assert_eq!(stats.gpu_nodes, 2);
    assert_eq!(stats.host_nodes, 2);
    assert_eq!(stats.transitions, 4);

    let root = &output.plan.root;
    assert_eq!(root.op, ExecOp::ColumnarToRow);
    let outer = &root.inputs[0];
    assert_eq!(outer.label(), "GpuProjectExec");
    assert!(matches!(outer.inputs[0].op, ExecOp::RowToColumnar { .. }));
    let mystery = &outer.inputs[0].inputs[0];
    assert_eq!(mystery.label(), "MysteryExec");
    assert_eq!(mystery.inputs[0].op, ExecOp::ColumnarToRow);
}

#[test]
fn identity_projection_is_elided_without_transitions() {
    let identity = |child| {
        project(
            vec![HostExpr::column("a", DataType::Int)],
            vec![Attribute::new("a", DataType::Int)],
            child,
        )
    };

    let on_gpu = identity(scan("parquet", &[("a", DataType::Int)]));
    let output = Overrides::new(conf(&[])).apply(&on_gpu).expect("apply");
    assert_eq!(output.plan.root.op, ExecOp::ColumnarToRow);
    assert_eq!(output.plan.root.inputs[0].label(), "GpuFileSourceScanExec");
    assert_eq!(output.plan.stats.gpu_nodes, 1);
    assert_eq!(output.plan.stats.transitions, 1);

    let on_host = identity(scan("csv", &[("a", DataType::Int)]));
    let output = Overrides::new(conf(&[])).apply(&on_host).expect("apply");
    assert_eq!(output.plan.root.label(), "FileSourceScanExec");
    assert!(output.plan.root.inputs.is_empty());
    assert_eq!(output.plan.stats.transitions, 0);
    assert!(!output.plan.uses_gpu());
}

#[test]
fn test_mode_reports_first_host_node() {
    let plan = HostPlan::new("MysteryExec").with_child(scan("parquet", &[("a", DataType::Int)]));
    let err = Overrides::new(conf(&[("accel.sql.test.enabled", "true")]))
        .apply(&plan)
        .unwrap_err();
    assert!(matches!(err, OverrideError::NotOnGpu { ref node, .. } if node == "MysteryExec"));
    assert!(err.to_string().contains("no GPU implementation of exec MysteryExec could be found"));
}

#[test]
fn plan_json_round_trips_through_pipeline() {
    let plan = project(
        vec![HostExpr::alias(HostExpr::column("a", DataType::Long), "b")],
        vec![Attribute::new("b", DataType::Long)],
        scan("orc", &[("a", DataType::Long)]),
    );
    let json = serde_json::to_string(&plan).expect("serialize");
    let parsed = HostPlan::from_json(&json).expect("parse");
    assert_eq!(parsed, plan);
    let output = Overrides::new(conf(&[])).apply(&parsed).expect("apply");
    assert_eq!(output.plan.stats.gpu_nodes, 2);
}

fn arb_expr() -> impl Strategy<Value = HostExpr> {
    let leaf = prop_oneof![
        any::<i32>().prop_map(|v| HostExpr::literal(ScalarValue::Int(v))),
        "[a-z]{1,4}".prop_map(|name| HostExpr::column(name, DataType::Int)),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(l, r)| HostExpr::call("Add", DataType::Int, vec![l, r])),
            prop::collection::vec(inner.clone(), 0..3)
                .prop_map(|children| HostExpr::call("Mystery", DataType::Int, children)),
            inner.prop_map(|c| HostExpr::call("Abs", DataType::Int, vec![c])),
        ]
    })
}

fn arb_plan() -> impl Strategy<Value = HostPlan> {
    let leaf = "[A-Z][a-z]{2,6}Exec".prop_map(|name| HostPlan::new(&name));
    leaf.prop_recursive(3, 12, 2, |inner| {
        ("[A-Z][a-z]{2,6}Exec", prop::collection::vec(inner, 1..3)).prop_map(|(name, children)| {
            children
                .into_iter()
                .fold(HostPlan::new(&name), HostPlan::with_child)
        })
    })
}

fn arb_conf() -> impl Strategy<Value = AccelConf> {
    let flag = || prop::option::of(any::<bool>());
    (flag(), flag(), flag(), flag(), flag(), flag()).prop_map(
        |(incompat, ansi, nans, add, abs, mystery)| {
            let keys = [
                "accel.sql.incompatibleOps.enabled",
                "accel.sql.ansi.enabled",
                "accel.sql.hasNans",
                "accel.sql.expression.Add",
                "accel.sql.expression.Abs",
                "accel.sql.expression.Mystery",
            ];
            let pairs = keys
                .into_iter()
                .zip([incompat, ansi, nans, add, abs, mystery])
                .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.to_string())));
            AccelConf::new(pairs.collect()).expect("generated settings are valid")
        },
    )
}

fn count_nodes(expr: &HostExpr) -> usize {
    1 + expr.children.iter().map(count_nodes).sum::<usize>()
}

proptest! {
    #[test]
    fn prop_tagging_follows_child_and_rule_invariants(expr in arb_expr(), conf in arb_conf()) {
        let registry = Registry::builtin();
        let mut meta = ExprMeta::wrap(&expr, &registry);
        meta.tag_for_gpu(&conf);

        let mut visited = 0usize;
        meta.walk(&mut |node| {
            visited += 1;
            if node.rule().is_none() {
                assert_eq!(node.reasons().len(), 1);
                assert!(node.reasons()[0].starts_with("no GPU implementation of expression"));
            }
            if node.children().iter().any(|child| !child.can_this_be_replaced()) {
                assert!(!node.can_this_be_replaced());
            }
        });
        prop_assert_eq!(visited, count_nodes(&expr));
        prop_assert_eq!(explain(&meta, ExplainMode::All).lines().count(), visited);
    }

    #[test]
    fn prop_plans_without_rules_convert_to_themselves(plan in arb_plan()) {
        let overrides = Overrides::with_registry(Arc::new(Registry::new()), conf(&[]));
        let output = overrides.apply(&plan).expect("apply");
        prop_assert_eq!(&output.plan.root, &ExecNode::host_tree(&plan));
        prop_assert_eq!(output.plan.stats.transitions, 0);
        prop_assert!(!output.plan.uses_gpu());
    }
}
