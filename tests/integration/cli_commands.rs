#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use accelplan::host::{Attribute, HostExpr, HostPlan};
use accelplan::types::DataType;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use tempfile::TempDir;

fn write_plan(dir: &Path, plan: &HostPlan) -> PathBuf {
    let path = dir.join("plan.json");
    fs::write(&path, serde_json::to_string_pretty(plan).expect("serialize")).expect("write plan");
    path
}

fn upper_plan() -> HostPlan {
    HostPlan::new("ProjectExec")
        .with_exprs(vec![HostExpr::call(
            "Upper",
            DataType::String,
            vec![HostExpr::column("s", DataType::String)],
        )])
        .with_output(vec![Attribute::new("u", DataType::String)])
        .with_child(HostPlan::scan(
            "parquet",
            vec![Attribute::new("s", DataType::String)],
        ))
}

fn cli(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("accelplan");
    cmd.env("ACCELPLAN_CONFIG", dir.path().join("missing.toml"))
        .args(["--theme", "plain"]);
    cmd
}

fn stdout_of(cmd: &mut assert_cmd::Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

#[test]
fn explain_defaults_to_all_mode() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    let stdout = stdout_of(cli(&dir).arg("explain").arg(&plan));
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].starts_with("!Exec <ProjectExec>"));
    assert!(lines.iter().any(|l| l.trim_start().starts_with("!Expression <Upper>")));
    assert!(lines.iter().any(|l| l.trim_start().starts_with("*Scan <FileSourceScanExec>")));
}

#[test]
fn conf_flag_enables_incompatible_expression() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    let stdout = stdout_of(
        cli(&dir)
            .args(["explain", "--mode", "not_on_gpu", "--conf", "accel.sql.expression.Upper=true"])
            .arg(&plan),
    );
    assert!(stdout.contains("nothing to report"));
}

#[test]
fn convert_emits_json_plan() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    let stdout = stdout_of(
        cli(&dir)
            .args(["convert", "--format", "json", "--conf", "accel.sql.incompatibleOps.enabled=true"])
            .arg(&plan),
    );
    let json: Value = serde_json::from_str(&stdout).expect("valid json");
    assert_eq!(json["root"]["op"]["kind"], "columnar_to_row");
    assert_eq!(json["root"]["inputs"][0]["op"]["name"], "GpuProjectExec");
    assert_eq!(json["stats"]["gpu_nodes"], 2);
    assert!(json["fingerprint"].is_u64());
}

#[test]
fn convert_text_prints_tree_and_summary() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    let stdout = stdout_of(cli(&dir).arg("convert").arg(&plan));
    assert!(stdout.contains("ProjectExec"));
    assert!(stdout.contains("  ColumnarToRow"));
    assert!(stdout.contains("GpuFileSourceScanExec"));
    assert!(stdout.contains("transitions: 1"));
}

#[test]
fn profile_and_settings_file_are_merged() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    let settings = dir.path().join("settings.toml");
    fs::write(&settings, "[settings]\n\"accel.sql.expression.Upper\" = false\n").expect("write");
    let config = dir.path().join("cli.toml");
    fs::write(
        &config,
        "default_profile = \"lenient\"\n\n[profiles.lenient]\nexplain = \"NOT_ON_GPU\"\n\n[profiles.lenient.settings]\n\"accel.sql.incompatibleOps.enabled\" = true\n",
    )
    .expect("write");

    let lenient = stdout_of(
        cargo_bin_cmd!("accelplan")
            .args(["--theme", "plain", "--config"])
            .arg(&config)
            .arg("explain")
            .arg(&plan),
    );
    assert!(lenient.contains("nothing to report"));

    let strict = stdout_of(
        cargo_bin_cmd!("accelplan")
            .args(["--theme", "plain", "--config"])
            .arg(&config)
            .arg("--settings")
            .arg(&settings)
            .arg("explain")
            .arg(&plan),
    );
    assert!(strict.contains("!Expression <Upper>"));
    assert!(strict.contains("set accel.sql.expression.Upper to true to enable"));
}

#[test]
fn invalid_setting_fails_with_message() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    let output = cli(&dir)
        .args(["convert", "--conf", "accel.sql.enabled=maybe"])
        .arg(&plan)
        .assert()
        .failure()
        .code(1)
        .get_output()
        .stderr
        .clone();
    let stderr = String::from_utf8(output).expect("utf8 stderr");
    assert!(stderr.contains("error: accel.sql.enabled should be boolean, but was 'maybe'"));
}

#[test]
fn test_mode_failure_exits_non_zero() {
    let dir = TempDir::new().expect("tempdir");
    let plan = write_plan(dir.path(), &upper_plan());
    cli(&dir)
        .args(["convert", "--conf", "accel.sql.test.enabled=true"])
        .arg(&plan)
        .assert()
        .failure()
        .code(1);
}

#[test]
fn docs_render_markdown_tables() {
    let dir = TempDir::new().expect("tempdir");
    let configs = stdout_of(cli(&dir).args(["docs", "configs"]));
    assert!(configs.starts_with("Name | Description | Default Value"));
    assert!(configs.contains("accel.sql.enabled"));

    let rules = stdout_of(cli(&dir).args(["docs", "rules"]));
    assert!(rules.starts_with("Name | Description | Default Value | Notes"));
    assert!(rules.contains("accel.sql.expression.Upper"));
    assert!(rules.contains("accel.sql.exec.CartesianProductExec"));
}

#[test]
fn parity_check_passes_for_builtin_rules() {
    let dir = TempDir::new().expect("tempdir");
    let stdout = stdout_of(cli(&dir).arg("parity"));
    assert!(stdout.contains("all converters match the parity table"));
}
