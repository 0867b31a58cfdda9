//! Binary entry point for the accelplan CLI.
#![forbid(unsafe_code)]

#[path = "cli/config.rs"]
mod config;
#[path = "cli/ui.rs"]
mod ui;

use std::collections::HashMap;
use std::error::Error;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use accelplan::overrides::{explain, parity::check_param_parity};
use accelplan::{AccelConf, ConvertedPlan, ExplainMode, Overrides, Registry};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::config::{read_settings_file, CliConfig};
use crate::ui::{Theme, Ui};

#[derive(Parser, Debug)]
#[command(
    name = "accelplan",
    version,
    about = "Inspect GPU placement decisions for query plans",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "ACCELPLAN_CONFIG",
        value_name = "FILE",
        help = "CLI config file with profiles"
    )]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Profile to load from the CLI config")]
    profile: Option<String>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "TOML file whose [settings] table is applied after the profile"
    )]
    settings: Option<PathBuf>,

    #[arg(
        long = "conf",
        global = true,
        value_name = "KEY=VALUE",
        value_parser = parse_key_value,
        help = "Setting applied last; may be repeated"
    )]
    conf: Vec<(String, String)>,

    #[arg(long, global = true, value_enum, default_value_t = Theme::Auto)]
    theme: Theme,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tag a plan and print why each node does or does not run on the GPU.
    Explain {
        #[arg(value_name = "PLAN", help = "JSON plan file, or - for stdin")]
        plan: PathBuf,
        #[arg(
            long,
            value_parser = parse_explain_mode,
            help = "ALL, NONE or NOT_ON_GPU; defaults to the configured mode, or ALL"
        )]
        mode: Option<ExplainMode>,
    },
    /// Rewrite a plan and print the resulting mixed host/GPU plan.
    Convert {
        #[arg(value_name = "PLAN", help = "JSON plan file, or - for stdin")]
        plan: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print generated documentation.
    Docs {
        #[arg(value_enum)]
        topic: DocsTopic,
    },
    /// Verify that built-in converters carry the declared parameters.
    Parity,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DocsTopic {
    Configs,
    Rules,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let ui = Ui::new(cli.theme);
    match run(cli, &ui) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            ui.error(&err.to_string());
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

fn run(cli: Cli, ui: &Ui) -> Result<i32, Box<dyn Error>> {
    match &cli.command {
        Command::Explain { plan, mode } => {
            let conf = resolve_conf(&cli)?;
            let plan = read_plan(plan)?;
            let mode = mode.unwrap_or_else(|| match conf.explain() {
                ExplainMode::None => ExplainMode::All,
                configured => configured,
            });
            let overrides = Overrides::new(Arc::new(conf));
            let meta = overrides.tag(&plan);
            let report = explain(&meta, mode);
            if report.is_empty() {
                ui.info("nothing to report");
            } else {
                ui.explain_report(&report);
            }
        }
        Command::Convert { plan, format } => {
            let conf = resolve_conf(&cli)?;
            let plan = read_plan(plan)?;
            let output = Overrides::new(Arc::new(conf)).apply(&plan)?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&output.plan)?);
                }
                OutputFormat::Text => {
                    if !output.explain.is_empty() {
                        ui.explain_report(&output.explain);
                        println!();
                    }
                    print_converted(ui, &output.plan);
                }
            }
        }
        Command::Docs { topic } => match topic {
            DocsTopic::Configs => print!("{}", AccelConf::help_markdown()),
            DocsTopic::Rules => print!("{}", Registry::shared().render_rule_docs_markdown()),
        },
        Command::Parity => {
            let conf = resolve_conf(&cli)?;
            let mismatches = check_param_parity(&Registry::shared(), &conf);
            if mismatches.is_empty() {
                ui.info("all converters match the parity table");
            } else {
                for mismatch in &mismatches {
                    ui.error(mismatch);
                }
                return Ok(2);
            }
        }
    }
    Ok(0)
}

/// Merges settings from the profile, `--settings` and `--conf`, later
/// sources winning.
fn resolve_conf(cli: &Cli) -> Result<AccelConf, Box<dyn Error>> {
    let config = CliConfig::load(cli.config.clone())?;
    debug!(path = ?config.path(), "cli.config.loaded");
    let mut settings: HashMap<String, String> = HashMap::new();
    if let Some(profile) = config.select(cli.profile.as_deref())? {
        debug!(profile = %profile.name, "cli.profile.selected");
        settings.extend(profile.resolve_settings()?);
    }
    if let Some(path) = &cli.settings {
        settings.extend(read_settings_file(path)?);
    }
    settings.extend(cli.conf.iter().cloned());
    debug!(count = settings.len(), "cli.settings.resolved");
    Ok(AccelConf::new(settings)?)
}

fn read_plan(path: &Path) -> Result<accelplan::host::HostPlan, Box<dyn Error>> {
    let text = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)
            .map_err(|err| format!("failed to read plan {}: {err}", path.display()))?
    };
    Ok(accelplan::host::HostPlan::from_json(&text)?)
}

fn print_converted(ui: &Ui, plan: &ConvertedPlan) {
    ui.heading("Plan");
    ui.plan_tree(&plan.root.render_tree());
    println!();
    ui.section(
        "Summary",
        [
            ("gpu nodes", plan.stats.gpu_nodes.to_string()),
            ("host nodes", plan.stats.host_nodes.to_string()),
            ("transitions", plan.stats.transitions.to_string()),
            ("fingerprint", format!("{:016x}", plan.fingerprint)),
        ],
    );
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

fn parse_explain_mode(raw: &str) -> Result<ExplainMode, String> {
    raw.parse::<ExplainMode>().map_err(|err| err.to_string())
}
