#![forbid(unsafe_code)]

//! Configuration overlay.
//!
//! Settings arrive as a flat string map (from a TOML document, CLI flags or
//! the embedding engine) and are resolved once into an immutable
//! [`AccelConf`] snapshot. Every declared entry is parsed and validated up
//! front so that tagging never observes a malformed setting.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::{OverrideError, Result};
use crate::overrides::ExplainMode;

/// Typed entry declarations and value parsers.
pub mod entry;

pub use entry::{conf, AnyConfEntry, ByteSize, ConfEntry, ConfType};

/// Prefixes of per-rule enable flags.
pub const RULE_KEY_PREFIXES: [&str; 4] = [
    "accel.sql.expression.",
    "accel.sql.exec.",
    "accel.sql.input.",
    "accel.sql.partitioning.",
];

/// Every built-in setting.
#[derive(Debug)]
pub struct Entries {
    /// Master switch.
    pub sql_enabled: ConfEntry<bool>,
    /// Global default for rules flagged incompatible.
    pub incompatible_ops: ConfEntry<bool>,
    /// Explain verbosity.
    pub explain: ConfEntry<ExplainMode>,
    /// Host ANSI mode.
    pub ansi_enabled: ConfEntry<bool>,
    /// Whether float data may contain NaNs.
    pub has_nans: ConfEntry<bool>,
    /// Allow float aggregations whose result depends on evaluation order.
    pub variable_float_agg: ConfEntry<bool>,
    /// Allow float/double to string casts.
    pub cast_float_to_string: ConfEntry<bool>,
    /// Allow string to float/double casts.
    pub cast_string_to_float: ConfEntry<bool>,
    /// Session time zone.
    pub session_time_zone: ConfEntry<String>,
    /// Enables hash joins.
    pub join_enabled: ConfEntry<bool>,
    /// Enables parquet scans.
    pub parquet_enabled: ConfEntry<bool>,
    /// Enables ORC scans.
    pub orc_enabled: ConfEntry<bool>,
    /// Enables CSV scans.
    pub csv_enabled: ConfEntry<bool>,
    /// Target columnar batch size.
    pub batch_size_bytes: ConfEntry<ByteSize>,
    /// Concurrent tasks admitted onto one device.
    pub concurrent_gpu_tasks: ConfEntry<i32>,
    /// Fraction of device memory reserved for the pool.
    pub alloc_fraction: ConfEntry<f64>,
    /// Moves exchanges back to the host when both neighbors stay there.
    pub fixup_exchange_overhead: ConfEntry<bool>,
    /// Fail compilation when part of a plan stays on the host.
    pub test_enabled: ConfEntry<bool>,
    /// Operators allowed to stay on the host in test mode.
    pub test_allowed_non_gpu: ConfEntry<Vec<String>>,
}

impl Entries {
    fn declare() -> Self {
        Self {
            sql_enabled: conf("accel.sql.enabled")
                .doc("Enable (true) or disable (false) GPU acceleration of SQL operators.")
                .boolean()
                .create_with_default(true),
            incompatible_ops: conf("accel.sql.incompatibleOps.enabled")
                .doc(
                    "For operations that work, but are not 100% compatible with the host \
                     implementation, enable them by default. Individual rule keys still win.",
                )
                .boolean()
                .create_with_default(false),
            explain: conf("accel.sql.explain")
                .doc(
                    "Explain why some parts of a query were not placed on the GPU: ALL, NONE \
                     or NOT_ON_GPU.",
                )
                .explain_mode()
                .create_with_default(ExplainMode::None),
            ansi_enabled: conf("accel.sql.ansi.enabled")
                .doc("Whether the host engine runs with ANSI arithmetic and cast semantics.")
                .boolean()
                .create_with_default(false),
            has_nans: conf("accel.sql.hasNans")
                .doc(
                    "Set to false when float and double data is known to contain no NaNs; \
                     enables min and max on floating point columns.",
                )
                .boolean()
                .create_with_default(true),
            variable_float_agg: conf("accel.sql.variableFloatAgg.enabled")
                .doc(
                    "Allow floating point aggregations whose results can vary with the order \
                     in which values are combined.",
                )
                .boolean()
                .create_with_default(false),
            cast_float_to_string: conf("accel.sql.castFloatToString.enabled")
                .doc(
                    "Allow casts from float and double to string. The GPU renders some values \
                     with different digits than the host.",
                )
                .boolean()
                .create_with_default(false),
            cast_string_to_float: conf("accel.sql.castStringToFloat.enabled")
                .doc(
                    "Allow casts from string to float and double. Rounding of the last digit \
                     can differ from the host.",
                )
                .boolean()
                .create_with_default(false),
            session_time_zone: conf("accel.sql.session.timeZone")
                .doc("Session time zone. Time zone aware expressions only run on the GPU in UTC.")
                .string()
                .create_with_default("UTC".to_string()),
            join_enabled: conf("accel.sql.join.enabled")
                .doc("Enable hash joins on the GPU.")
                .boolean()
                .create_with_default(true),
            parquet_enabled: conf("accel.sql.format.parquet.enabled")
                .doc("Enable parquet scans on the GPU.")
                .boolean()
                .create_with_default(true),
            orc_enabled: conf("accel.sql.format.orc.enabled")
                .doc("Enable ORC scans on the GPU.")
                .boolean()
                .create_with_default(true),
            csv_enabled: conf("accel.sql.format.csv.enabled")
                .doc("Enable CSV scans on the GPU. Quoting and number parsing differ from the host.")
                .boolean()
                .create_with_default(false),
            batch_size_bytes: conf("accel.sql.batchSizeBytes")
                .doc("Target size of columnar batches produced by row to columnar transitions.")
                .bytes()
                .check_value(|v| v.0 > 0, "must be greater than 0")
                .create_with_default(ByteSize(i32::MAX as u64)),
            concurrent_gpu_tasks: conf("accel.sql.concurrentGpuTasks")
                .doc("Number of tasks that may use the device concurrently.")
                .integer()
                .check_value(|v| *v >= 1, "must be at least 1")
                .create_with_default(1),
            alloc_fraction: conf("accel.memory.gpu.allocFraction")
                .doc("Fraction of device memory reserved for the allocation pool.")
                .double()
                .check_value(|v| (0.0..=1.0).contains(v), "must be within [0, 1]")
                .create_with_default(0.9),
            fixup_exchange_overhead: conf("accel.sql.exchange.fixupOverhead")
                .doc("Keep exchanges on the host when neither their input nor consumer is on the GPU.")
                .internal()
                .boolean()
                .create_with_default(true),
            test_enabled: conf("accel.sql.test.enabled")
                .doc("Fail query compilation if any operator or expression stays on the host.")
                .internal()
                .boolean()
                .create_with_default(false),
            test_allowed_non_gpu: conf("accel.sql.test.allowedNonGpu")
                .doc("Operator and expression names allowed to stay on the host in test mode.")
                .internal()
                .string_list()
                .create_with_default(Vec::new()),
        }
    }

    /// All entries in declaration order.
    pub fn all(&self) -> Vec<&dyn AnyConfEntry> {
        vec![
            &self.sql_enabled,
            &self.incompatible_ops,
            &self.explain,
            &self.ansi_enabled,
            &self.has_nans,
            &self.variable_float_agg,
            &self.cast_float_to_string,
            &self.cast_string_to_float,
            &self.session_time_zone,
            &self.join_enabled,
            &self.parquet_enabled,
            &self.orc_enabled,
            &self.csv_enabled,
            &self.batch_size_bytes,
            &self.concurrent_gpu_tasks,
            &self.alloc_fraction,
            &self.fixup_exchange_overhead,
            &self.test_enabled,
            &self.test_allowed_non_gpu,
        ]
    }
}

static ENTRIES: OnceLock<Entries> = OnceLock::new();

/// Process-wide entry declarations.
pub fn entries() -> &'static Entries {
    ENTRIES.get_or_init(Entries::declare)
}

/// Immutable snapshot of resolved settings for one session or query.
#[derive(Clone, Debug)]
pub struct AccelConf {
    settings: HashMap<String, String>,
    rule_overrides: FxHashMap<String, bool>,
    sql_enabled: bool,
    incompatible_ops: bool,
    explain: ExplainMode,
    ansi_enabled: bool,
    has_nans: bool,
    variable_float_agg: bool,
    cast_float_to_string: bool,
    cast_string_to_float: bool,
    session_time_zone: String,
    join_enabled: bool,
    parquet_enabled: bool,
    orc_enabled: bool,
    csv_enabled: bool,
    batch_size_bytes: u64,
    concurrent_gpu_tasks: i32,
    alloc_fraction: f64,
    fixup_exchange_overhead: bool,
    test_enabled: bool,
    test_allowed_non_gpu: Vec<String>,
}

impl Default for AccelConf {
    fn default() -> Self {
        let e = entries();
        Self {
            settings: HashMap::new(),
            rule_overrides: FxHashMap::default(),
            sql_enabled: *e.sql_enabled.default_value(),
            incompatible_ops: *e.incompatible_ops.default_value(),
            explain: *e.explain.default_value(),
            ansi_enabled: *e.ansi_enabled.default_value(),
            has_nans: *e.has_nans.default_value(),
            variable_float_agg: *e.variable_float_agg.default_value(),
            cast_float_to_string: *e.cast_float_to_string.default_value(),
            cast_string_to_float: *e.cast_string_to_float.default_value(),
            session_time_zone: e.session_time_zone.default_value().clone(),
            join_enabled: *e.join_enabled.default_value(),
            parquet_enabled: *e.parquet_enabled.default_value(),
            orc_enabled: *e.orc_enabled.default_value(),
            csv_enabled: *e.csv_enabled.default_value(),
            batch_size_bytes: e.batch_size_bytes.default_value().0,
            concurrent_gpu_tasks: *e.concurrent_gpu_tasks.default_value(),
            alloc_fraction: *e.alloc_fraction.default_value(),
            fixup_exchange_overhead: *e.fixup_exchange_overhead.default_value(),
            test_enabled: *e.test_enabled.default_value(),
            test_allowed_non_gpu: e.test_allowed_non_gpu.default_value().clone(),
        }
    }
}

impl AccelConf {
    /// Resolves raw settings, failing on the first unparsable or invalid value.
    pub fn new(settings: HashMap<String, String>) -> Result<Self> {
        let e = entries();
        let mut rule_overrides = FxHashMap::default();
        for (key, value) in &settings {
            if RULE_KEY_PREFIXES.iter().any(|prefix| key.starts_with(prefix)) {
                let enabled = bool::parse(value).ok_or_else(|| OverrideError::ConfigParse {
                    key: key.clone(),
                    value: value.clone(),
                    expected: bool::TYPE_NAME,
                })?;
                rule_overrides.insert(key.clone(), enabled);
            } else if key.starts_with("accel.") && !e.all().iter().any(|entry| entry.key() == key.as_str())
            {
                debug!(key = %key, "config.unknown_key");
            }
        }
        Ok(Self {
            sql_enabled: e.sql_enabled.get(&settings)?,
            incompatible_ops: e.incompatible_ops.get(&settings)?,
            explain: e.explain.get(&settings)?,
            ansi_enabled: e.ansi_enabled.get(&settings)?,
            has_nans: e.has_nans.get(&settings)?,
            variable_float_agg: e.variable_float_agg.get(&settings)?,
            cast_float_to_string: e.cast_float_to_string.get(&settings)?,
            cast_string_to_float: e.cast_string_to_float.get(&settings)?,
            session_time_zone: e.session_time_zone.get(&settings)?,
            join_enabled: e.join_enabled.get(&settings)?,
            parquet_enabled: e.parquet_enabled.get(&settings)?,
            orc_enabled: e.orc_enabled.get(&settings)?,
            csv_enabled: e.csv_enabled.get(&settings)?,
            batch_size_bytes: e.batch_size_bytes.get(&settings)?.0,
            concurrent_gpu_tasks: e.concurrent_gpu_tasks.get(&settings)?,
            alloc_fraction: e.alloc_fraction.get(&settings)?,
            fixup_exchange_overhead: e.fixup_exchange_overhead.get(&settings)?,
            test_enabled: e.test_enabled.get(&settings)?,
            test_allowed_non_gpu: e.test_allowed_non_gpu.get(&settings)?,
            rule_overrides,
            settings,
        })
    }

    /// Resolves settings given as key/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Resolves the `[settings]` table of a TOML document.
    ///
    /// Nested tables are flattened with `.`; arrays become comma-separated
    /// lists.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Self::new(settings_from_toml(text)?)
    }

    /// Returns a new snapshot with one setting replaced.
    pub fn with_setting(&self, key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let mut settings = self.settings.clone();
        settings.insert(key.into(), value.into());
        Self::new(settings)
    }

    /// Raw settings this snapshot was resolved from.
    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    /// Master switch.
    pub fn is_sql_enabled(&self) -> bool {
        self.sql_enabled
    }

    /// Global default for incompatible rules.
    pub fn is_incompat_enabled(&self) -> bool {
        self.incompatible_ops
    }

    /// Explain verbosity.
    pub fn explain(&self) -> ExplainMode {
        self.explain
    }

    /// Host ANSI mode.
    pub fn is_ansi_enabled(&self) -> bool {
        self.ansi_enabled
    }

    /// Whether float data may contain NaNs.
    pub fn has_nans(&self) -> bool {
        self.has_nans
    }

    /// Order-dependent float aggregations allowed.
    pub fn is_variable_float_agg_enabled(&self) -> bool {
        self.variable_float_agg
    }

    /// Float to string casts allowed.
    pub fn is_cast_float_to_string_enabled(&self) -> bool {
        self.cast_float_to_string
    }

    /// String to float casts allowed.
    pub fn is_cast_string_to_float_enabled(&self) -> bool {
        self.cast_string_to_float
    }

    /// Session time zone identifier.
    pub fn session_time_zone(&self) -> &str {
        &self.session_time_zone
    }

    /// True when the session time zone is UTC.
    pub fn is_utc(&self) -> bool {
        matches!(
            self.session_time_zone.trim().to_ascii_uppercase().as_str(),
            "UTC" | "Z" | "GMT" | "ETC/UTC" | "ETC/GMT" | "+00:00" | "UTC+00:00"
        )
    }

    /// Hash joins allowed.
    pub fn is_join_enabled(&self) -> bool {
        self.join_enabled
    }

    /// Whether scans over `format` are enabled; unknown formats are not.
    pub fn is_format_enabled(&self, format: &str) -> bool {
        match format.to_ascii_lowercase().as_str() {
            "parquet" => self.parquet_enabled,
            "orc" => self.orc_enabled,
            "csv" => self.csv_enabled,
            _ => false,
        }
    }

    /// Target batch size for row to columnar transitions.
    pub fn batch_size_bytes(&self) -> u64 {
        self.batch_size_bytes
    }

    /// Concurrent device tasks.
    pub fn concurrent_gpu_tasks(&self) -> i32 {
        self.concurrent_gpu_tasks
    }

    /// Device pool fraction.
    pub fn alloc_fraction(&self) -> f64 {
        self.alloc_fraction
    }

    /// Exchange overhead fix-up enabled.
    pub fn fixup_exchange_overhead(&self) -> bool {
        self.fixup_exchange_overhead
    }

    /// Test mode enabled.
    pub fn is_test_enabled(&self) -> bool {
        self.test_enabled
    }

    /// Names allowed to stay on the host in test mode.
    pub fn allowed_non_gpu(&self) -> &[String] {
        &self.test_allowed_non_gpu
    }

    /// Resolves a rule's enable flag.
    ///
    /// An explicit setting for `key` always wins. Otherwise incompatible
    /// rules follow `accel.sql.incompatibleOps.enabled`, rules disabled by
    /// default stay off, and everything else is on.
    pub fn is_operator_enabled(&self, key: &str, incompat: bool, disabled_by_default: bool) -> bool {
        if let Some(explicit) = self.rule_overrides.get(key) {
            return *explicit;
        }
        if incompat {
            self.incompatible_ops
        } else {
            !disabled_by_default
        }
    }

    /// Markdown table of all user-facing settings.
    pub fn help_markdown() -> String {
        let mut out = String::from("Name | Description | Default Value\n-----|-------------|--------------\n");
        for entry in entries().all() {
            if entry.is_internal() {
                continue;
            }
            let _ = writeln!(
                out,
                "<a name=\"{key}\"></a>{key}|{doc}|{default}",
                key = entry.key(),
                doc = entry.doc(),
                default = entry.default_string()
            );
        }
        out
    }
}

/// Raw settings from the `[settings]` table of a TOML document.
pub fn settings_from_toml(text: &str) -> Result<HashMap<String, String>> {
    let doc: toml::Table = text.parse()?;
    match doc.get("settings") {
        Some(value) => flatten_settings(value),
        None => Ok(HashMap::new()),
    }
}

/// Flattens a TOML settings table into raw `key = value` settings.
pub fn flatten_settings(value: &toml::Value) -> Result<HashMap<String, String>> {
    let mut settings = HashMap::new();
    flatten_toml("", value, &mut settings)?;
    Ok(settings)
}

fn flatten_toml(prefix: &str, value: &toml::Value, out: &mut HashMap<String, String>) -> Result<()> {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_toml(&path, child, out)?;
            }
        }
        toml::Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        toml::Value::Integer(v) => {
            out.insert(prefix.to_string(), v.to_string());
        }
        toml::Value::Float(v) => {
            out.insert(prefix.to_string(), v.to_string());
        }
        toml::Value::Boolean(v) => {
            out.insert(prefix.to_string(), v.to_string());
        }
        toml::Value::Array(items) => {
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    toml::Value::String(s) => parts.push(s.clone()),
                    other => parts.push(other.to_string()),
                }
            }
            out.insert(prefix.to_string(), parts.join(","));
        }
        toml::Value::Datetime(dt) => {
            return Err(OverrideError::ConfigParse {
                key: prefix.to_string(),
                value: dt.to_string(),
                expected: "scalar or list",
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve_from_empty_settings() {
        let conf = AccelConf::new(HashMap::new()).expect("defaults");
        assert!(conf.is_sql_enabled());
        assert!(!conf.is_incompat_enabled());
        assert_eq!(conf.explain(), ExplainMode::None);
        assert!(conf.is_utc());
        assert_eq!(conf.batch_size_bytes(), i32::MAX as u64);
        assert!(conf.is_format_enabled("Parquet"));
        assert!(!conf.is_format_enabled("csv"));
        assert!(!conf.is_format_enabled("avro"));
    }

    #[test]
    fn rendered_defaults_resolve_to_themselves() {
        let mut all = HashMap::new();
        for entry in entries().all() {
            let default = entry.default_string();
            let raw = HashMap::from([(entry.key().to_string(), default.clone())]);
            entry.check(&raw).unwrap_or_else(|err| panic!("{}: {err}", entry.key()));
            assert_eq!(
                entry.resolve_string(&raw).expect("resolves"),
                default,
                "{}",
                entry.key()
            );
            assert_eq!(
                entry.resolve_string(&HashMap::new()).expect("resolves"),
                default,
                "{}",
                entry.key()
            );
            all.insert(entry.key().to_string(), default);
        }
        let conf = AccelConf::new(all).expect("rendered defaults");
        let defaults = AccelConf::default();
        assert_eq!(conf.batch_size_bytes(), defaults.batch_size_bytes());
        assert_eq!(conf.explain(), defaults.explain());
        assert_eq!(conf.allowed_non_gpu(), defaults.allowed_non_gpu());
        assert_eq!(conf.is_format_enabled("csv"), defaults.is_format_enabled("csv"));
    }

    #[test]
    fn two_level_operator_default() {
        let key = "accel.sql.expression.Upper";
        let conf = AccelConf::default();
        assert!(!conf.is_operator_enabled(key, true, false));

        let global = AccelConf::from_pairs([("accel.sql.incompatibleOps.enabled", "true")])
            .expect("global flag");
        assert!(global.is_operator_enabled(key, true, false));

        let explicit_off = global.with_setting(key, "false").expect("override");
        assert!(!explicit_off.is_operator_enabled(key, true, false));

        let explicit_on = AccelConf::from_pairs([(key, "true")]).expect("override");
        assert!(explicit_on.is_operator_enabled(key, true, false));
    }

    #[test]
    fn disabled_by_default_rules_need_explicit_key() {
        let key = "accel.sql.exec.CartesianProductExec";
        let conf = AccelConf::from_pairs([("accel.sql.incompatibleOps.enabled", "true")])
            .expect("global flag");
        assert!(!conf.is_operator_enabled(key, false, true));
        assert!(conf.with_setting(key, "true").expect("override").is_operator_enabled(
            key, false, true
        ));
        assert!(conf.is_operator_enabled("accel.sql.exec.ProjectExec", false, false));
    }

    #[test]
    fn malformed_rule_key_fails_resolution() {
        let err = AccelConf::from_pairs([("accel.sql.exec.SortExec", "yes")]).unwrap_err();
        assert_eq!(err.code(), "ConfigParse");
        assert!(err.to_string().contains("accel.sql.exec.SortExec"));
    }

    #[test]
    fn validators_reject_out_of_range_values() {
        let err = AccelConf::from_pairs([("accel.memory.gpu.allocFraction", "1.2")]).unwrap_err();
        assert!(matches!(err, OverrideError::ConfigValidation { .. }));
        let err = AccelConf::from_pairs([("accel.sql.concurrentGpuTasks", "0")]).unwrap_err();
        assert!(matches!(err, OverrideError::ConfigValidation { .. }));
        let err = AccelConf::from_pairs([("accel.sql.explain", "SOME")]).unwrap_err();
        assert!(matches!(err, OverrideError::ConfigParse { .. }));
    }

    #[test]
    fn toml_settings_flatten() {
        let conf = AccelConf::from_toml_str(
            r#"
            [settings]
            "accel.sql.explain" = "NOT_ON_GPU"
            "accel.sql.batchSizeBytes" = "64m"

            [settings.accel.sql.test]
            enabled = true
            allowedNonGpu = ["SortExec", "Upper"]
            "#,
        )
        .expect("toml settings");
        assert_eq!(conf.explain(), ExplainMode::NotOnGpu);
        assert_eq!(conf.batch_size_bytes(), 64 << 20);
        assert!(conf.is_test_enabled());
        assert_eq!(conf.allowed_non_gpu(), ["SortExec", "Upper"]);
    }

    #[test]
    fn help_table_hides_internal_entries() {
        let table = AccelConf::help_markdown();
        assert!(table.contains("accel.sql.incompatibleOps.enabled"));
        assert!(table.contains("|0.9\n"));
        assert!(!table.contains("accel.sql.test.enabled"));
    }
}
