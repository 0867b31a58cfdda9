use accelplan::config::flatten_settings;
use accelplan::ExplainMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Named bundle of settings selected with `--profile`.
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    pub settings_file: Option<PathBuf>,
    pub explain: Option<ExplainMode>,
    pub settings: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub struct CliConfig {
    path: Option<PathBuf>,
    default_profile: Option<String>,
    profiles: HashMap<String, Profile>,
}

impl CliConfig {
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = explicit.or_else(default_config_path);
        let data = match path.as_ref() {
            Some(config_path) if config_path.exists() => read_file(config_path)?,
            _ => RawConfig::default(),
        };
        let profiles = parse_profiles(&data)?;
        Ok(Self {
            path,
            default_profile: data.default_profile,
            profiles,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn default_profile_name(&self) -> Option<&str> {
        self.default_profile.as_deref()
    }

    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.to_string(),
            })
    }

    /// Explicit profile if given, otherwise the configured default.
    pub fn select(&self, explicit: Option<&str>) -> Result<Option<&Profile>, ConfigError> {
        match explicit.or(self.default_profile_name()) {
            Some(name) => self.profile(name).map(Some),
            None => Ok(None),
        }
    }
}

impl Profile {
    /// Raw settings of this profile, the settings file first and the inline
    /// table on top.
    pub fn resolve_settings(&self) -> Result<HashMap<String, String>, ConfigError> {
        let mut settings = match &self.settings_file {
            Some(path) => read_settings_file(path)?,
            None => HashMap::new(),
        };
        settings.extend(self.settings.clone());
        if let Some(mode) = self.explain {
            settings.insert("accel.sql.explain".to_string(), mode.to_string());
        }
        Ok(settings)
    }
}

/// Reads the `[settings]` table of a standalone settings file.
pub fn read_settings_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    accelplan::config::settings_from_toml(&contents).map_err(|source| ConfigError::Settings {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_profiles(data: &RawConfig) -> Result<HashMap<String, Profile>, ConfigError> {
    let mut profiles = HashMap::new();
    for (name, raw) in &data.profiles {
        profiles.insert(name.clone(), convert_profile(name, raw)?);
    }
    if let Some(default_name) = data.default_profile.as_ref() {
        if !profiles.contains_key(default_name) {
            return Err(ConfigError::ProfileNotFound {
                name: default_name.clone(),
            });
        }
    }
    Ok(profiles)
}

fn convert_profile(name: &str, raw: &RawProfile) -> Result<Profile, ConfigError> {
    let explain = match raw.explain.as_deref() {
        Some(value) => Some(value.parse::<ExplainMode>().map_err(|_| {
            ConfigError::InvalidExplain {
                profile: name.to_string(),
                value: value.to_string(),
            }
        })?),
        None => None,
    };
    let settings = flatten_settings(&toml::Value::Table(raw.settings.clone())).map_err(|source| {
        ConfigError::ProfileSettings {
            profile: name.to_string(),
            source,
        }
    })?;
    Ok(Profile {
        name: name.to_string(),
        settings_file: raw.settings_file.clone(),
        explain,
        settings,
    })
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    profiles: HashMap<String, RawProfile>,
    #[serde(default)]
    default_profile: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawProfile {
    settings_file: Option<PathBuf>,
    explain: Option<String>,
    #[serde(default)]
    settings: toml::Table,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse CLI config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid settings in {path}: {source}")]
    Settings {
        path: PathBuf,
        source: accelplan::OverrideError,
    },
    #[error("profile '{profile}' has invalid settings: {source}")]
    ProfileSettings {
        profile: String,
        source: accelplan::OverrideError,
    },
    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String },
    #[error("profile '{profile}' explain value '{value}' is invalid")]
    InvalidExplain { profile: String, value: String },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("accelplan").join("cli.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn config_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write");
        file
    }

    #[test]
    fn loads_profiles_and_default() {
        let file = config_file(
            r#"
default_profile = "dev"

[profiles.dev]
explain = "not_on_gpu"

[profiles.dev.settings]
"accel.sql.incompatibleOps.enabled" = true
accel.sql.format.csv.enabled = true
"#,
        );
        let config = CliConfig::load(Some(file.path().to_path_buf())).expect("load");
        let profile = config.select(None).expect("select").expect("default profile");
        assert_eq!(profile.name, "dev");
        assert_eq!(profile.explain, Some(ExplainMode::NotOnGpu));
        let settings = profile.resolve_settings().expect("settings");
        assert_eq!(settings["accel.sql.incompatibleOps.enabled"], "true");
        assert_eq!(settings["accel.sql.format.csv.enabled"], "true");
        assert_eq!(settings["accel.sql.explain"], "NOT_ON_GPU");
    }

    #[test]
    fn inline_settings_override_settings_file() {
        let settings_file = config_file(
            r#"
[settings]
"accel.sql.explain" = "ALL"
"accel.sql.hasNans" = false
"#,
        );
        let config = config_file(&format!(
            "[profiles.ci]\nsettings_file = {:?}\n\n[profiles.ci.settings]\n\"accel.sql.hasNans\" = true\n",
            settings_file.path()
        ));
        let config = CliConfig::load(Some(config.path().to_path_buf())).expect("load");
        let settings = config
            .profile("ci")
            .expect("profile")
            .resolve_settings()
            .expect("settings");
        assert_eq!(settings["accel.sql.explain"], "ALL");
        assert_eq!(settings["accel.sql.hasNans"], "true");
    }

    #[test]
    fn unknown_default_profile_is_rejected() {
        let file = config_file("default_profile = \"missing\"\n");
        let err = CliConfig::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::ProfileNotFound { name } if name == "missing"));
    }

    #[test]
    fn invalid_explain_is_rejected() {
        let file = config_file("[profiles.bad]\nexplain = \"sometimes\"\n");
        let err = CliConfig::load(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidExplain { .. }));
    }

    #[test]
    fn missing_file_yields_empty_config() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CliConfig::load(Some(dir.path().join("absent.toml"))).expect("load");
        assert!(config.select(None).expect("select").is_none());
    }
}
