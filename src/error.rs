#![forbid(unsafe_code)]

use thiserror::Error;

/// Result alias used throughout the override pipeline.
pub type Result<T> = std::result::Result<T, OverrideError>;

/// Errors raised while resolving configuration or rewriting a plan.
///
/// Ineligibility is not an error: a node that cannot run on the GPU
/// carries reasons on its meta and falls back to host execution.
#[derive(Debug, Error)]
pub enum OverrideError {
    /// A raw setting could not be converted to the declared type.
    #[error("{key} should be {expected}, but was '{value}'")]
    ConfigParse {
        /// Setting key.
        key: String,
        /// Raw value that failed to parse.
        value: String,
        /// Human-readable name of the declared type.
        expected: &'static str,
    },
    /// A parsed setting violated its validator.
    #[error("invalid value for {key}: {message}")]
    ConfigValidation {
        /// Setting key.
        key: String,
        /// Validator message.
        message: String,
    },
    /// Conversion was requested for a node that was tagged ineligible.
    #[error("cannot convert {node} to GPU: {}", reasons.join("; "))]
    ConversionInvariant {
        /// Node description.
        node: String,
        /// Reasons recorded during tagging.
        reasons: Vec<String>,
    },
    /// Test mode found a node that stayed on the host without being allowed to.
    #[error("part of the plan is not on the GPU: {node} because {}", reasons.join("; "))]
    NotOnGpu {
        /// Node description.
        node: String,
        /// Reasons recorded during tagging.
        reasons: Vec<String>,
    },
    /// A strict registration hit an existing key.
    #[error("a rule is already registered for {key}")]
    DuplicateRule {
        /// Fully qualified class name.
        key: String,
    },
    /// Explain mode string was not recognized.
    #[error("explain mode '{value}' must be ALL, NONE, or NOT_ON_GPU")]
    InvalidExplainMode {
        /// Supplied value.
        value: String,
    },
    /// Host plan input was structurally invalid.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    /// Settings document was not valid TOML.
    #[error("failed to parse settings: {0}")]
    Toml(#[from] toml::de::Error),
    /// Plan document was not valid JSON.
    #[error("failed to parse plan: {0}")]
    Json(#[from] serde_json::Error),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl OverrideError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            OverrideError::ConfigParse { .. } => "ConfigParse",
            OverrideError::ConfigValidation { .. } => "ConfigValidation",
            OverrideError::ConversionInvariant { .. } => "ConversionInvariant",
            OverrideError::NotOnGpu { .. } => "NotOnGpu",
            OverrideError::DuplicateRule { .. } => "DuplicateRule",
            OverrideError::InvalidExplainMode { .. } => "InvalidExplainMode",
            OverrideError::InvalidPlan(_) => "InvalidPlan",
            OverrideError::Toml(_) => "Toml",
            OverrideError::Json(_) => "Json",
            OverrideError::Io(_) => "Io",
        }
    }

    /// True for errors that abort compilation because configuration is unusable.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            OverrideError::ConfigParse { .. } | OverrideError::ConfigValidation { .. }
        )
    }
}
