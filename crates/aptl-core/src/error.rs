//! Error taxonomy for lab orchestration.

/// Errors produced while preparing, starting, or inspecting the lab.
#[derive(Debug, thiserror::Error)]
pub enum LabError {
    /// Malformed or missing configuration.
    #[error("validation error: {0}")]
    Validation(String),

    /// Required secrets absent or empty in the credential file.
    #[error("required environment variables missing or empty: {}", .0.join(", "))]
    MissingCredentials(Vec<String>),

    /// A shelled-out tool is missing, timed out, or exited non-zero.
    #[error("{tool} failed: {message}")]
    ExternalTool { tool: String, message: String },

    /// A readiness deadline elapsed.
    #[error("{service} timed out after {elapsed_secs:.0}s")]
    Timeout { service: String, elapsed_secs: f64 },

    /// A referenced unit does not exist in the runtime.
    #[error("container not found: {0}")]
    NotFound(String),

    /// The host does not meet a prerequisite.
    #[error("{setting} too low ({current} < {required}). Run: sudo sysctl -w {setting}={required}")]
    RequirementNotMet {
        setting: String,
        current: u64,
        required: u64,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LabError {
    /// Shorthand for [`LabError::ExternalTool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        LabError::ExternalTool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Whether this error denotes a missing unit.
    pub fn is_not_found(&self) -> bool {
        matches!(self, LabError::NotFound(_))
    }
}

/// Result type for lab operations.
pub type Result<T> = std::result::Result<T, LabError>;
