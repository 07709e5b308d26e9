//! Outcome of an orchestration run or a single runtime action.

use serde::{Deserialize, Serialize};

/// Result of a lab lifecycle operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabResult {
    /// Whether the operation succeeded.
    pub success: bool,

    /// Human-readable summary (empty on failure).
    pub message: String,

    /// Most specific error collected (empty on success).
    pub error: String,
}

impl LabResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: String::new(),
            error: error.into(),
        }
    }
}
