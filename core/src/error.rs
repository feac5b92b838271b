//! Error taxonomy for the ALCD core.
//!
//! Every fallible operation in this crate returns [`AlcdError`]. Degenerate
//! classes are not errors: see [`crate::partition::DegenerateClass`].

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the partitioning, expansion and orchestration layers
#[derive(Error, Debug)]
pub enum AlcdError {
    /// Invalid proportion, invalid K, missing or malformed configuration field
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A stage's upstream artifact does not exist
    #[error("Missing input for stage {stage}: {}", path.display())]
    MissingInput { stage: String, path: PathBuf },

    /// An out-of-process collaborator exited non-zero or could not be spawned
    #[error("External tool `{tool}` failed ({status})")]
    ExternalTool {
        tool: String,
        status: String,
        /// Captured stdout followed by stderr
        output: String,
    },

    /// Malformed vector layer content
    #[error("Vector layer error in {}: {message}", path.display())]
    Vector { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AlcdError {
    pub fn config(message: impl Into<String>) -> Self {
        AlcdError::Configuration(message.into())
    }

    pub fn missing(stage: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        AlcdError::MissingInput {
            stage: stage.into(),
            path: path.into(),
        }
    }

    pub fn vector(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AlcdError::Vector {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Captured process output, if this error came from an external tool
    pub fn tool_output(&self) -> Option<&str> {
        match self {
            AlcdError::ExternalTool { output, .. } => Some(output),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AlcdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_input_message() {
        let err = AlcdError::missing("features", "/run/Intermediate/train.geojson");
        assert_eq!(
            err.to_string(),
            "Missing input for stage features: /run/Intermediate/train.geojson"
        );
    }

    #[test]
    fn test_tool_output_only_for_tools() {
        let err = AlcdError::ExternalTool {
            tool: "otbcli_ImageClassifier".to_string(),
            status: "exit status: 1".to_string(),
            output: "ERROR: model not found".to_string(),
        };
        assert_eq!(err.tool_output(), Some("ERROR: model not found"));
        assert!(AlcdError::config("bad").tool_output().is_none());
    }
}
