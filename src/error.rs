use std::path::PathBuf;
use thiserror::Error;

/// Failure classes that callers and tests need to tell apart.
/// Everything else travels as a plain `anyhow::Error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid template mapping {path}: {reason}")]
    InvalidMapping { path: PathBuf, reason: String },

    #[error("templates directory not found: {0}")]
    TemplatesDirMissing(PathBuf),

    #[error("invalid templates: {0}")]
    TemplateParse(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("failed to render '{template}' for {device}: {reason}")]
    Render {
        device: String,
        template: String,
        reason: String,
    },

    #[error("lab not found: {0}")]
    LabNotFound(String),

    #[error("testbed has no jump host entry '{0}'")]
    MissingJumpHost(String),

    #[error("device not in testbed: {0}")]
    DeviceNotInTestbed(String),

    #[error("no usable connection for device {0}")]
    NoConnection(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("console: {0}")]
    Console(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
