use thiserror::Error;

/// Errors that abort a chunk (or a whole extraction run).
///
/// Per-frame degeneracies (empty foreground, missing pose) are never errors;
/// they surface as `None` in the extracted features and scalars.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("{what} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("flip classifier failed: {0}")]
    Classifier(String),

    #[error("onnx runtime error: {0}")]
    Onnx(#[from] ort::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ExtractError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
