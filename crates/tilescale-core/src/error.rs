//! Error types for tilescale.
//!
//! Per-tile problems never surface here: the engine degrades those to a
//! classical resize. These variants cover everything that ends a run.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the tilescale library.
#[derive(Debug, Error)]
pub enum UpscaleError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // Raster decode/encode errors
    #[error("Image error: {message}")]
    Image {
        message: String,
        #[source]
        source: Option<image::ImageError>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Model errors
    #[error("Model error: {message}")]
    Model { message: String },

    #[error("Model not found: {name} (searched {} locations)", searched.len())]
    ModelNotFound { name: String, searched: Vec<PathBuf> },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch { expected: Vec<usize>, actual: Vec<usize> },

    // Engine limits
    #[error("Output of {bytes} bytes exceeds the {limit} byte limit")]
    OutputTooLarge { bytes: u64, limit: u64 },

    #[error("Upscale cancelled")]
    Cancelled,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for tilescale operations.
pub type Result<T> = std::result::Result<T, UpscaleError>;

impl From<std::io::Error> for UpscaleError {
    fn from(err: std::io::Error) -> Self {
        UpscaleError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for UpscaleError {
    fn from(err: serde_json::Error) -> Self {
        UpscaleError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<image::ImageError> for UpscaleError {
    fn from(err: image::ImageError) -> Self {
        UpscaleError::Image {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl UpscaleError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        UpscaleError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a model error from any backend error.
    pub fn model(context: &str, err: impl std::fmt::Display) -> Self {
        UpscaleError::Model {
            message: format!("{context}: {err}"),
        }
    }

    /// Create a validation error for a named parameter.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        UpscaleError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Whether this failure looks like memory exhaustion.
    ///
    /// Used by the CLI to print tile/batch size suggestions.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            UpscaleError::OutputTooLarge { .. } => true,
            UpscaleError::Model { message } => {
                let lower = message.to_lowercase();
                lower.contains("out of memory")
                    || lower.contains("failed to allocate")
                    || lower.contains("bad_alloc")
            }
            _ => false,
        }
    }
}
