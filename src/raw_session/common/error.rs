use std::path::PathBuf;

use thiserror::Error;

/// Failures surfaced by [`Session`](crate::raw_session::Session) operations.
///
/// Ordinary decode failures are not errors: engines report them as
/// [`StatusCode`](crate::raw_session::StatusCode) return values.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{operation} received an invalid argument, {parameter} must be {expected}.")]
    InvalidArgument {
        operation: &'static str,
        parameter: &'static str,
        expected: &'static str,
    },

    #[error("{operation} received a null argument, {parameter} is required.")]
    MissingArgument {
        operation: &'static str,
        parameter: &'static str,
    },

    #[error("Thumbnail is not unpacked or is null.")]
    ThumbnailUnavailable,

    /// The engine failed in a way it could not report as a status code.
    /// `message` is the engine's own text, unchanged.
    #[error("{message}")]
    Engine {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} cannot run: the decode engine failed during an earlier call, recycle the session first")]
    EnginePoisoned { operation: &'static str },

    #[error("Failed to initialize decode engine: {0}")]
    EngineInit(String),

    #[error("Metadata does not conform to the expected shape: {0}")]
    MetadataShape(#[from] serde_json::Error),
}

impl SessionError {
    pub(crate) fn invalid(
        operation: &'static str,
        parameter: &'static str,
        expected: &'static str,
    ) -> Self {
        Self::InvalidArgument { operation, parameter, expected }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Failures inside the TIFF rendition path of the pure-Rust engine.
#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Failed to write output file {}: {source}", .path.display())]
    OutputWriteError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to encode TIFF image: {0}")]
    EncodeError(String),

    #[error("Failed to demosaic image: {0}")]
    DebayerError(String),

    #[error("Invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(usize, usize),

    #[error("No demosaic for CFA pattern {0:?}")]
    UnsupportedCfa(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
