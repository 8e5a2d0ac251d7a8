//! Error types for animation capture

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing an animation
#[derive(Error, Debug)]
pub enum Error {
    /// Bad construction arguments (negative duration, non-positive fps, ...)
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// `advance` was called before `get_ready`
    #[error("Capture scheduler is not ready")]
    NotReady,

    /// The capture target could not be located on the page
    #[error("Can't find element by selector \"{0}\"")]
    ElementNotFound(String),

    /// A pause/resume command to the renderer failed
    #[error("Animation control failed: {0}")]
    Control(String),

    /// Image extraction failed
    #[error("Screenshot failed: {0}")]
    Capture(String),

    /// The producer failed; seen by the consumer side of the pipeline
    #[error("Capture aborted: {0}")]
    CaptureAborted(String),

    /// The pipeline was closed while a frame was still in flight
    #[error("Screenshot stream closed")]
    StreamClosed,

    /// A sink failed to write a frame
    #[error("Failed to write frame {index}: {reason}")]
    WriteError { index: u64, reason: String },

    /// A sink failed to finalize its output
    #[error("Failed to finalize output: {0}")]
    FinalizeError(String),

    /// Failed to initialize the renderer
    #[error("Renderer initialization failed: {0}")]
    InitializationError(String),

    /// Failed to load a URL
    #[error("Failed to load URL: {0}")]
    LoadError(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// CDP-specific error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        // alternate form keeps the context chain
        Error::CdpError(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}
