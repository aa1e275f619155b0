//! Error types shared across the service.
//!
//! Typed errors let the HTTP layer map failure modes to status codes
//! without parsing message strings.

/// Errors that can occur while managing the sandbox or proxying to it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The sandbox provider rejected or failed a request.
    #[error("sandbox provider error: {reason}")]
    Provider { reason: String },

    /// Network-level failure talking to the provider or the LLM.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A configured base URL could not be parsed or joined.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The LLM agent returned a malformed or unusable response.
    #[error("agent error: {reason}")]
    Agent { reason: String },

    /// File path rejected before any remote call was made.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Requested file does not exist in the sandbox.
    #[error("file not found: {path}")]
    NotFound { path: String },

    /// Requested path is a directory, not a file.
    #[error("{path} is a directory, not a file")]
    IsDirectory { path: String },

    /// Required configuration is missing (e.g. an API key).
    #[error("missing configuration: {name}")]
    MissingConfig { name: String },

    /// Timed out waiting for an in-flight restart to settle.
    #[error("timed out waiting for sandbox restart to settle")]
    RestartTimeout,
}

impl Error {
    /// Creates a `Provider` error.
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            reason: reason.into(),
        }
    }

    /// Creates an `Agent` error.
    pub fn agent(reason: impl Into<String>) -> Self {
        Self::Agent {
            reason: reason.into(),
        }
    }

    /// Creates an `InvalidPath` error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the requested file is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, Error>;
