//! Error handling for the ferry crates.

use thiserror::Error;

/// The end-of-stream sentinel carried inside error envelopes.
pub const EOF_MESSAGE: &str = "EOF";

/// Error type shared by every ferry component.
///
/// Wrapped failures keep their underlying cause as an `anyhow::Error` source so
/// the full chain is available to callers that log or report it.
#[derive(Error, Debug)]
pub enum FerryError {
    #[error("invalid union: {message}")]
    InvalidUnion { message: String },

    #[error("schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },

    #[error("exchange {uid} cannot be run more than once")]
    AlreadyRun { uid: String },

    #[error("transport failure: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("peer {peer} reported an error: {message}")]
    RemotePeer { peer: String, message: String },

    #[error("mismatched types: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid data: {message}")]
    InvalidData { message: String },

    #[error("unknown type: {name}")]
    UnknownType { name: String },

    #[error("type registry is already initialized")]
    RegistryInitialized,

    #[error("codec failure: {message}")]
    Codec {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("invalid configuration: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("runner panicked: {message}")]
    RunnerPanicked { message: String },

    #[error("execution cancelled")]
    Cancelled,
}

/// Result type alias for ferry operations.
pub type Result<T> = std::result::Result<T, FerryError>;

/// Coarse grouping of errors, used to decide how a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid plan construction, reported before anything runs.
    Construction,
    /// Misuse of a single-use execution session.
    Session,
    /// Dialing, framing or peer failures.
    Transport,
    /// Operations mixing values of different declared types.
    Type,
    /// Violated row/length invariants or unresolvable data.
    Data,
    /// Bad configuration values.
    Configuration,
    /// Caller-initiated cancellation. Never reported as a failure.
    Cancellation,
    /// Unexpected internal conditions such as a panicking runner.
    Internal,
}

impl FerryError {
    /// Create an invalid union error.
    pub fn invalid_union<S: Into<String>>(message: S) -> Self {
        Self::InvalidUnion {
            message: message.into(),
        }
    }

    /// Create a schema mismatch error from renderings of both schemas.
    pub fn schema_mismatch<E: Into<String>, F: Into<String>>(expected: E, found: F) -> Self {
        Self::SchemaMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a session error for an exchange that was already run.
    pub fn already_run<S: Into<String>>(uid: S) -> Self {
        Self::AlreadyRun { uid: uid.into() }
    }

    /// Create a transport error with a custom message.
    pub fn transport_error<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transport error with a custom message and source error.
    pub fn transport_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an error relayed from a peer's error envelope.
    pub fn remote_peer<P: Into<String>, S: Into<String>>(peer: P, message: S) -> Self {
        Self::RemotePeer {
            peer: peer.into(),
            message: message.into(),
        }
    }

    /// Create a type mismatch error.
    pub fn type_mismatch<E: Into<String>, F: Into<String>>(expected: E, found: F) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an invalid data error.
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create an unknown type error.
    pub fn unknown_type<S: Into<String>>(name: S) -> Self {
        Self::UnknownType { name: name.into() }
    }

    /// Create a codec error with a custom message.
    pub fn codec_error<S: Into<String>>(message: S) -> Self {
        Self::Codec {
            message: message.into(),
            source: None,
        }
    }

    /// Create a codec error with a custom message and source error.
    pub fn codec_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::Codec {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn config_error<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with a custom message and source error.
    pub fn config_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create an error describing a captured panic.
    pub fn runner_panicked<S: Into<String>>(message: S) -> Self {
        Self::RunnerPanicked {
            message: message.into(),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            FerryError::InvalidUnion { .. } => ErrorCategory::Construction,
            FerryError::SchemaMismatch { .. } => ErrorCategory::Construction,
            FerryError::AlreadyRun { .. } => ErrorCategory::Session,
            FerryError::Transport { .. } => ErrorCategory::Transport,
            FerryError::RemotePeer { .. } => ErrorCategory::Transport,
            FerryError::Codec { .. } => ErrorCategory::Transport,
            FerryError::TypeMismatch { .. } => ErrorCategory::Type,
            FerryError::InvalidData { .. } => ErrorCategory::Data,
            FerryError::UnknownType { .. } => ErrorCategory::Data,
            FerryError::RegistryInitialized => ErrorCategory::Configuration,
            FerryError::Config { .. } => ErrorCategory::Configuration,
            FerryError::RunnerPanicked { .. } => ErrorCategory::Internal,
            FerryError::Cancelled => ErrorCategory::Cancellation,
        }
    }

    /// Check whether this error only reflects caller-initiated cancellation.
    pub fn is_cancellation(&self) -> bool {
        self.category() == ErrorCategory::Cancellation
    }

    /// Check if the failed operation may succeed when retried with a fresh session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FerryError::Transport { .. })
    }
}

impl From<std::io::Error> for FerryError {
    fn from(err: std::io::Error) -> Self {
        FerryError::transport_error_with_source(err.to_string(), err)
    }
}

impl From<serde_json::Error> for FerryError {
    fn from(err: serde_json::Error) -> Self {
        FerryError::codec_error_with_source("JSON serialization failed", err)
    }
}

/// Extension trait to attach transport context to foreign results.
pub trait TransportContext<T> {
    /// Wrap the error as a transport error with the given message.
    fn transport_context<S: Into<String>>(self, message: S) -> Result<T>;
}

impl<T, E> TransportContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn transport_context<S: Into<String>>(self, message: S) -> Result<T> {
        self.map_err(|e| FerryError::transport_error_with_source(message, e))
    }
}
