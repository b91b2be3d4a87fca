//! Error types for the Helm Project Operator

use std::fmt;

/// Result type for the operator
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the operator
#[derive(Debug)]
pub enum Error {
    /// Kubernetes API error
    KubeError(String),
    /// Configuration error
    ConfigError(String),
    /// Validation error
    ValidationError(String),
    /// Namespace membership could not be resolved
    ResolutionError(String),
    /// Values could not be serialized for the installer
    SerializationError(String),
    /// Leadership could not be acquired or was lost
    LeaderElectionError(String),
    /// Finalizer error
    FinalizerError(Box<kube::runtime::finalizer::Error<Error>>),
}

impl Error {
    /// Whether the work queue should retry the failed pass.
    ///
    /// Validation, configuration and serialization failures stay failed until
    /// the offending object or flag changes.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::ConfigError(_) | Error::ValidationError(_) | Error::SerializationError(_) => {
                false
            }
            Error::KubeError(_) | Error::ResolutionError(_) | Error::LeaderElectionError(_) => {
                true
            }
            Error::FinalizerError(e) => match e.as_ref() {
                kube::runtime::finalizer::Error::ApplyFailed(inner)
                | kube::runtime::finalizer::Error::CleanupFailed(inner) => inner.is_retriable(),
                _ => true,
            },
        }
    }

    /// Short label used for metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "KubeError",
            Error::ConfigError(_) => "ConfigError",
            Error::ValidationError(_) => "ValidationError",
            Error::ResolutionError(_) => "ResolutionError",
            Error::SerializationError(_) => "SerializationError",
            Error::LeaderElectionError(_) => "LeaderElectionError",
            Error::FinalizerError(_) => "FinalizerError",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::KubeError(msg) => write!(f, "Kubernetes API error: {}", msg),
            Error::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Error::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            Error::ResolutionError(msg) => write!(f, "Resolution error: {}", msg),
            Error::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Error::LeaderElectionError(msg) => write!(f, "Leader election error: {}", msg),
            Error::FinalizerError(e) => write!(f, "Finalizer error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(err: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(err))
    }
}
