//! Error types for the active/passive sidecar

use thiserror::Error;

/// Result type for sidecar operations
pub type Result<T> = std::result::Result<T, SidecarError>;

/// Sidecar error types
#[derive(Error, Debug)]
pub enum SidecarError {
    /// The sidecar's own pod could not be read
    #[error("failed to read pod {namespace}/{name}: {source}")]
    ObjectRead {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    /// A label update was rejected (version conflict or API error)
    #[error("failed to update pod labels: {0}")]
    ObjectWrite(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Election started before the lock descriptor was built
    #[error("lock not initialized")]
    LockNotBuilt,

    /// Election timings that cannot make progress
    #[error("Invalid election timing: {0}")]
    InvalidTiming(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Signal registration error
    #[error("Signal error: {0}")]
    SignalError(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl SidecarError {
    /// Create a pod read error
    pub fn object_read(
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: kube::Error,
    ) -> Self {
        Self::ObjectRead {
            namespace: namespace.into(),
            name: name.into(),
            source,
        }
    }

    /// Create a pod write error
    pub fn object_write(msg: impl Into<String>) -> Self {
        Self::ObjectWrite(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a timing error
    pub fn timing(msg: impl Into<String>) -> Self {
        Self::InvalidTiming(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Whether the process must terminate on this error.
    ///
    /// Only label writes are recoverable; they are logged and superseded by
    /// the next leadership transition.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::ObjectWrite(_))
    }
}
