//! Error types for the DNS extension lifecycle controller
//!
//! Errors are structured with fields to aid debugging in production.
//! The controller classifies every failure through [`Error::is_retryable`]:
//! retryable errors are requeued with backoff, everything else is surfaced
//! in the extension status and waits for a spec change.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Network or API hiccup that is expected to resolve on retry
    #[error("transient error for {extension}: {message}")]
    Transient {
        /// Identity of the extension being processed
        extension: String,
        /// Description of what failed
        message: String,
    },

    /// Malformed configuration that requires a spec correction
    #[error("configuration error for {extension}: {message}")]
    PermanentConfig {
        /// Identity of the extension with invalid configuration
        extension: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.providerConfig.target")
        field: Option<String>,
    },

    /// Finalizer release attempted while managed objects remain
    #[error("precondition failed for {extension}: {message}")]
    PreconditionFailed {
        /// Identity of the extension
        extension: String,
        /// Description of the violated precondition
        message: String,
    },

    /// An object expected to exist is gone
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object
        kind: String,
        /// Name (or namespace/name) of the missing object
        name: String,
    },

    /// Manifest rendering failed
    #[error("render error in template set {template_set}: {message}")]
    Render {
        /// Template set being rendered
        template_set: String,
        /// Description of what failed
        message: String,
        /// True when the values are at fault and retrying cannot help
        permanent: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "queue", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a transient error without extension context
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient {
            extension: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a transient error for a specific extension
    pub fn transient_for(extension: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Transient {
            extension: extension.into(),
            message: msg.into(),
        }
    }

    /// Create a permanent configuration error without extension context
    pub fn permanent_config(msg: impl Into<String>) -> Self {
        Self::PermanentConfig {
            extension: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a permanent configuration error for a specific extension
    pub fn permanent_config_for(extension: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PermanentConfig {
            extension: extension.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a permanent configuration error with a field path
    pub fn permanent_config_for_field(
        extension: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::PermanentConfig {
            extension: extension.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a precondition failure for a specific extension
    pub fn precondition_failed(extension: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            extension: extension.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a render error caused by the values (not retried)
    pub fn render_permanent(template_set: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            template_set: template_set.into(),
            message: msg.into(),
            permanent: true,
        }
    }

    /// Create a render error caused by template I/O (retried)
    pub fn render_transient(template_set: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            template_set: template_set.into(),
            message: msg.into(),
            permanent: false,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Configuration and serialization errors are not retryable (require a
    /// spec fix). A failed precondition is retried: the next attempt re-runs
    /// teardown before trying the release again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                // Conflicts and throttling resolve on their own; other 4xx don't
                kube::Error::Api(ae) => {
                    !(400..500).contains(&ae.code) || ae.code == 409 || ae.code == 429
                }
                _ => true,
            },
            Error::Transient { .. } => true,
            Error::PermanentConfig { .. } => false,
            Error::PreconditionFailed { .. } => true,
            Error::NotFound { .. } => false,
            Error::Render { permanent, .. } => !permanent,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Check if this error means the target object does not exist
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 404,
            Error::NotFound { .. } => true,
            _ => false,
        }
    }

    /// Get the extension identity if this error is associated with one
    pub fn extension(&self) -> Option<&str> {
        match self {
            Error::Transient { extension, .. } => Some(extension),
            Error::PermanentConfig { extension, .. } => Some(extension),
            Error::PreconditionFailed { extension, .. } => Some(extension),
            _ => None,
        }
    }
}
