//! Error types for the modelship deployment engine
//!
//! Errors are structured with fields to aid debugging in production.
//! Reconciliation errors carry the resource kind and name they failed on,
//! and multi-target failures are aggregated rather than short-circuited.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for modelship operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A single resource failed to reconcile
    #[error("failed to reconcile {kind} {name}: {source}")]
    Reconcile {
        /// Resource kind (Deployment, Service, ...)
        kind: String,
        /// Resource name
        name: String,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// Validation error, raised before any cluster call is made
    #[error("validation error for {subject}: {message}")]
    Validation {
        /// What was being validated (deployment name, target, config key)
        subject: String,
        /// Description of what's invalid
        message: String,
    },

    /// A persisted entity does not exist
    #[error("{entity} {id} not found")]
    NotFound {
        /// Entity type (deployment, revision, cluster, ...)
        entity: String,
        /// Entity identity
        id: u64,
    },

    /// Persistence layer error
    #[error("store error [{operation}]: {message}")]
    Store {
        /// Store operation that failed
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// Optimistic rollout-token check failed
    #[error("rollout conflict on deployment {deployment}: {message}")]
    Conflict {
        /// Deployment name
        deployment: String,
        /// Description of the conflict
        message: String,
    },

    /// The rollout token changed underneath an in-flight rollout
    #[error("stale rollout for deployment {deployment}: token {expected} was superseded")]
    StaleRollout {
        /// Deployment name
        deployment: String,
        /// Token this rollout stamped on its resources
        expected: String,
    },

    /// Informer registry lock could not be acquired within the bounded wait
    #[error("timed out acquiring informer registry lock for {key}")]
    LockTimeout {
        /// Informer key that was requested
        key: String,
    },

    /// Informer initial list/watch did not complete in time
    #[error("informer for {key} did not sync: {message}")]
    SyncTimeout {
        /// Informer key that was requested
        key: String,
        /// Description of what failed
        message: String,
    },

    /// Several independent operations failed
    #[error("{}", join_messages(.0))]
    Aggregate(Vec<Error>),

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Configuration error
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "orchestrator", "syncer")
        context: String,
    },
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            subject: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a named subject
    pub fn validation_for(subject: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            subject: subject.into(),
            message: msg.into(),
        }
    }

    /// Wrap an error with the resource kind and name it failed on
    pub fn reconcile(kind: impl Into<String>, name: impl Into<String>, source: Error) -> Self {
        Self::Reconcile {
            kind: kind.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// Create a not-found error for a persisted entity
    pub fn not_found(entity: impl Into<String>, id: u64) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id,
        }
    }

    /// Create a store error
    pub fn store(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
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

    /// Collapse a list of errors into one.
    ///
    /// Returns `None` for an empty list and the error itself for a single one.
    pub fn aggregate(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(errors)),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation, configuration and serialization errors need a spec or
    /// config change. Kubernetes errors depend on the HTTP status.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Reconcile { source, .. } => source.is_retryable(),
            Error::Validation { .. } => false,
            Error::NotFound { .. } => false,
            Error::Store { .. } => true,
            Error::Conflict { .. } => true,
            Error::StaleRollout { .. } => false,
            Error::LockTimeout { .. } => true,
            Error::SyncTimeout { .. } => true,
            Error::Aggregate(errors) => errors.iter().all(Error::is_retryable),
            Error::Serialization { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this is a Kubernetes 404 response
    pub fn is_kube_not_found(&self) -> bool {
        kube_status(self) == Some(404)
    }

    /// Whether this is a Kubernetes 409 AlreadyExists/Conflict response
    pub fn is_kube_conflict(&self) -> bool {
        kube_status(self) == Some(409)
    }
}

fn kube_status(err: &Error) -> Option<u16> {
    match err {
        Error::Kube {
            source: kube::Error::Api(ae),
        } => Some(ae.code),
        Error::Reconcile { source, .. } => kube_status(source),
        _ => None,
    }
}
