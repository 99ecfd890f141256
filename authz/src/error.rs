//! Error types for the authorization system.
//!
//! # Security Note
//! A `deny` or `defaultDeny` decision is never an error. The types here
//! describe failures of the *mechanics* of authorization (storage, lookups,
//! malformed requests), and of individual condition evaluations, which the
//! security manager swallows at the per-claim level.

use thiserror::Error;

use crate::types::SecurityAccessRequest;

/// Storage-layer failures raised by the repositories.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The requested entity does not exist.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// Saving would violate a uniqueness key.
    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    /// The entity failed its own invariants (empty realm, action, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Saving the role would make its parent graph cyclic.
    #[error("Role '{0}' would inherit from itself")]
    CyclicRole(String),

    /// The limit is already at its maximum, the increment did not happen.
    #[error("Limit exhausted for {resource} ({limit_type}): {value}/{max_allowed}")]
    LimitExhausted {
        limit_type: String,
        resource: String,
        value: i64,
        max_allowed: i64,
    },

    /// The backend failed (I/O, connection, constraint reported by the driver).
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Shorthand for [`PersistenceError::NotFound`].
    pub fn not_found(entity: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            key: key.into(),
        }
    }

    /// Shorthand for [`PersistenceError::Duplicate`].
    pub fn duplicate(entity: &'static str, key: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            key: key.into(),
        }
    }
}

/// Failures while parsing or evaluating a condition expression.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The expression could not be parsed.
    #[error("Parse error at offset {offset}: {message}")]
    Parse { offset: usize, message: String },

    /// The expression parsed but could not be evaluated.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// A `|name` transform was used that nobody registered.
    #[error("Unknown transform: {0}")]
    UnknownTransform(String),

    /// The evaluation did not finish within the configured timeout.
    #[error("Condition evaluation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A transform with side effects failed at the storage layer.
    #[error("Transform failed: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors raised by [`crate::SecurityManager::check`].
///
/// # Security Guidelines
/// - Never expose these messages to the end user verbatim; return a generic
///   "Forbidden" externally and log the full error.
/// - Every variant produced during a check carries the request for auditing.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// The request was missing a required field.
    #[error("Invalid access request: {0}")]
    InvalidRequest(String),

    /// The realm named in the request does not exist.
    #[error("Realm lookup failed for {request}")]
    RealmNotFound { request: Box<SecurityAccessRequest> },

    /// The principal named in the request does not exist in the realm.
    #[error("Principal lookup failed for {request}")]
    PrincipalNotFound { request: Box<SecurityAccessRequest> },

    /// The principal that was loaded belongs to a different realm.
    #[error("Principal realm '{principal_realm}' does not match {request}")]
    RealmMismatch {
        request: Box<SecurityAccessRequest>,
        principal_realm: String,
    },

    /// The storage layer failed while serving the check.
    #[error("Storage failure while checking {request}: {source}")]
    Persistence {
        request: Box<SecurityAccessRequest>,
        #[source]
        source: PersistenceError,
    },

    /// Catch-all for unexpected failures that should be investigated.
    #[error("Internal authorization error for {request}: {reason}")]
    Internal {
        request: Box<SecurityAccessRequest>,
        reason: String,
    },
}

impl AuthzError {
    /// The request that triggered this error, when there was one.
    pub fn request(&self) -> Option<&SecurityAccessRequest> {
        match self {
            AuthzError::InvalidRequest(_) => None,
            AuthzError::RealmNotFound { request }
            | AuthzError::PrincipalNotFound { request }
            | AuthzError::RealmMismatch { request, .. }
            | AuthzError::Persistence { request, .. }
            | AuthzError::Internal { request, .. } => Some(request),
        }
    }
}

/// Failures while reading or applying a fixture file.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid fixture: {0}")]
    Invalid(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// A specialized Result type for repository operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PersistenceError::not_found("Principal", "banking/tom");
        assert_eq!(err.to_string(), "Principal not found: banking/tom");

        let err = PersistenceError::LimitExhausted {
            limit_type: "quota".into(),
            resource: "Report".into(),
            value: 2,
            max_allowed: 2,
        };
        assert_eq!(err.to_string(), "Limit exhausted for Report (quota): 2/2");

        let err = AuthzError::InvalidRequest("action is empty".into());
        assert_eq!(err.to_string(), "Invalid access request: action is empty");
        assert!(err.request().is_none());
    }

    #[test]
    fn test_authz_error_carries_request() {
        let request = SecurityAccessRequest::new("banking", "nobody", "read", "DepositAccount");
        let err = AuthzError::PrincipalNotFound {
            request: Box::new(request.clone()),
        };

        assert_eq!(err.request(), Some(&request));
        assert!(err.to_string().contains("nobody"));
    }
}
