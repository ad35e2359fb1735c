use thiserror::Error;

/// Result type for POS core operations
pub type PosResult<T> = Result<T, PosError>;

/// Closed error taxonomy for the POS core.
///
/// Every failure path in tap-store and tap-pos surfaces one of these; the
/// transport layer maps them to status codes. `Connection` and `Conflict`
/// are the only retryable members.
#[derive(Error, Debug)]
pub enum PosError {
    /// Tenant id is malformed, unknown, or deactivated
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),

    /// The storage engine could not be reached (transient, retryable)
    #[error("Connection failed: {0}")]
    Connection(String),

    /// No schema is registered under this entity name (programmer error)
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    /// A referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Input failed validation
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Engine-level write conflict (retryable with backoff)
    #[error("Write conflict on {0}")]
    Conflict(String),

    /// Document encode/decode failure
    #[error("Serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}

impl PosError {
    /// Create an invalid-tenant error
    pub fn invalid_tenant<S: Into<String>>(message: S) -> Self {
        Self::InvalidTenant(message.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection(message.into())
    }

    /// Create a not-found error for a named entity
    pub fn not_found<S: Into<String>>(entity: &'static str, id: S) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// Create a write-conflict error
    pub fn conflict<S: Into<String>>(target: S) -> Self {
        Self::Conflict(target.into())
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors may be re-attempted with backoff; everything else
    /// must be surfaced to the caller unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(PosError::connection("engine down").is_retryable());
        assert!(PosError::conflict("products/p1").is_retryable());

        assert!(!PosError::invalid_tenant("bad id").is_retryable());
        assert!(!PosError::not_found("product", "p1").is_retryable());
        assert!(!PosError::validation("negative quantity").is_retryable());
        assert!(!PosError::UnknownSchema("widgets".to_string()).is_retryable());
    }

    #[test]
    fn not_found_display_names_entity_and_id() {
        let err = PosError::not_found("product", "p42");
        assert_eq!(err.to_string(), "product not found: p42");
    }
}
