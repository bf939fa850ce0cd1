use thiserror::Error;

/// Canonical error type for lifecycle and query operations.
///
/// Variants fall into three groups: input errors (`SchemaViolation`) that are
/// never retried, transient errors (`Conflict`, `Unavailable`) that the owning
/// coordinator retries before surfacing, and precondition errors
/// (`IndexNotFound`, `CollectionNotLoaded`, `CollectionInUse`) that require the
/// caller to change state first.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity was not found in the metadata store.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"collection"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Entity already exists and cannot be created again.
    #[error("{entity} `{id}` already exists")]
    AlreadyExists {
        /// Entity type name (e.g. `"collection"`).
        entity: &'static str,
        /// Identifier that conflicts.
        id: String,
    },

    /// Input does not match the collection schema. The whole batch is rejected.
    #[error("schema violation on field `{field}`: {message}")]
    SchemaViolation {
        /// Offending field (or `"<schema>"` for schema-level problems).
        field: String,
        /// Human-readable explanation.
        message: String,
    },

    /// A compare-and-transition observed a stale state.
    #[error("conflict on {entity} `{id}`: expected {expected}, found {actual}")]
    Conflict {
        /// Entity type name (e.g. `"segment"`).
        entity: &'static str,
        /// Identifier of the contended entity.
        id: String,
        /// State or version the caller expected.
        expected: String,
        /// State or version actually stored.
        actual: String,
    },

    /// A dependency (timestamp oracle, durable storage) is unreachable.
    #[error("{dependency} unavailable: {message}")]
    Unavailable {
        /// Name of the unavailable dependency.
        dependency: &'static str,
        /// Human-readable details.
        message: String,
    },

    /// Deadline elapsed while waiting on an asynchronous pipeline stage.
    #[error("timed out after {elapsed_ms}ms waiting for {operation}")]
    Timeout {
        /// What the caller was waiting for.
        operation: String,
        /// Milliseconds spent before giving up.
        elapsed_ms: u64,
    },

    /// The requested index does not exist (or was superseded).
    #[error("index `{index}` not found on field `{field}` of collection `{collection}`")]
    IndexNotFound {
        /// Collection name.
        collection: String,
        /// Field name.
        field: String,
        /// Requested index name (or `"<any>"`).
        index: String,
    },

    /// The collection has no query-serving replica.
    #[error("collection `{collection}` is not loaded")]
    CollectionNotLoaded {
        /// Collection name.
        collection: String,
    },

    /// The collection is still loaded and cannot be dropped or re-indexed.
    #[error("collection `{collection}` is in use: {message}")]
    CollectionInUse {
        /// Collection name.
        collection: String,
        /// Current vs. required state.
        message: String,
    },

    /// Permanent failure after retries were exhausted; requires a re-trigger.
    #[error("{operation} failed permanently: {message}")]
    Failed {
        /// Failed pipeline stage (e.g. `"flush"`, `"index build"`).
        operation: &'static str,
        /// Last observed error.
        message: String,
    },

    /// Operation violates state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },
}

impl CoreError {
    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `AlreadyExists` variant.
    #[must_use]
    pub fn already_exists(entity: &'static str, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            entity,
            id: id.into(),
        }
    }

    /// Creates a `SchemaViolation` variant.
    #[must_use]
    pub fn schema_violation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaViolation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a `Conflict` variant.
    #[must_use]
    pub fn conflict(
        entity: &'static str,
        id: impl ToString,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Creates an `Unavailable` variant.
    #[must_use]
    pub fn unavailable(dependency: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            dependency,
            message: message.into(),
        }
    }

    /// Creates a `Timeout` variant.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Creates an `IndexNotFound` variant.
    #[must_use]
    pub fn index_not_found(
        collection: impl Into<String>,
        field: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self::IndexNotFound {
            collection: collection.into(),
            field: field.into(),
            index: index.into(),
        }
    }

    /// Creates a `CollectionNotLoaded` variant.
    #[must_use]
    pub fn not_loaded(collection: impl Into<String>) -> Self {
        Self::CollectionNotLoaded {
            collection: collection.into(),
        }
    }

    /// Creates a `CollectionInUse` variant.
    #[must_use]
    pub fn in_use(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CollectionInUse {
            collection: collection.into(),
            message: message.into(),
        }
    }

    /// Creates a `Failed` variant.
    #[must_use]
    pub fn failed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            operation,
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for transient errors the owning coordinator may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Unavailable { .. })
    }

    /// Short machine-readable reason code, used as a metrics label.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::SchemaViolation { .. } => "schema_violation",
            Self::Conflict { .. } => "conflict",
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::IndexNotFound { .. } => "index_not_found",
            Self::CollectionNotLoaded { .. } => "collection_not_loaded",
            Self::CollectionInUse { .. } => "collection_in_use",
            Self::Failed { .. } => "failed",
            Self::InvalidState { .. } => "invalid_state",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CoreError::conflict("segment", 7, "Growing", "Sealed").is_retryable());
        assert!(CoreError::unavailable("timestamp oracle", "down").is_retryable());
        assert!(!CoreError::schema_violation("vec", "bad dim").is_retryable());
        assert!(!CoreError::not_loaded("c").is_retryable());
        assert!(!CoreError::timeout("flush", std::time::Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_error_messages_carry_detail() {
        let err = CoreError::conflict("segment", 42, "Growing", "Sealed");
        assert_eq!(
            err.to_string(),
            "conflict on segment `42`: expected Growing, found Sealed"
        );

        let err = CoreError::in_use("books", "collection is loaded; release it first");
        assert!(err.to_string().contains("release it first"));
        assert_eq!(err.code(), "collection_in_use");
    }

    #[test]
    fn test_every_constructor_has_a_distinct_code() {
        let errors = [
            CoreError::not_found("collection", "books"),
            CoreError::already_exists("collection", "books"),
            CoreError::schema_violation("vec", "bad dim"),
            CoreError::conflict("segment", 1, "Growing", "Sealed"),
            CoreError::unavailable("timestamp oracle", "down"),
            CoreError::timeout("flush", std::time::Duration::from_secs(1)),
            CoreError::index_not_found("books", "vec", "vec_flat"),
            CoreError::not_loaded("books"),
            CoreError::in_use("books", "loaded"),
            CoreError::failed("persist", "disk full"),
            CoreError::invalid_state("bad"),
            CoreError::internal("oops"),
        ];
        let codes: std::collections::HashSet<_> = errors.iter().map(CoreError::code).collect();
        assert_eq!(codes.len(), errors.len());
    }
}
