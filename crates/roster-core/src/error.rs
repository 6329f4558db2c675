//! Error types for the roster domain.

/// The result type used throughout the roster crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bookkeeping operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record does not exist.
    ///
    /// This is the store's terminal read after a row has been deleted.
    #[error("resource not found: {guid}")]
    ResourceNotFound {
        /// Guid of the record that was not found.
        guid: String,
    },

    /// An invalid lifecycle transition was attempted.
    #[error("invalid state transition: {from} -> {to} ({reason})")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// A persisted payload could not be decoded.
    #[error("failed to decode persisted payload: {message}")]
    Decode {
        /// Description of the decode failure.
        message: String,
    },

    /// A value could not be serialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a not-found error for the given guid.
    #[must_use]
    pub fn not_found(guid: impl Into<String>) -> Self {
        Self::ResourceNotFound { guid: guid.into() }
    }

    /// Creates a decode error.
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if this is the store's not-found error.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceNotFound { .. })
    }
}
