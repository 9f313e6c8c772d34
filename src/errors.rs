//! Unified error types and result handling.
//!
//! Every store and adapter operation returns [`Result`]; nothing is allowed to
//! panic or leak a raw client error across a component boundary.

use thiserror::Error;

/// Errors produced by the SIM inventory.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested row does not exist
    #[error("Not found: {message}")]
    NotFound {
        /// What was looked for
        message: String,
    },

    /// A row with the same unique key is already stored
    #[error("Already exists: {message}")]
    AlreadyExists {
        /// Which key collided
        message: String,
    },

    /// An insert completed without producing a row
    #[error("Not created: {message}")]
    NotCreated {
        /// What failed to be created
        message: String,
    },

    /// The row exists but the guarded update affected nothing
    #[error("Not updated: {message}")]
    NotUpdated {
        /// What failed to be updated
        message: String,
    },

    /// A delete affected nothing
    #[error("Not deleted: {message}")]
    NotDeleted {
        /// What failed to be deleted
        message: String,
    },

    /// A profile vendor is not permitted for a registry
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Which permission edge is missing
        message: String,
    },

    /// An external registry or profile vendor call failed or timed out
    #[error("Adapter error ({adapter}): {message}")]
    Adapter {
        /// Name of the adapter instance
        adapter: String,
        /// Failure detail
        message: String,
    },

    /// Store-layer failure
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Unclassified failure
    #[error("System error: {message}")]
    System {
        /// Failure detail
        message: String,
    },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Failure detail
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse outcome a caller of the boundary operations gets to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing matched the request
    NotFound,
    /// The request collided with existing state
    Conflict,
    /// An external registry or profile vendor could not be reached
    UpstreamUnavailable,
    /// Anything else
    Internal,
}

impl Error {
    /// Classifies the error into the coarse outcome reported to callers.
    #[must_use]
    pub const fn outcome(&self) -> Outcome {
        match self {
            Self::NotFound { .. } => Outcome::NotFound,
            Self::AlreadyExists { .. }
            | Self::NotCreated { .. }
            | Self::NotUpdated { .. }
            | Self::NotDeleted { .. }
            | Self::Forbidden { .. } => Outcome::Conflict,
            Self::Adapter { .. } => Outcome::UpstreamUnavailable,
            Self::Database(_) | Self::System { .. } | Self::Config { .. } | Self::Io(_) => {
                Outcome::Internal
            }
        }
    }

    /// Message safe to hand to an end caller.
    ///
    /// Adapter and storage internals are replaced with a generic description.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Adapter { adapter, .. } => format!("Upstream service {adapter} is unavailable"),
            Self::Database(_) | Self::System { .. } | Self::Config { .. } | Self::Io(_) => {
                "Internal error".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Builds a [`Error::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Builds a [`Error::NotUpdated`].
    pub fn not_updated(message: impl Into<String>) -> Self {
        Self::NotUpdated {
            message: message.into(),
        }
    }

    /// Builds a [`Error::Adapter`].
    pub fn adapter(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Adapter {
            adapter: adapter.into(),
            message: message.into(),
        }
    }

    /// Maps a unique-constraint violation to [`Error::AlreadyExists`], leaving
    /// every other database error as [`Error::Database`].
    pub fn from_insert(err: sea_orm::DbErr, what: impl Into<String>) -> Self {
        match err.sql_err() {
            Some(sea_orm::SqlErr::UniqueConstraintViolation(detail)) => Self::AlreadyExists {
                message: format!("{} ({detail})", what.into()),
            },
            _ => Self::Database(err),
        }
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;
