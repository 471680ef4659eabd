//! Unified error types and result handling.
//!
//! Every fallible operation in the crate returns [`Result`]. Variants carry the
//! identifiers involved so callers can build useful messages without string parsing.

use thiserror::Error;

/// Coarse classification of an [`Error`], matching how callers are expected to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input, rejected before any write. Retry with corrected input.
    Validation,
    /// A referenced pool, user, membership or withdrawal does not exist.
    NotFound,
    /// Withdrawal blocked until every group member agrees to the penalty policy.
    ConsensusNotReached,
    /// Optimistic retries on the membership row were exhausted.
    ConcurrencyConflict,
    /// Storage, I/O or configuration failure.
    Internal,
}

/// Application error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Amount was zero, negative or otherwise unusable.
    #[error("Invalid amount: {amount} cents")]
    InvalidAmount {
        /// The rejected amount in cents
        amount: i64,
    },

    /// Input failed validation.
    #[error("Validation error: {message}")]
    Validation {
        /// What was wrong
        message: String,
    },

    /// Pool does not exist.
    #[error("Pool not found: {pool_id}")]
    PoolNotFound {
        /// Requested pool id
        pool_id: i64,
    },

    /// User does not exist or has been disabled.
    #[error("User not found: {user_id}")]
    UserNotFound {
        /// Requested user id
        user_id: i64,
    },

    /// The user is not a member of the pool.
    #[error("User {user_id} is not a member of pool {pool_id}")]
    MembershipNotFound {
        /// Pool id
        pool_id: i64,
        /// User id
        user_id: i64,
    },

    /// Withdrawal does not exist.
    #[error("Withdrawal not found: {withdrawal_id}")]
    WithdrawalNotFound {
        /// Requested withdrawal id
        withdrawal_id: i64,
    },

    /// Withdrawal larger than what the member has contributed.
    #[error("Insufficient funds: {available} cents available, {requested} cents requested")]
    InsufficientFunds {
        /// Cents available to the member
        available: i64,
        /// Cents requested
        requested: i64,
    },

    /// Group penalty policy requires unanimous agreement first.
    #[error("Consensus not reached: {agreed} of {total} members agreed")]
    ConsensusNotReached {
        /// Members that have agreed
        agreed: u64,
        /// Members in the pool
        total: u64,
    },

    /// The membership row kept changing under us.
    #[error("Concurrent update conflict after {attempts} attempts")]
    ConcurrencyConflict {
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Withdrawal status change not allowed from the current status.
    #[error("Invalid withdrawal status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// What was wrong
        message: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable error.
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    /// Integer conversion overflowed.
    #[error("Integer conversion error: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),
}

impl Error {
    /// Builds a [`Error::Validation`] from anything printable.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::Validation { .. }
            | Self::InsufficientFunds { .. }
            | Self::InvalidStatusTransition { .. } => ErrorKind::Validation,
            Self::PoolNotFound { .. }
            | Self::UserNotFound { .. }
            | Self::MembershipNotFound { .. }
            | Self::WithdrawalNotFound { .. } => ErrorKind::NotFound,
            Self::ConsensusNotReached { .. } => ErrorKind::ConsensusNotReached,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::Config { .. }
            | Self::Database(_)
            | Self::Io(_)
            | Self::EnvVar(_)
            | Self::IntConversion(_) => ErrorKind::Internal,
        }
    }

    /// Whether the whole request may simply be sent again.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConcurrencyConflict)
    }
}

/// Convenience `Result` type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::InvalidAmount { amount: 0 }.kind(), ErrorKind::Validation);
        assert_eq!(Error::PoolNotFound { pool_id: 1 }.kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::ConsensusNotReached { agreed: 2, total: 3 }.kind(),
            ErrorKind::ConsensusNotReached
        );
        assert!(Error::ConcurrencyConflict { attempts: 3 }.is_retryable());
        assert!(!Error::validation("nope").is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = Error::ConsensusNotReached { agreed: 2, total: 3 };
        assert_eq!(err.to_string(), "Consensus not reached: 2 of 3 members agreed");

        let err = Error::MembershipNotFound {
            pool_id: 4,
            user_id: 9,
        };
        assert_eq!(err.to_string(), "User 9 is not a member of pool 4");
    }
}
