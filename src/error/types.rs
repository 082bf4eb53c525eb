//! Error types for the VMess auth daemon.

use thiserror::Error;

/// Main error type for the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Authentication errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },
}

/// Authentication error kinds.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    /// The user carries no usable VMess credential.
    #[error("Account type error for user '{email}': {account_kind}")]
    AccountType { email: String, account_kind: String },

    #[error("Invalid token: {message}")]
    InvalidToken { message: String },
}

impl DaemonError {
    pub(crate) fn account_type(email: &str, account_kind: impl Into<String>) -> Self {
        DaemonError::Auth {
            kind: AuthErrorKind::AccountType {
                email: email.to_string(),
                account_kind: account_kind.into(),
            },
        }
    }
}

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
