//! Error vocabulary for the Session Store.

use miette::Diagnostic;
use thiserror::Error;

/// Errors the Store's operations can surface. HTTP handlers map these to
/// the status codes in spec.md §7.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Not-found per spec.md §7 error kind 2: no side effect, 404.
    #[error("session not found: {session_id}")]
    #[diagnostic(
        code(datacat::store::not_found),
        help("Ensure the session was created and has not been cleaned up by retention policy.")
    )]
    SessionNotFound { session_id: String },

    /// Persistence failure per spec.md §7 error kind 4: logged, not rolled
    /// back — the in-memory table keeps the mutation and will be
    /// re-persisted on the session's next write.
    #[error("backend error: {message}")]
    #[diagnostic(
        code(datacat::store::backend),
        help("Check that the SQLite database file is writable and not locked by another process.")
    )]
    Backend { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(code(datacat::store::serde))]
    Serde { message: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde {
            message: e.to_string(),
        }
    }
}
