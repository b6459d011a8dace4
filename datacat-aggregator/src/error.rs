//! Error vocabulary for the Aggregator.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AggregatorError {
    /// Client contract violation per spec.md §7 error kind 1.
    #[error("invalid request: {message}")]
    #[diagnostic(code(datacat::aggregator::invalid_request))]
    InvalidRequest { message: String },

    /// Not-found per spec.md §7 error kind 2.
    #[error("session not found: {session_id}")]
    #[diagnostic(
        code(datacat::aggregator::not_found),
        help("The session may have already been ended and removed from the local table.")
    )]
    SessionNotFound { session_id: String },

    #[error("transport error talking to the server: {message}")]
    #[diagnostic(code(datacat::aggregator::transport))]
    Transport { message: String },
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

impl From<reqwest::Error> for AggregatorError {
    fn from(e: reqwest::Error) -> Self {
        AggregatorError::Transport { message: e.to_string() }
    }
}
