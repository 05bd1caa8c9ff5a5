use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::types::{ContributorId, SourceId, TableName};

/// Error type for configuration, query, submission, and IO failures.
#[derive(Debug, Error)]
pub enum FloodError {
    /// Missing, placeholder, or invalid client settings.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The source could not be reached or kept failing.
    #[error("data source '{source_id}' is unavailable: {reason}")]
    SourceUnavailable {
        /// Source that failed.
        source_id: SourceId,
        /// What went wrong.
        reason: String,
    },
    /// The source rejected a request.
    #[error("query on '{table}' rejected with HTTP {status}: {message}")]
    Query {
        /// Table the request targeted.
        table: TableName,
        /// HTTP status returned.
        status: u16,
        /// Upstream error message.
        message: String,
    },
    /// A response body could not be parsed.
    #[error("failed decoding response from '{table}': {reason}")]
    Decode {
        /// Table the response came from.
        table: TableName,
        /// Parser error.
        reason: String,
    },
    /// A submission draft failed validation; one entry per problem.
    #[error("submission rejected: {}", .0.join("; "))]
    Validation(Vec<String>),
    /// A free-form condition or group is malformed.
    #[error("invalid query condition: {0}")]
    InvalidCondition(String),
    /// A contributor used up their submission allowance.
    #[error("rate limit reached for '{contributor}'{}", retry_hint(.retry_after))]
    RateLimited {
        /// Normalized contributor key.
        contributor: ContributorId,
        /// Wait before the next attempt, when known.
        retry_after: Option<Duration>,
    },
    /// Local file input failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FloodError {
    /// Whether the failure is worth retrying (transport-level and server-side errors).
    pub fn is_transient(&self) -> bool {
        match self {
            FloodError::SourceUnavailable { .. } => true,
            FloodError::Query { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

fn retry_hint(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(" (retry in {}s)", wait.as_secs().max(1)),
        None => String::new(),
    }
}
