//! Slack client error types.

use thiserror::Error;

/// Errors produced by the Slack Web API client.
#[derive(Debug, Error)]
pub enum SlackError {
    /// Building or sending the HTTP request failed.
    #[error("slack request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The API answered with a non-success HTTP status.
    #[error("slack api {method} returned status {status}")]
    Status {
        method: &'static str,
        status: reqwest::StatusCode,
    },

    /// The API answered `"ok": false` with an error code.
    #[error("slack api {method} failed: {error}")]
    Api { method: &'static str, error: String },

    /// A required field was missing from an otherwise-ok response.
    #[error("slack api {method} response missing {field}")]
    MissingField {
        method: &'static str,
        field: &'static str,
    },
}
