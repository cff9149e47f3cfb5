use reqwest::StatusCode;
use thiserror::Error;

/// Top-level error type for telefeed.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid client configuration, such as a bad endpoint URL.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP transport failure. The underlying error is stripped of its URL
    /// before being stored so the bot token never leaks into messages.
    #[error("http request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The API answered with a non-2xx status code.
    #[error("bad api response code: {0}")]
    Status(StatusCode),

    /// The API answered with a well-formed envelope carrying `ok = false`.
    #[error("non-ok api response: {description:?} (code {code})")]
    Api { description: String, code: i64 },

    /// The response violated the expected envelope or update shape.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Malformed JSON in a response body.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// A caller-supplied consumer failed; propagated verbatim.
    #[error("update consumer failed: {0}")]
    Consumer(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The operation was cancelled before completing.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap a caller-supplied consumer failure.
    pub fn consumer(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Consumer(err.into())
    }

    /// Default recoverability classification used by the long-poll driver:
    /// transport faults and remote failures are worth retrying, local parse
    /// and consumer failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Status(_) | Error::Api { .. })
    }
}
