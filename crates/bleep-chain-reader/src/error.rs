use std::time::Duration;

use thiserror::Error;

/// Failure talking to a node. Always distinct from an invariant violation:
/// a `ReadError` says nothing about the chain, only about the channel.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("request failed with response code: {code} with response body {body}")]
    Status { code: u16, body: String },

    #[error("malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("could not parse {field}: {reason}")]
    Parse { field: &'static str, reason: String },
}

impl ReadError {
    /// Connection-level failures and timeouts mean the node is unreachable
    /// for now; the rest mean it answered with something unusable.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ReadError::Connection { .. } | ReadError::Timeout { .. })
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return ReadError::Timeout {
                operation: "http request",
                timeout,
            };
        }
        if err.is_decode() {
            return ReadError::Decode {
                url: url.to_string(),
                reason: err.to_string(),
            };
        }
        ReadError::Connection {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
