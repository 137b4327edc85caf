//! Error type for the rebuild progress client.
//!
//! Server internals use `anyhow`; everything a caller of
//! [`crate::client::RebuildClient`] can observe goes through [`Error`].

use thiserror::Error;

use crate::models::RebuildProgressEvent;

#[derive(Error, Debug)]
pub enum Error {
    /// The initiating request failed: network error, non-2xx status, or an
    /// unreadable response body.
    #[error("transport error: {message}")]
    Transport {
        status: Option<u16>,
        message: String,
    },

    /// The event stream closed before a `completed` or `failed` event.
    #[error("rebuild stream ended before a terminal event")]
    StreamTruncated {
        last_event: Option<Box<RebuildProgressEvent>>,
    },

    /// A single event line could not be decoded. Skipped while streaming.
    #[error("malformed progress event: {source}")]
    Parse {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The server reported a terminal failure.
    #[error("rebuild failed: {message}")]
    RebuildFailed {
        message: String,
        data: Box<RebuildProgressEvent>,
    },

    #[error("rebuild cancelled")]
    Cancelled,

    #[error("a rebuild is already in progress on this client")]
    RebuildInProgress,

    #[error("invalid rebuild filters: {0}")]
    InvalidFilters(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    pub fn http_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("server returned HTTP {status}")
        } else {
            format!("server returned HTTP {status}: {body}")
        };
        Self::Transport {
            status: Some(status),
            message,
        }
    }

    /// HTTP status of a rejected initiating request, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => *status,
            _ => None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
