use std::{error::Error as _, io};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeouts, connection resets, overloaded cluster. Worth retrying.
    Transient,
    /// The cluster understood the request and refused it.
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Fatal => "fatal",
        }
    }

    pub fn retryable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("cluster returned status {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },
    #[error("mapping conflict on index `{index}`: {detail}")]
    MappingConflict { index: String, detail: String },
    #[error("index `{0}` not found")]
    IndexNotFound(String),
    #[error("alias update rejected: {0}")]
    AliasRejected(String),
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected cluster response: {0}")]
    InvalidResponse(String),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("{0}")]
    Custom(String),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Http(error) => classify_http(error),
            Self::Status { status, .. } => classify_status(*status),
            Self::Unavailable(_) => ErrorKind::Transient,
            Self::MappingConflict { .. }
            | Self::IndexNotFound(_)
            | Self::AliasRejected(_)
            | Self::InvalidResponse(_)
            | Self::Serde(_)
            | Self::Custom(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().retryable()
    }
}

/// Timeouts, refused connections and connections dropped while a request or
/// its response was in flight are transient. A status code decides the rest.
fn classify_http(error: &reqwest::Error) -> ErrorKind {
    if let Some(status) = error.status() {
        return classify_status(status.as_u16());
    }
    if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
        return ErrorKind::Transient;
    }
    if is_connection_reset(error) {
        ErrorKind::Transient
    } else {
        ErrorKind::Fatal
    }
}

fn is_connection_reset(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io_error) = cause.downcast_ref::<io::Error>()
            && matches!(
                io_error.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            )
        {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Status codes an overloaded or restarting cluster answers with.
pub fn classify_status(status: u16) -> ErrorKind {
    match status {
        408 | 429 | 502 | 503 | 504 => ErrorKind::Transient,
        _ => ErrorKind::Fatal,
    }
}
