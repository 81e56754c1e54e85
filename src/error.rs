//! Error types for reqx.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use thiserror::Error;

use crate::response::Parts;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// The requested verb is outside the supported set. Detected before any
    /// network I/O.
    #[error("unsupported method {0:?}")]
    UnsupportedMethod(String),

    /// Network, DNS, TLS or cancellation failure surfaced by the underlying
    /// client. Carries whatever response parts were observed before the
    /// failure, if any.
    #[error("transport error: {source}")]
    Transport {
        #[source]
        source: reqwest::Error,
        parts: Option<Parts>,
    },

    /// A non-2xx response, mapped through the default constructor. Clients
    /// with a custom error mapper produce their own variant instead.
    #[error(transparent)]
    Http(#[from] HttpError),

    /// The response body failed to decode into the requested type. Carries
    /// the response parts so status, headers and the raw body stay
    /// inspectable for diagnostics.
    #[error("response decode failed: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        parts: Option<Parts>,
    },

    #[error("body serialization failed: {0}")]
    Body(#[source] Arc<serde_json::Error>),

    /// An invalid header name or value recorded during option application
    /// and surfaced before the request is sent.
    #[error("invalid header: {0}")]
    Header(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Free-form error for custom error mappers and hooks.
    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// The response parts attached to this error, when a response was
    /// observed before the failure.
    pub fn response(&self) -> Option<&Parts> {
        match self {
            Error::Transport { parts, .. } => parts.as_ref(),
            Error::Http(err) => Some(&err.parts),
            Error::Decode { parts, .. } => parts.as_ref(),
            _ => None,
        }
    }
}

/// Default structured error for non-2xx responses.
#[derive(Debug, Clone, Error)]
#[error("http {status} {reason}")]
pub struct HttpError {
    pub status: u16,
    pub reason: String,
    pub parts: Parts,
}

impl HttpError {
    pub(crate) fn new(parts: Parts) -> Self {
        let status = parts.status.as_u16();
        let reason = parts
            .status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string();
        Self {
            status,
            reason,
            parts,
        }
    }

    /// Raw response body bytes as observed on the wire.
    pub fn body(&self) -> &Bytes {
        &self.parts.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }
}
