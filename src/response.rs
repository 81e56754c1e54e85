//! Response metadata and the typed response wrapper.

use std::borrow::Cow;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};

/// Response metadata plus the raw body as observed on the wire.
///
/// `Parts` is attached to successful responses and to transport/HTTP error
/// variants alike, so status and headers stay inspectable on every outcome
/// that produced a response.
#[derive(Debug, Clone)]
pub struct Parts {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub url: Url,
    pub body: Bytes,
}

impl Parts {
    /// Whether the status is in the 2xx success class.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The raw body, lossily decoded as UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// A header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A decoded response body together with its [`Parts`].
#[derive(Debug, Clone)]
pub struct Response<T> {
    pub body: T,
    pub parts: Parts,
}

impl<T> Response<T> {
    pub fn status(&self) -> StatusCode {
        self.parts.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn into_body(self) -> T {
        self.body
    }
}
