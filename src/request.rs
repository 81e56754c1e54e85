//! The per-call request plan.
//!
//! Request-scoped option closures and `before` hooks edit a [`Request`]
//! value; the execution pipeline then assembles the real wire request from
//! it. Invalid inputs (a bad header name, a body that fails to serialize)
//! are recorded on the plan and surfaced before any network I/O, matching
//! the deferred-error model of the wrapped client.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::progress::UploadCallback;
use crate::retry::RetryPolicy;

/// The fixed set of supported verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl Method {
    /// Parse a method token. Anything outside the supported set is an
    /// [`Error::UnsupportedMethod`], detected before any I/O.
    pub fn parse(token: &str) -> Result<Method> {
        match token {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            other => Err(Error::UnsupportedMethod(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request body, already resolved to its wire form.
#[derive(Debug, Clone)]
pub enum Body {
    /// Attached verbatim as text.
    Text(String),
    /// Attached verbatim as raw bytes.
    Bytes(Bytes),
    /// Pre-serialized JSON, sent with a JSON content type.
    Json(Bytes),
}

impl Body {
    pub fn json<T: Serialize>(value: &T) -> Result<Body> {
        serde_json::to_vec(value)
            .map(|raw| Body::Json(raw.into()))
            .map_err(|source| Error::Body(Arc::new(source)))
    }

    pub(crate) fn len(&self) -> u64 {
        match self {
            Body::Text(text) => text.len() as u64,
            Body::Bytes(raw) | Body::Json(raw) => raw.len() as u64,
        }
    }

    pub(crate) fn as_bytes(&self) -> Bytes {
        match self {
            Body::Text(text) => Bytes::copy_from_slice(text.as_bytes()),
            Body::Bytes(raw) | Body::Json(raw) => raw.clone(),
        }
    }

    pub(crate) fn is_json(&self) -> bool {
        matches!(self, Body::Json(_))
    }
}

/// Marker wrapper: serialize the inner value as JSON.
///
/// Strings and byte sequences attach verbatim; anything else goes through
/// this wrapper so the serialization point is visible at the call site.
pub struct Json<T>(pub T);

/// Conversion into an optional request body.
///
/// `String`/`&str` attach verbatim as text, `Vec<u8>`/`&[u8]`/[`Bytes`]
/// verbatim as raw bytes, [`Json`] and [`serde_json::Value`] serialize as
/// JSON, and `()` means no body.
pub trait IntoBody {
    fn into_body(self) -> Result<Option<Body>>;
}

impl IntoBody for () {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(None)
    }
}

impl IntoBody for Body {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(Some(self))
    }
}

impl IntoBody for String {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(Some(Body::Text(self)))
    }
}

impl IntoBody for &str {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(Some(Body::Text(self.to_string())))
    }
}

impl IntoBody for Vec<u8> {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(Some(Body::Bytes(self.into())))
    }
}

impl IntoBody for &[u8] {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(Some(Body::Bytes(Bytes::copy_from_slice(self))))
    }
}

impl IntoBody for Bytes {
    fn into_body(self) -> Result<Option<Body>> {
        Ok(Some(Body::Bytes(self)))
    }
}

impl<T: Serialize> IntoBody for Json<T> {
    fn into_body(self) -> Result<Option<Body>> {
        Body::json(&self.0).map(Some)
    }
}

impl IntoBody for serde_json::Value {
    fn into_body(self) -> Result<Option<Body>> {
        Body::json(&self).map(Some)
    }
}

/// A multipart file part. The size is detected where possible: in-memory
/// parts know their length, path-backed parts are measured at send time.
#[derive(Debug, Clone)]
pub struct FilePart {
    pub(crate) name: String,
    pub(crate) file_name: String,
    pub(crate) source: FileSource,
}

#[derive(Debug, Clone)]
pub(crate) enum FileSource {
    Memory(Bytes),
    Path(PathBuf),
}

impl FilePart {
    pub fn from_path(name: impl Into<String>, path: impl Into<PathBuf>) -> FilePart {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        FilePart {
            name: name.into(),
            file_name,
            source: FileSource::Path(path),
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> FilePart {
        FilePart {
            name: name.into(),
            file_name: file_name.into(),
            source: FileSource::Memory(content.into()),
        }
    }

    /// Size when knowable without touching the file system.
    pub fn known_size(&self) -> Option<u64> {
        match &self.source {
            FileSource::Memory(raw) => Some(raw.len() as u64),
            FileSource::Path(_) => None,
        }
    }
}

pub(crate) struct ProgressSpec {
    pub(crate) callback: UploadCallback,
    pub(crate) min_interval: Option<Duration>,
}

impl fmt::Debug for ProgressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressSpec")
            .field("callback", &"{ ... }")
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

/// Mutable per-call request plan.
#[derive(Debug, Default)]
pub struct Request {
    pub(crate) headers: HeaderMap,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) path_params: HashMap<String, String>,
    pub(crate) body: Option<Body>,
    pub(crate) form: Vec<(String, String)>,
    pub(crate) files: Vec<FilePart>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) progress: Option<ProgressSpec>,
    pub(crate) output_file: Option<PathBuf>,
    pub(crate) dump: bool,
    pub(crate) error: Option<Error>,
}

impl Request {
    /// Set a header; later sets on the same name win. An invalid name or
    /// value is recorded and surfaced before the request is sent.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => self.defer_error(Error::Header(format!("{name}: {value}"))),
        }
    }

    pub fn add_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.push((key.into(), value.into()));
    }

    pub fn set_path_param(&mut self, key: impl Into<String>, value: impl ToString) {
        self.path_params.insert(key.into(), value.to_string());
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    pub fn add_form(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.form.push((key.into(), value.into()));
    }

    pub fn add_file_part(&mut self, part: FilePart) {
        self.files.push(part);
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
    }

    /// The request-level retry policy, created on first access.
    pub fn retry_mut(&mut self) -> &mut RetryPolicy {
        self.retry.get_or_insert_with(RetryPolicy::default)
    }

    pub fn set_output_file(&mut self, path: impl Into<PathBuf>) {
        self.output_file = Some(path.into());
    }

    pub fn enable_dump(&mut self) {
        self.dump = true;
    }

    pub(crate) fn set_progress(&mut self, callback: UploadCallback, min_interval: Option<Duration>) {
        self.progress = Some(ProgressSpec {
            callback,
            min_interval,
        });
    }

    /// Record a deferred error; the first one wins.
    pub fn defer_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub(crate) fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

/// Substitute `{name}` placeholders from the path params. Placeholders
/// without a matching param are left untouched.
pub(crate) fn expand_path(url: &str, params: &HashMap<String, String>) -> String {
    let mut expanded = url.to_string();
    for (key, value) in params {
        expanded = expanded.replace(&format!("{{{key}}}"), value);
    }
    expanded
}
