//! The dual-target option algebra.
//!
//! An [`Opt`] carries up to two closures: one that edits client defaults
//! and one that edits a single outgoing request. The same option value can
//! therefore be handed to [`Client::new`](crate::Client::new) or to a
//! typed verb, and it does the right thing in either position. [`Opts`]
//! chains options in order; later options win over earlier ones on the
//! same field, mirroring the wrapped client's own semantics.
//!
//! The option layer itself validates nothing: an invalid header name is
//! recorded on the target and surfaced at send time. The one exception is
//! [`query`], which panics on an odd number of key/value arguments since
//! that is a programmer error with no sensible partial application.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;

use crate::client::ClientConfig;
use crate::error::Error;
use crate::progress::{bar_callback, UploadCallback, UploadInfo};
use crate::request::{FilePart, IntoBody, Json, Request};
use crate::response::Parts;
use crate::retry::{Backoff, RetryCondition};

type ClientFn = Arc<dyn Fn(&mut ClientConfig) + Send + Sync>;
type RequestFn = Arc<dyn Fn(&mut Request) + Send + Sync>;

/// A unit of configuration applying to a client, a request, or both.
#[derive(Clone, Default)]
pub struct Opt {
    client: Option<ClientFn>,
    request: Option<RequestFn>,
}

impl Opt {
    pub fn client_only(apply: impl Fn(&mut ClientConfig) + Send + Sync + 'static) -> Opt {
        Opt {
            client: Some(Arc::new(apply)),
            request: None,
        }
    }

    pub fn request_only(apply: impl Fn(&mut Request) + Send + Sync + 'static) -> Opt {
        Opt {
            client: None,
            request: Some(Arc::new(apply)),
        }
    }

    pub fn both(
        client: impl Fn(&mut ClientConfig) + Send + Sync + 'static,
        request: impl Fn(&mut Request) + Send + Sync + 'static,
    ) -> Opt {
        Opt {
            client: Some(Arc::new(client)),
            request: Some(Arc::new(request)),
        }
    }

    pub(crate) fn apply_client(&self, config: &mut ClientConfig) {
        if let Some(apply) = &self.client {
            apply(config);
        }
    }

    pub(crate) fn apply_request(&self, request: &mut Request) {
        if let Some(apply) = &self.request {
            apply(request);
        }
    }

    pub(crate) fn is_client_side(&self) -> bool {
        self.client.is_some()
    }
}

impl fmt::Debug for Opt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Opt")
            .field("client", &self.client.as_ref().map(|_| "{ ... }"))
            .field("request", &self.request.as_ref().map(|_| "{ ... }"))
            .finish()
    }
}

/// An ordered, append-only chain of options.
///
/// Application order equals chaining order. `Opts` is cheap to clone and
/// immutable once handed to a call; applying the same chain to two
/// clients or requests produces independent results.
#[derive(Clone, Default, Debug)]
pub struct Opts {
    ops: Vec<Opt>,
}

/// Start an empty option chain.
pub fn opts() -> Opts {
    Opts::default()
}

impl Opts {
    pub fn add(mut self, opt: Opt) -> Opts {
        self.ops.push(opt);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn apply_client(&self, config: &mut ClientConfig) {
        for opt in &self.ops {
            opt.apply_client(config);
        }
    }

    pub(crate) fn apply_request(&self, request: &mut Request) {
        for opt in &self.ops {
            opt.apply_request(request);
        }
    }

    pub(crate) fn has_client_side(&self) -> bool {
        self.ops.iter().any(Opt::is_client_side)
    }

    // Chaining mirrors of the free constructors below.

    pub fn header(self, name: impl Into<String>, value: impl Into<String>) -> Opts {
        self.add(header(name, value))
    }

    pub fn headers<'a>(self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opts {
        self.add(headers(pairs))
    }

    pub fn query<S: Into<String>>(self, kv: impl IntoIterator<Item = S>) -> Opts {
        self.add(query(kv))
    }

    pub fn queries<'a>(self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opts {
        self.add(queries(pairs))
    }

    pub fn timeout(self, duration: Duration) -> Opts {
        self.add(timeout(duration))
    }

    pub fn retry_count(self, count: u32) -> Opts {
        self.add(retry_count(count))
    }

    pub fn retry_fixed_interval(self, interval: Duration) -> Opts {
        self.add(retry_fixed_interval(interval))
    }

    pub fn retry_backoff(self, base: Duration, max: Duration) -> Opts {
        self.add(retry_backoff(base, max))
    }

    pub fn retry_condition(
        self,
        condition: impl Fn(Option<&Parts>, Option<&Error>) -> bool + Send + Sync + 'static,
    ) -> Opts {
        self.add(retry_condition(condition))
    }

    pub fn path(self, key: impl Into<String>, value: impl ToString) -> Opts {
        self.add(path(key, value))
    }

    pub fn paths<'a>(self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opts {
        self.add(paths(pairs))
    }

    pub fn body(self, value: impl IntoBody) -> Opts {
        self.add(body(value))
    }

    pub fn json<T: Serialize>(self, value: T) -> Opts {
        self.add(json(value))
    }

    pub fn form<'a>(self, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opts {
        self.add(form(pairs))
    }

    pub fn file(self, name: impl Into<String>, path: impl Into<PathBuf>) -> Opts {
        self.add(file(name, path))
    }

    pub fn file_bytes(
        self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        content: impl Into<bytes::Bytes>,
    ) -> Opts {
        self.add(file_bytes(name, file_name, content))
    }

    pub fn bearer(self, token: impl Into<String>) -> Opts {
        self.add(bearer(token))
    }

    pub fn basic(self, user: impl Into<String>, password: impl Into<String>) -> Opts {
        self.add(basic(user, password))
    }

    pub fn auth(self, scheme: impl Into<String>, token: impl Into<String>) -> Opts {
        self.add(auth(scheme, token))
    }

    pub fn upload_callback(self, callback: impl Fn(&UploadInfo) + Send + Sync + 'static) -> Opts {
        self.add(upload_callback(callback))
    }

    pub fn upload_callback_with_interval(
        self,
        callback: impl Fn(&UploadInfo) + Send + Sync + 'static,
        min_interval: Duration,
    ) -> Opts {
        self.add(upload_callback_with_interval(callback, min_interval))
    }

    pub fn upload_progress(self) -> Opts {
        self.add(upload_progress())
    }

    pub fn output_file(self, path: impl Into<PathBuf>) -> Opts {
        self.add(output_file(path))
    }

    pub fn dump(self) -> Opts {
        self.add(dump())
    }

    pub fn before(self, hook: impl Fn(&mut Request) + Send + Sync + 'static) -> Opts {
        self.add(before(hook))
    }

    pub fn base_url(self, url: impl Into<String>) -> Opts {
        self.add(base_url(url))
    }

    pub fn user_agent(self, value: impl Into<String>) -> Opts {
        self.add(user_agent(value))
    }

    pub fn error_mapper(self, mapper: impl Fn(&Parts) -> Error + Send + Sync + 'static) -> Opts {
        self.add(error_mapper(mapper))
    }

    pub fn middleware(
        self,
        hook: impl Fn(&mut Request) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Opts {
        self.add(middleware(hook))
    }

    pub fn after_response(
        self,
        hook: impl Fn(&Parts) -> crate::Result<()> + Send + Sync + 'static,
    ) -> Opts {
        self.add(after_response(hook))
    }

    pub fn dump_all(self) -> Opts {
        self.add(dump_all())
    }
}

impl From<Opt> for Opts {
    fn from(opt: Opt) -> Opts {
        Opts { ops: vec![opt] }
    }
}

impl From<Vec<Opt>> for Opts {
    fn from(ops: Vec<Opt>) -> Opts {
        Opts { ops }
    }
}

impl From<()> for Opts {
    fn from(_: ()) -> Opts {
        Opts::default()
    }
}

/// Set a header on a request, or a default header when building a client.
pub fn header(name: impl Into<String>, value: impl Into<String>) -> Opt {
    let name = name.into();
    let value = value.into();
    let (client_name, client_value) = (name.clone(), value.clone());
    Opt::both(
        move |config| config.set_header(&client_name, &client_value),
        move |request| request.set_header(&name, &value),
    )
}

/// Set multiple headers at once.
pub fn headers<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opt {
    let pairs: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let client_pairs = pairs.clone();
    Opt::both(
        move |config| {
            for (name, value) in &client_pairs {
                config.set_header(name, value);
            }
        },
        move |request| {
            for (name, value) in &pairs {
                request.set_header(name, value);
            }
        },
    )
}

/// Add query parameters from alternating key/value arguments.
///
/// # Panics
///
/// Panics on an odd number of arguments; a dangling key is a programmer
/// error with no sensible partial application.
pub fn query<S: Into<String>>(kv: impl IntoIterator<Item = S>) -> Opt {
    let kv: Vec<String> = kv.into_iter().map(Into::into).collect();
    if kv.len() % 2 != 0 {
        panic!("reqx: query expects an even number of key/value arguments");
    }
    let pairs: Vec<(String, String)> = kv
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    let client_pairs = pairs.clone();
    Opt::both(
        move |config| {
            for (key, value) in &client_pairs {
                config.add_query(key, value);
            }
        },
        move |request| {
            for (key, value) in &pairs {
                request.add_query(key, value);
            }
        },
    )
}

/// Add multiple query parameters.
pub fn queries<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opt {
    let pairs: Vec<String> = pairs
        .into_iter()
        .flat_map(|(k, v)| [k.to_string(), v.to_string()])
        .collect();
    query(pairs)
}

/// Per-request timeout, or the default timeout when building a client.
pub fn timeout(duration: Duration) -> Opt {
    Opt::both(
        move |config| config.set_timeout(duration),
        move |request| request.set_timeout(duration),
    )
}

/// Enable retries with the given maximum count.
pub fn retry_count(count: u32) -> Opt {
    Opt::both(
        move |config| config.retry_mut().max_retries = count,
        move |request| request.retry_mut().max_retries = count,
    )
}

/// Fixed delay between retry attempts.
pub fn retry_fixed_interval(interval: Duration) -> Opt {
    Opt::both(
        move |config| config.retry_mut().backoff = Backoff::Fixed(interval),
        move |request| request.retry_mut().backoff = Backoff::Fixed(interval),
    )
}

/// Capped exponential backoff between retry attempts.
pub fn retry_backoff(base: Duration, max: Duration) -> Opt {
    Opt::both(
        move |config| config.retry_mut().backoff = Backoff::Exponential { base, max },
        move |request| request.retry_mut().backoff = Backoff::Exponential { base, max },
    )
}

/// Custom retry condition.
pub fn retry_condition(
    condition: impl Fn(Option<&Parts>, Option<&Error>) -> bool + Send + Sync + 'static,
) -> Opt {
    let condition: RetryCondition = Arc::new(condition);
    let client_condition = condition.clone();
    Opt::both(
        move |config| config.retry_mut().condition = Some(client_condition.clone()),
        move |request| request.retry_mut().condition = Some(condition.clone()),
    )
}

/// Set a `{name}` path parameter.
pub fn path(key: impl Into<String>, value: impl ToString) -> Opt {
    let key = key.into();
    let value = value.to_string();
    Opt::request_only(move |request| request.set_path_param(key.clone(), value.clone()))
}

/// Set multiple path parameters.
pub fn paths<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opt {
    let pairs: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Opt::request_only(move |request| {
        for (key, value) in &pairs {
            request.set_path_param(key.clone(), value.clone());
        }
    })
}

/// Set the request body. Strings and byte sequences attach verbatim;
/// [`Json`]-wrapped values serialize as JSON.
///
/// Conversion happens once, here; a serialization failure is deferred onto
/// every request the option is applied to and surfaces before any I/O.
pub fn body(value: impl IntoBody) -> Opt {
    let converted = value.into_body();
    Opt::request_only(move |request| match &converted {
        Ok(Some(body)) => request.set_body(body.clone()),
        Ok(None) => {}
        // Error is not Clone; Body shares its source via Arc, the rest
        // degrades to a message.
        Err(Error::Body(source)) => request.defer_error(Error::Body(Arc::clone(source))),
        Err(other) => request.defer_error(Error::Custom(other.to_string())),
    })
}

/// Set the request body as JSON.
pub fn json<T: Serialize>(value: T) -> Opt {
    body(Json(value))
}

/// Set URL-encoded form data.
pub fn form<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Opt {
    let pairs: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Opt::request_only(move |request| {
        for (key, value) in &pairs {
            request.add_form(key.clone(), value.clone());
        }
    })
}

/// Attach a file from disk as multipart form data.
pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Opt {
    let part = FilePart::from_path(name, path);
    Opt::request_only(move |request| request.add_file_part(part.clone()))
}

/// Attach in-memory bytes as a multipart file.
pub fn file_bytes(
    name: impl Into<String>,
    file_name: impl Into<String>,
    content: impl Into<bytes::Bytes>,
) -> Opt {
    let part = FilePart::from_bytes(name, file_name, content);
    Opt::request_only(move |request| request.add_file_part(part.clone()))
}

/// Bearer token authorization.
pub fn bearer(token: impl Into<String>) -> Opt {
    auth("Bearer", token)
}

/// HTTP basic authorization.
pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Opt {
    let credentials = BASE64.encode(format!("{}:{}", user.into(), password.into()));
    auth("Basic", credentials)
}

/// Authorization header from a scheme and token.
pub fn auth(scheme: impl Into<String>, token: impl Into<String>) -> Opt {
    let value = format!("{} {}", scheme.into(), token.into());
    Opt::request_only(move |request| request.set_header("Authorization", &value))
}

/// Register an upload progress callback with a guaranteed terminal tick.
pub fn upload_callback(callback: impl Fn(&UploadInfo) + Send + Sync + 'static) -> Opt {
    let callback: UploadCallback = Arc::new(callback);
    Opt::request_only(move |request| request.set_progress(callback.clone(), None))
}

/// Like [`upload_callback`], but intermediate ticks are throttled to the
/// given minimum interval. Completion ticks always pass.
pub fn upload_callback_with_interval(
    callback: impl Fn(&UploadInfo) + Send + Sync + 'static,
    min_interval: Duration,
) -> Opt {
    let callback: UploadCallback = Arc::new(callback);
    Opt::request_only(move |request| request.set_progress(callback.clone(), Some(min_interval)))
}

/// Render a terminal progress bar for the upload.
pub fn upload_progress() -> Opt {
    Opt::request_only(|request| request.set_progress(bar_callback(), None))
}

/// Stream the response body to a file instead of into the result.
pub fn output_file(path: impl Into<PathBuf>) -> Opt {
    let path = path.into();
    Opt::request_only(move |request| request.set_output_file(path.clone()))
}

/// Log this request and its response at debug level.
pub fn dump() -> Opt {
    Opt::request_only(|request| request.enable_dump())
}

/// Run a hook against the request plan before it is sent.
pub fn before(hook: impl Fn(&mut Request) + Send + Sync + 'static) -> Opt {
    Opt::request_only(hook)
}

/// Base URL prepended to relative request URLs.
pub fn base_url(url: impl Into<String>) -> Opt {
    let url = url.into();
    Opt::client_only(move |config| config.set_base_url(url.clone()))
}

/// Default User-Agent for the client.
pub fn user_agent(value: impl Into<String>) -> Opt {
    let value = value.into();
    Opt::client_only(move |config| config.set_user_agent(value.clone()))
}

/// Replace the default error construction for non-2xx responses.
pub fn error_mapper(mapper: impl Fn(&Parts) -> Error + Send + Sync + 'static) -> Opt {
    let mapper = Arc::new(mapper);
    Opt::client_only(move |config| config.set_error_mapper(mapper.clone()))
}

/// Run a hook against every request plan before it is sent.
pub fn middleware(
    hook: impl Fn(&mut Request) -> crate::Result<()> + Send + Sync + 'static,
) -> Opt {
    let hook = Arc::new(hook);
    Opt::client_only(move |config| config.add_middleware(hook.clone()))
}

/// Run a hook against every response after it arrives.
pub fn after_response(
    hook: impl Fn(&Parts) -> crate::Result<()> + Send + Sync + 'static,
) -> Opt {
    let hook = Arc::new(hook);
    Opt::client_only(move |config| config.add_after_hook(hook.clone()))
}

/// Log every request and response on this client at debug level.
pub fn dump_all() -> Opt {
    Opt::client_only(|config| config.enable_dump_all())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_opt_is_a_safe_noop() {
        let opt = Opt::default();
        let mut request = Request::default();
        let mut config = ClientConfig::default();
        opt.apply_request(&mut request);
        opt.apply_client(&mut config);
        assert!(request.headers.is_empty());
    }

    #[test]
    fn application_order_is_chaining_order() {
        let chain = opts().header("X-Trace", "1").header("X-Trace", "2");
        let mut request = Request::default();
        chain.apply_request(&mut request);
        assert_eq!(
            request.headers.get("X-Trace").map(|v| v.as_bytes()),
            Some(&b"2"[..])
        );
    }

    #[test]
    fn one_chain_applies_independently_to_two_requests() {
        let chain = opts().header("X-Trace", "1").query(["q", "go"]);
        let mut first = Request::default();
        let mut second = Request::default();
        chain.apply_request(&mut first);
        chain.apply_request(&mut second);
        first.add_query("only", "first");
        assert_eq!(second.query, vec![("q".to_string(), "go".to_string())]);
        assert_eq!(first.query.len(), 2);
    }

    #[test]
    fn dual_target_header_applies_to_both_sides() {
        let opt = header("Accept", "application/json");
        let mut config = ClientConfig::default();
        let mut request = Request::default();
        opt.apply_client(&mut config);
        opt.apply_request(&mut request);
        assert_eq!(
            config.headers.get("Accept").map(|v| v.as_bytes()),
            Some(&b"application/json"[..])
        );
        assert_eq!(
            request.headers.get("Accept").map(|v| v.as_bytes()),
            Some(&b"application/json"[..])
        );
    }

    #[test]
    fn request_only_options_have_no_client_side() {
        assert!(!Opts::from(path("id", 42)).has_client_side());
        assert!(Opts::from(base_url("https://api.example.com")).has_client_side());
        assert!(Opts::from(timeout(Duration::from_secs(5))).has_client_side());
    }

    #[test]
    #[should_panic(expected = "even number of key/value arguments")]
    fn query_panics_on_odd_argument_count() {
        let _ = query(["q"]);
    }

    #[test]
    fn query_pairs_are_preserved_in_order() {
        let opt = query(["q", "go", "ok", "1"]);
        let mut request = Request::default();
        opt.apply_request(&mut request);
        assert_eq!(
            request.query,
            vec![
                ("q".to_string(), "go".to_string()),
                ("ok".to_string(), "1".to_string())
            ]
        );
    }

    #[test]
    fn retry_options_merge_into_one_policy() {
        let chain = opts()
            .retry_count(3)
            .retry_fixed_interval(Duration::from_millis(50));
        let mut request = Request::default();
        chain.apply_request(&mut request);
        let policy = request.retry.expect("policy");
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.backoff, Backoff::Fixed(Duration::from_millis(50)));
    }

    #[test]
    fn failed_body_serialization_defers_a_body_error() {
        struct NoWireForm;
        impl Serialize for NoWireForm {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("no wire form"))
            }
        }

        let opt = json(NoWireForm);
        let mut first = Request::default();
        let mut second = Request::default();
        opt.apply_request(&mut first);
        opt.apply_request(&mut second);
        for mut request in [first, second] {
            let err = request.take_error().expect("deferred error");
            assert!(matches!(err, Error::Body(_)));
        }
    }

    #[test]
    fn basic_auth_encodes_credentials() {
        let opt = basic("user", "pass");
        let mut request = Request::default();
        opt.apply_request(&mut request);
        assert_eq!(
            request.headers.get("Authorization").map(|v| v.as_bytes()),
            Some(&b"Basic dXNlcjpwYXNz"[..])
        );
    }

    #[test]
    fn path_values_accept_display_types() {
        let opt = path("id", 42);
        let mut request = Request::default();
        opt.apply_request(&mut request);
        assert_eq!(request.path_params.get("id").map(String::as_str), Some("42"));
    }
}
