//! The typed client and its clone-on-write configuration.
//!
//! A [`Client`] is a thin, cheap-to-clone handle over a connection pool
//! plus a [`ClientConfig`] of defaults. Client-side options never mutate a
//! live client: a call that carries client-side options runs on a
//! throwaway copy built via [`Client::clone_with`], so concurrent calls on
//! a shared client stay isolated.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::exec::execute;
use crate::options::Opts;
use crate::request::{Method, Request};
use crate::response::{Parts, Response};
use crate::retry::RetryPolicy;

pub(crate) type Middleware = Arc<dyn Fn(&mut Request) -> Result<()> + Send + Sync>;
pub(crate) type AfterHook = Arc<dyn Fn(&Parts) -> Result<()> + Send + Sync>;
pub(crate) type ErrorMapper = Arc<dyn Fn(&Parts) -> Error + Send + Sync>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = concat!("reqx/", env!("CARGO_PKG_VERSION"));

/// Plain-data client defaults, edited by client-side option closures.
///
/// The config is the unit of clone-on-write: deriving a client clones the
/// config, applies the closures, and builds a fresh transport from the
/// result. Invalid inputs are recorded and surfaced when the client is
/// built, not at option construction.
#[derive(Clone)]
pub struct ClientConfig {
    pub(crate) base_url: Option<String>,
    pub(crate) timeout: Duration,
    pub(crate) user_agent: String,
    pub(crate) headers: HeaderMap,
    pub(crate) query: Vec<(String, String)>,
    pub(crate) retry: Option<RetryPolicy>,
    pub(crate) dump_all: bool,
    pub(crate) middleware: Vec<Middleware>,
    pub(crate) after: Vec<AfterHook>,
    pub(crate) error_mapper: Option<ErrorMapper>,
    pub(crate) invalid: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: HeaderMap::new(),
            query: Vec::new(),
            retry: None,
            dump_all: false,
            middleware: Vec::new(),
            after: Vec::new(),
            error_mapper: None,
            invalid: None,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("headers", &self.headers)
            .field("query", &self.query)
            .field("retry", &self.retry)
            .field("dump_all", &self.dump_all)
            .field("middleware", &self.middleware.len())
            .field("after", &self.after.len())
            .field("error_mapper", &self.error_mapper.as_ref().map(|_| "{ ... }"))
            .field("invalid", &self.invalid)
            .finish()
    }
}

impl ClientConfig {
    /// Set a default header; later sets on the same name win. Invalid
    /// names or values are recorded and surfaced at client build.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => {
                if self.invalid.is_none() {
                    self.invalid = Some(format!("invalid header {name}: {value}"));
                }
            }
        }
    }

    pub fn add_query(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.query.push((key.into(), value.into()));
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn set_base_url(&mut self, url: impl Into<String>) {
        self.base_url = Some(url.into());
    }

    pub fn set_user_agent(&mut self, value: impl Into<String>) {
        self.user_agent = value.into();
    }

    /// The client-level retry policy, created on first access.
    pub fn retry_mut(&mut self) -> &mut RetryPolicy {
        self.retry.get_or_insert_with(RetryPolicy::default)
    }

    pub fn enable_dump_all(&mut self) {
        self.dump_all = true;
    }

    pub(crate) fn add_middleware(&mut self, hook: Middleware) {
        self.middleware.push(hook);
    }

    pub(crate) fn add_after_hook(&mut self, hook: AfterHook) {
        self.after.push(hook);
    }

    pub(crate) fn set_error_mapper(&mut self, mapper: ErrorMapper) {
        self.error_mapper = Some(mapper);
    }
}

/// Typed HTTP client. Cloning shares the connection pool.
#[derive(Clone, Debug)]
pub struct Client {
    http: reqwest::Client,
    pub(crate) config: Arc<ClientConfig>,
}

impl Client {
    /// Build a client from a chain of options. Request-side closures in
    /// the chain are ignored here; they apply when the option is passed to
    /// a call instead.
    pub fn new(options: impl Into<Opts>) -> Result<Client> {
        let mut config = ClientConfig::default();
        if std::env::var("HTTP_TRACE").is_ok_and(|v| !v.is_empty() && v != "0") {
            config.dump_all = true;
        }
        options.into().apply_client(&mut config);
        Client::from_config(config)
    }

    pub(crate) fn from_config(config: ClientConfig) -> Result<Client> {
        if let Some(message) = &config.invalid {
            return Err(Error::Header(message.clone()));
        }
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(config.headers.clone())
            .build()
            .map_err(|source| Error::Transport {
                source,
                parts: None,
            })?;
        Ok(Client {
            http,
            config: Arc::new(config),
        })
    }

    /// Derive a client with the chain's client-side options applied on top
    /// of this client's config. `self` is untouched.
    pub fn clone_with(&self, options: &Opts) -> Result<Client> {
        let mut config = (*self.config).clone();
        options.apply_client(&mut config);
        Client::from_config(config)
    }

    /// The underlying transport, for escape-hatch use.
    pub fn raw(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn map_error(&self, parts: Parts) -> Error {
        match &self.config.error_mapper {
            Some(mapper) => mapper(&parts),
            None => Error::Http(crate::error::HttpError::new(parts)),
        }
    }

    pub async fn get<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Get, url, &options.into()).await
    }

    pub async fn post<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Post, url, &options.into()).await
    }

    pub async fn put<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Put, url, &options.into()).await
    }

    pub async fn patch<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Patch, url, &options.into()).await
    }

    pub async fn delete<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Delete, url, &options.into()).await
    }

    pub async fn head<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Head, url, &options.into()).await
    }

    pub async fn options<T>(&self, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        execute(self, Method::Options, url, &options.into()).await
    }

    /// Dispatch by method token. An unsupported token fails before any
    /// network I/O.
    pub async fn request<T>(
        &self,
        method: &str,
        url: &str,
        options: impl Into<Opts>,
    ) -> Result<Response<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let method = Method::parse(method)?;
        execute(self, method, url, &options.into()).await
    }
}

static SHARED: Lazy<Client> = Lazy::new(|| {
    Client::from_config(ClientConfig::default())
        .unwrap_or_else(|err| panic!("reqx: default client failed to build: {err}"))
});

/// The process-wide default client. Per-call client-side options derive a
/// throwaway copy; the shared instance itself never changes.
pub fn shared() -> &'static Client {
    &SHARED
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{base_url, header, opts};

    #[test]
    fn default_config_carries_stock_user_agent_and_timeout() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.user_agent.starts_with("reqx/"));
    }

    #[test]
    fn config_header_last_wins() {
        let mut config = ClientConfig::default();
        config.set_header("Accept", "text/plain");
        config.set_header("Accept", "application/json");
        assert_eq!(
            config.headers.get("Accept").map(|v| v.as_bytes()),
            Some(&b"application/json"[..])
        );
    }

    #[test]
    fn invalid_default_header_fails_at_build() {
        let err = Client::new(header("bad header", "x")).unwrap_err();
        assert!(matches!(err, Error::Header(_)));
    }

    #[test]
    fn clone_with_leaves_the_source_untouched() {
        let client = Client::new(()).expect("client");
        let derived = client
            .clone_with(&opts().base_url("https://api.example.com"))
            .expect("derived");
        assert!(client.config.base_url.is_none());
        assert_eq!(
            derived.config.base_url.as_deref(),
            Some("https://api.example.com")
        );
    }

    #[test]
    fn http_trace_env_is_ignored_when_unset() {
        // not set in the test environment by default
        let client = Client::new(()).expect("client");
        assert!(!client.config.dump_all || std::env::var("HTTP_TRACE").is_ok());
    }

    #[test]
    fn shared_client_is_a_singleton() {
        let a = shared() as *const Client;
        let b = shared() as *const Client;
        assert_eq!(a, b);
    }

    #[test]
    fn base_url_option_lands_on_config() {
        let client = Client::new(base_url("https://api.example.com")).expect("client");
        assert_eq!(
            client.config.base_url.as_deref(),
            Some("https://api.example.com")
        );
    }
}
