//! Typed convenience layer over [`reqwest`].
//!
//! One call performs the request, checks the status class, and binds the
//! body to the requested result type: `String` passes through as text,
//! `Vec<u8>`/[`bytes::Bytes`] as raw bytes, everything else decodes from
//! JSON. Empty success bodies normalize to empty values instead of decode
//! errors.
//!
//! Configuration goes through one option vocabulary usable in two
//! positions: building a [`Client`] sets defaults, passing the same
//! options to a call scopes them to that call. Client-side options on a
//! call derive a throwaway client, so a shared client is never mutated.
//!
//! ```no_run
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct User {
//!     name: String,
//! }
//!
//! # async fn run() -> reqx::Result<()> {
//! let client = reqx::Client::new(
//!     reqx::opts()
//!         .base_url("https://api.example.com")
//!         .bearer("token"),
//! )?;
//! let user: User = client
//!     .get("/users/{id}", reqx::opts().path("id", 42))
//!     .await?
//!     .into_body();
//! # let _ = user.name;
//! # Ok(())
//! # }
//! ```
//!
//! Uploads can report progress through a callback that is guaranteed a
//! terminal 100%-equivalent tick once per call, even when the transport's
//! last tick falls short.

mod client;
mod decode;
mod error;
mod exec;
mod options;
mod progress;
mod request;
mod response;
mod retry;

pub use client::{shared, Client, ClientConfig};
pub use decode::{target_kind_of, TargetKind};
pub use error::{Error, HttpError, Result};
pub use options::{
    after_response, auth, base_url, basic, bearer, before, body, dump, dump_all, error_mapper,
    file, file_bytes, form, header, headers, json, middleware, opts, output_file, path, paths,
    query, queries, retry_backoff, retry_condition, retry_count, retry_fixed_interval, timeout,
    upload_callback, upload_callback_with_interval, upload_progress, user_agent, Opt, Opts,
};
pub use progress::UploadInfo;
pub use request::{Body, FilePart, IntoBody, Json, Method, Request};
pub use response::{Parts, Response};
pub use retry::{retry_delay, Backoff, RetryPolicy};

use serde::de::DeserializeOwned;

/// GET on the process-wide default client.
pub async fn get<T>(url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().get(url, options).await
}

/// POST on the process-wide default client.
pub async fn post<T>(url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().post(url, options).await
}

/// PUT on the process-wide default client.
pub async fn put<T>(url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().put(url, options).await
}

/// PATCH on the process-wide default client.
pub async fn patch<T>(url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().patch(url, options).await
}

/// DELETE on the process-wide default client.
pub async fn delete<T>(url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().delete(url, options).await
}

/// HEAD on the process-wide default client.
pub async fn head<T>(url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().head(url, options).await
}

/// OPTIONS on the process-wide default client.
pub async fn options<T>(url: &str, opts_chain: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().options(url, opts_chain).await
}

/// Dispatch by method token on the process-wide default client.
pub async fn request<T>(method: &str, url: &str, options: impl Into<Opts>) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    shared().request(method, url, options).await
}
