//! The execution pipeline behind every typed verb.
//!
//! One call runs through a fixed sequence: derive a throwaway client when
//! client-side options are present, assemble the request plan, classify
//! the result type, drive the attempt loop with retries, guarantee the
//! upload progress terminal tick, run after-hooks, then decode or map the
//! outcome. The plan is rebuilt into a wire request on every attempt, so
//! streaming bodies replay cleanly across retries.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::client::Client;
use crate::decode::{decode_body, decode_empty, is_blank, target_kind_of, TargetKind};
use crate::error::{Error, Result};
use crate::options::Opts;
use crate::progress::{counting_bytes_body, counting_file_stream, UploadTracker};
use crate::request::{expand_path, Body, FilePart, FileSource, Method, Request};
use crate::response::{Parts, Response};

pub(crate) async fn execute<T>(
    client: &Client,
    method: Method,
    url: &str,
    options: &Opts,
) -> Result<Response<T>>
where
    T: DeserializeOwned + 'static,
{
    // Client-side options run on a derived copy; the caller's client is
    // never mutated, so concurrent calls stay isolated.
    let derived;
    let client = if options.has_client_side() {
        derived = client.clone_with(options)?;
        &derived
    } else {
        client
    };

    let mut plan = Request::default();
    options.apply_request(&mut plan);
    for hook in &client.config.middleware {
        hook(&mut plan)?;
    }
    if let Some(deferred) = plan.take_error() {
        return Err(deferred);
    }

    let kind = target_kind_of::<T>();

    let tracker = match plan.progress.take() {
        Some(spec) => {
            let total = upload_total(&plan).await;
            Some(Arc::new(UploadTracker::new(
                spec.callback,
                spec.min_interval,
                total,
            )))
        }
        None => None,
    };

    let policy = plan.retry.clone().or_else(|| client.config.retry.clone());
    let max_retries = policy.as_ref().map_or(0, |p| p.max_retries);
    let dump = plan.dump || client.config.dump_all;

    let mut attempt = 0;
    let outcome = loop {
        if let Some(tracker) = &tracker {
            tracker.begin_attempt();
        }
        let outcome = send_once(client, method, url, &plan, tracker.as_ref(), dump).await;

        if attempt < max_retries {
            let retryable = match (&policy, &outcome) {
                (Some(policy), Ok(parts)) if !parts.is_success() => {
                    policy.should_retry(Some(parts), None)
                }
                (Some(policy), Err(error)) => policy.should_retry(None, Some(error)),
                _ => false,
            };
            if retryable {
                let delay = policy.as_ref().map_or_else(Default::default, |p| p.delay(attempt));
                debug!(%method, url, attempt, ?delay, "retrying request");
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
                continue;
            }
        }
        break outcome;
    };

    // The terminal tick covers the call as a whole, failures included.
    if let Some(tracker) = &tracker {
        tracker.finish();
    }

    let parts = outcome?;

    for hook in &client.config.after {
        if let Err(hook_error) = hook(&parts) {
            // A hook that consumed or rejected a blank success body still
            // resolves to the empty-normalized value for structured
            // targets; anything else propagates.
            if parts.is_success() && kind == TargetKind::Structured && is_blank(&parts.body) {
                return decode_empty(&parts).map(|body| Response { body, parts });
            }
            return Err(hook_error);
        }
    }

    if parts.is_success() {
        let body = decode_body::<T>(&parts)?;
        Ok(Response { body, parts })
    } else {
        Err(client.map_error(parts))
    }
}

/// Total upload size for progress reporting, `0` when any part's size
/// cannot be known up front.
async fn upload_total(plan: &Request) -> u64 {
    if !plan.files.is_empty() {
        let mut total = 0;
        for part in &plan.files {
            let size = match (&part.known_size(), &part.source) {
                (Some(size), _) => Some(*size),
                (None, FileSource::Path(path)) => {
                    tokio::fs::metadata(path).await.map(|m| m.len()).ok()
                }
                (None, FileSource::Memory(_)) => None,
            };
            match size {
                Some(size) => total += size,
                None => return 0,
            }
        }
        total
    } else {
        plan.body.as_ref().map_or(0, Body::len)
    }
}

/// One wire attempt: build the request from the plan, send it, and collect
/// the response into [`Parts`].
async fn send_once(
    client: &Client,
    method: Method,
    url: &str,
    plan: &Request,
    tracker: Option<&Arc<UploadTracker>>,
    dump: bool,
) -> Result<Parts> {
    let resolved = resolve_url(client.config.base_url.as_deref(), url, plan);

    let mut builder = client.raw().request(method.to_reqwest(), &resolved);
    if !client.config.query.is_empty() {
        // Call-level pairs override inherited defaults on the same key, so
        // a dual-target query option passed per call is not applied twice.
        let overridden: HashSet<&str> = plan.query.iter().map(|(k, _)| k.as_str()).collect();
        let inherited: Vec<&(String, String)> = client
            .config
            .query
            .iter()
            .filter(|(key, _)| !overridden.contains(key.as_str()))
            .collect();
        builder = builder.query(&inherited);
    }
    if !plan.query.is_empty() {
        builder = builder.query(&plan.query);
    }
    if !plan.headers.is_empty() {
        builder = builder.headers(plan.headers.clone());
    }
    if let Some(timeout) = plan.timeout {
        builder = builder.timeout(timeout);
    }

    // Body precedence: multipart files, then url-encoded form, then body.
    if !plan.files.is_empty() {
        let mut form = reqwest::multipart::Form::new();
        for (key, value) in &plan.form {
            form = form.text(key.clone(), value.clone());
        }
        for part in &plan.files {
            let built = build_part(part, tracker).await?;
            form = form.part(part.name.clone(), built);
        }
        builder = builder.multipart(form);
    } else if !plan.form.is_empty() {
        builder = builder.form(&plan.form);
    } else if let Some(body) = &plan.body {
        if body.is_json() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let raw = body.as_bytes();
        builder = match tracker {
            Some(tracker) => builder.body(counting_bytes_body(raw, Arc::clone(tracker))),
            None => builder.body(raw),
        };
    }

    if dump {
        debug!(%method, url = %resolved, headers = ?plan.headers, "sending request");
    }

    let response = builder.send().await.map_err(|source| Error::Transport {
        source,
        parts: None,
    })?;

    let status = response.status();
    let headers = response.headers().clone();
    let final_url = response.url().clone();

    let body = match (&plan.output_file, status.is_success()) {
        (Some(path), true) => {
            stream_to_file(response, path).await?;
            Bytes::new()
        }
        _ => collect_body(response, status, &headers, &final_url).await?,
    };

    if dump {
        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            url = %final_url,
            "response received"
        );
    }

    Ok(Parts {
        status,
        headers,
        url: final_url,
        body,
    })
}

async fn collect_body(
    response: reqwest::Response,
    status: reqwest::StatusCode,
    headers: &reqwest::header::HeaderMap,
    url: &reqwest::Url,
) -> Result<Bytes> {
    response.bytes().await.map_err(|source| Error::Transport {
        source,
        parts: Some(Parts {
            status,
            headers: headers.clone(),
            url: url.clone(),
            body: Bytes::new(),
        }),
    })
}

/// Stream the body to disk. A failed transfer must not leave a partial
/// file behind that could pass for a complete download, so the output is
/// removed on any error after creation.
async fn stream_to_file(response: reqwest::Response, path: &std::path::Path) -> Result<()> {
    let result = write_body_to(response, path).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(path).await;
    }
    result
}

async fn write_body_to(mut response: reqwest::Response, path: &std::path::Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = response.chunk().await.map_err(|source| Error::Transport {
        source,
        parts: None,
    })? {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

async fn build_part(
    part: &FilePart,
    tracker: Option<&Arc<UploadTracker>>,
) -> Result<reqwest::multipart::Part> {
    let built = match &part.source {
        FileSource::Memory(raw) => {
            let len = raw.len() as u64;
            let body = match tracker {
                Some(tracker) => counting_bytes_body(raw.clone(), Arc::clone(tracker)),
                None => reqwest::Body::from(raw.clone()),
            };
            reqwest::multipart::Part::stream_with_length(body, len)
        }
        FileSource::Path(path) => {
            let file = tokio::fs::File::open(path).await?;
            let len = file.metadata().await?.len();
            let body = match tracker {
                Some(tracker) => {
                    reqwest::Body::wrap_stream(counting_file_stream(file, Arc::clone(tracker)))
                }
                None => reqwest::Body::wrap_stream(ReaderStream::new(file)),
            };
            reqwest::multipart::Part::stream_with_length(body, len)
        }
    };
    Ok(built.file_name(part.file_name.clone()))
}

/// Expand path params, then join onto the client's base URL when the call
/// URL is relative. Absolute URLs pass through untouched.
fn resolve_url(base: Option<&str>, url: &str, plan: &Request) -> String {
    let expanded = expand_path(url, &plan.path_params);
    if expanded.starts_with("http://") || expanded.starts_with("https://") {
        return expanded;
    }
    match base {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            expanded.trim_start_matches('/')
        ),
        None => expanded,
    }
}
