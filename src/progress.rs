//! Upload progress instrumentation.
//!
//! The transport reports upload ticks from its own task, and the last tick
//! often falls short of 100% when the final chunk coincides with the
//! response arriving. [`UploadTracker`] wraps the caller's callback so a
//! terminal 100%-equivalent tick is delivered exactly once per request,
//! whether or not the underlying stream got there on its own.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::io::ReaderStream;

/// Cumulative upload state handed to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadInfo {
    /// Bytes handed to the transport so far.
    pub uploaded: u64,
    /// Total upload size in bytes, `0` when unknown.
    pub total: u64,
}

impl UploadInfo {
    /// Completion percentage, `None` while the total is unknown.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        (self.total > 0).then(|| self.uploaded as f64 / self.total as f64 * 100.0)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.uploaded >= self.total
    }
}

pub type UploadCallback = Arc<dyn Fn(&UploadInfo) + Send + Sync>;

#[derive(Default)]
struct TrackerState {
    last: UploadInfo,
    seen: bool,
    completed: bool,
    last_emit: Option<Instant>,
}

/// Completion-guarantee state machine around an upload callback.
///
/// The state is shared between the task driving the upload stream and the
/// task finalizing the response; the callback itself always runs outside
/// the lock so it can do its own I/O.
pub struct UploadTracker {
    callback: UploadCallback,
    min_interval: Option<Duration>,
    total: u64,
    state: Mutex<TrackerState>,
}

impl UploadTracker {
    pub(crate) fn new(callback: UploadCallback, min_interval: Option<Duration>, total: u64) -> Self {
        Self {
            callback,
            min_interval,
            total,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// Reset the byte counter for a fresh retry attempt. The completion
    /// guarantee still covers the call as a whole.
    pub(crate) fn begin_attempt(&self) {
        let mut state = self.lock();
        state.last = UploadInfo {
            uploaded: 0,
            total: self.total,
        };
        state.completed = false;
        state.last_emit = None;
    }

    /// Record `n` more bytes handed to the transport and forward a tick.
    /// Intermediate ticks inside the minimum interval are swallowed;
    /// completion ticks always pass.
    pub(crate) fn advance(&self, n: u64) {
        let (info, forward) = {
            let mut state = self.lock();
            state.last.uploaded += n;
            state.last.total = self.total;
            state.seen = true;
            let complete = state.last.is_complete();
            if complete {
                state.completed = true;
            }
            let forward = match self.min_interval {
                Some(interval) if !complete => match state.last_emit {
                    Some(at) if at.elapsed() < interval => false,
                    _ => {
                        state.last_emit = Some(Instant::now());
                        true
                    }
                },
                _ => true,
            };
            (state.last, forward)
        };
        if forward {
            (self.callback)(&info);
        }
    }

    /// Called after the response completes, success or failure. If ticks
    /// were seen but completion never reported, synthesize exactly one
    /// terminal tick with `uploaded == total` (or `total` forced to the
    /// last uploaded count when it was never known).
    pub(crate) fn finish(&self) {
        let synthetic = {
            let mut state = self.lock();
            if !state.seen || state.completed {
                None
            } else {
                state.completed = true;
                let mut info = state.last;
                if info.total == 0 {
                    info.total = info.uploaded;
                }
                if info.total > 0 {
                    info.uploaded = info.total;
                }
                Some(info)
            }
        };
        if let Some(info) = synthetic {
            (self.callback)(&info);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const CHUNK_SIZE: usize = 64 * 1024;

/// Wrap an in-memory body in a stream that advances the tracker as chunks
/// are handed to the transport.
pub(crate) fn counting_bytes_body(data: Bytes, tracker: Arc<UploadTracker>) -> reqwest::Body {
    let mut chunks = Vec::with_capacity(data.len().div_ceil(CHUNK_SIZE));
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + CHUNK_SIZE).min(data.len());
        chunks.push(data.slice(offset..end));
        offset = end;
    }
    let stream = futures_util::stream::iter(chunks.into_iter().map(move |chunk| {
        tracker.advance(chunk.len() as u64);
        Ok::<Bytes, std::io::Error>(chunk)
    }));
    reqwest::Body::wrap_stream(stream)
}

/// Stream a file while advancing the tracker per chunk read.
pub(crate) fn counting_file_stream(
    file: tokio::fs::File,
    tracker: Arc<UploadTracker>,
) -> impl Stream<Item = std::io::Result<Bytes>> {
    ReaderStream::new(file).inspect(move |chunk| {
        if let Ok(chunk) = chunk {
            tracker.advance(chunk.len() as u64);
        }
    })
}

/// Ready-made terminal progress bar callback. The bar is created lazily on
/// the first tick and finished by the tracker's guaranteed terminal tick.
pub(crate) fn bar_callback() -> UploadCallback {
    let slot: Mutex<Option<ProgressBar>> = Mutex::new(None);
    Arc::new(move |info| {
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        let bar = slot.get_or_insert_with(|| {
            if info.total > 0 {
                let bar = ProgressBar::new(info.total);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner} upload [{bar:20}] {percent}% ({bytes}/{total_bytes})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=- "),
                );
                bar
            } else {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::with_template("{spinner} upload {bytes}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        });
        bar.set_position(info.uploaded);
        if info.is_complete() {
            bar.finish();
        }
    })
}
