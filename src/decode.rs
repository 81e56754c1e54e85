//! Result-type classification and response body decoding.
//!
//! The typed verbs decide how to treat a response body purely from the
//! requested result type: `String` passes through as text, `Vec<u8>` and
//! [`Bytes`] pass through as raw bytes, and every other type is decoded
//! from JSON. The classification works on the type alone via `TypeId`, so
//! it never needs a live value.

use std::any::{Any, TypeId};

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::response::Parts;

/// How a response body is bound to the requested result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// The result type is `String`; the body passes through as UTF-8 text.
    Text,
    /// The result type is a contiguous byte sequence (`Vec<u8>`, `Bytes`);
    /// the body passes through untouched.
    Bytes,
    /// Any other type; the body is decoded as JSON.
    Structured,
}

/// Classify the statically requested result type.
///
/// Byte sequences are distinguished from structured slices by element
/// type: `Vec<u8>` is [`TargetKind::Bytes`], `Vec<u16>` (or any other
/// element) is [`TargetKind::Structured`].
pub fn target_kind_of<T: 'static>() -> TargetKind {
    let id = TypeId::of::<T>();
    if id == TypeId::of::<String>() {
        TargetKind::Text
    } else if id == TypeId::of::<Vec<u8>>() || id == TypeId::of::<Bytes>() {
        TargetKind::Bytes
    } else {
        TargetKind::Structured
    }
}

/// Decode a success-class response body into the requested type.
pub(crate) fn decode_body<T>(parts: &Parts) -> Result<T>
where
    T: DeserializeOwned + 'static,
{
    match target_kind_of::<T>() {
        TargetKind::Text => reclaim(String::from_utf8_lossy(&parts.body).into_owned()),
        TargetKind::Bytes => {
            if TypeId::of::<T>() == TypeId::of::<Bytes>() {
                reclaim(parts.body.clone())
            } else {
                reclaim(parts.body.to_vec())
            }
        }
        TargetKind::Structured => {
            if is_blank(&parts.body) {
                decode_empty(parts)
            } else {
                serde_json::from_slice(&parts.body).map_err(|source| Error::Decode {
                    source,
                    parts: Some(parts.clone()),
                })
            }
        }
    }
}

/// Decode "nothing" into a structured target: an empty 2xx body yields an
/// empty value rather than a decode error. Maps and defaulted structs take
/// `{}`, sequences take `[]`, `Option` and unit take `null`.
pub(crate) fn decode_empty<T: DeserializeOwned>(parts: &Parts) -> Result<T> {
    for candidate in [&b"{}"[..], b"[]"] {
        if let Ok(value) = serde_json::from_slice(candidate) {
            return Ok(value);
        }
    }
    serde_json::from_slice(b"null").map_err(|source| Error::Decode {
        source,
        parts: Some(parts.clone()),
    })
}

pub(crate) fn is_blank(body: &[u8]) -> bool {
    body.iter().all(|b| b.is_ascii_whitespace())
}

/// Move a concretely produced value into the generic result slot. Callers
/// check the `TypeId` first, so the downcast cannot fail.
fn reclaim<S: 'static, T: 'static>(value: S) -> Result<T> {
    let boxed: Box<dyn Any> = Box::new(value);
    match boxed.downcast::<T>() {
        Ok(value) => Ok(*value),
        Err(_) => unreachable!("target kind verified before downcast"),
    }
}
