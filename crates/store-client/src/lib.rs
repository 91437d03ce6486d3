//! HTTP client for notedrop upload backends.
//!
//! [`HttpStore`] implements [`notedrop_uploader::RemoteStore`] over the
//! REST framing of the upload protocol and classifies every failure into a
//! [`notedrop_uploader::RemoteErrorKind`] so the uploader can decide what to
//! retry.

pub mod classify;
pub mod client;

pub use classify::{classify_reqwest, classify_status};
pub use client::{ClientError, HttpStore};
