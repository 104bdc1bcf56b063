//! Producers of raw topic material.
//!
//! | Producer | Module | Method | Notes |
//! |----------|--------|--------|-------|
//! | Syndication feeds | [`feed`] | HTTP GET + pattern parse | RSS items or Atom entries, 48h freshness |
//! | Topic generator | [`topics`] | Text collaborator | Fallback when feeds cannot fill a quota |
//!
//! Both producers swallow their own failures: a dead feed or a garbled
//! model answer yields an empty list, never an error.

pub mod feed;
pub mod topics;
