//! # Newsroom Agent
//!
//! A scheduled content pipeline for a multi-tenant news portal. Each run
//! gathers raw material from syndication feeds (topped up by an LLM topic
//! generator), drafts articles, edits and scores them, drops duplicates,
//! and publishes whatever clears the quality gate.
//!
//! ## Architecture
//!
//! 1. **Gathering**: fill per-category quotas from feeds, then the topic generator
//! 2. **Drafting**: one structured article per topic (4 in flight)
//! 3. **Editing**: revise and score every draft; failures pass the draft through
//! 4. **Deduplication**: drop titles already in the tenant's corpus
//! 5. **Publishing**: quality gate, thumbnail, persistence
//!
//! A [`worker::Worker`] drives runs from a cron schedule and manual
//! triggers, with at most one run in flight at a time.

pub mod api;
pub mod cli;
pub mod config;
pub mod control;
pub mod extract;
pub mod images;
pub mod models;
pub mod pipeline;
pub mod settings;
pub mod sources;
pub mod store;
pub mod utils;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

/// Error type at collaborator boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
