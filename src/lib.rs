//! rosterwatch - rate-limited esports data collector.
//!
//! Core library: task queue and scheduler, source rate limiting, instance
//! registry, worker fan-out, tiered cache, and the scraper/store seams.

// Model types use `from_str` methods that return Option<Self>,
// not Result<Self, Error> as std::str::FromStr requires.
#![allow(clippy::should_implement_trait)]

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod models;
pub mod rate_limit;
pub mod registry;
pub mod scheduler;
pub mod scrapers;
pub mod store;
pub mod work_queue;
pub mod worker_pool;
