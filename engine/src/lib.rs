//! requestbox engine: a single-room song request queue.
//!
//! Listeners search for tracks and submit requests over HTTP; the scheduler
//! plays them back one at a time in priority order and keeps the queue, the
//! now-playing record, and aggregate stats in SQLite.

pub mod api;
pub mod config;
pub mod model;
pub mod policy;
pub mod scheduler;
pub mod search;
pub mod stats;
pub mod store;
pub mod trigger;
