//! Archive table maintenance for a web analytics store.
//!
//! - [`archive`]: monthly archive partitions and the store they live in.
//! - [`jobs`]: the purge and optimize jobs and the scheduler running them.
//! - [`overlay`]: the authenticated, best-effort overlay read API.

pub mod archive;
pub mod config;
pub mod jobs;
pub mod observability;
pub mod overlay;
