//! `streamsync` keeps a local SQLite cache of GitHub issues and pull requests
//! in sync with a set of saved searches ("streams").
//!
//! The moving parts:
//! - [`query`] compiles the filter DSL into SQL fragments and an in-memory predicate
//! - [`remote`] serializes outbound requests through a rate-limited pipeline
//! - [`sync`] holds the per-stream state machine and the round-robin scheduler
//! - [`storage`] imports results and reconciles stream membership

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod remote;
pub mod storage;
pub mod sync;
pub mod util;

pub use error::{Result, SyncError};
