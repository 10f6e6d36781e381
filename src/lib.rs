//! # refreshq
//!
//! Persistent refresh queue and state store for entity-processing pipelines.
//!
//! Tracks every known entity in a relational store, schedules it for
//! re-processing, hands due entities to workers in batches, and writes their
//! results back together with the derived relation and provenance graphs.
//! Concurrency control relies only on the store's transactions and row locks,
//! plus an optimistic location-key ownership check.

pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod telemetry;

pub use db::{Db, StateTx};
pub use error::{Error, Result};
