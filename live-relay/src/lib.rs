//! live-relay library crate.
//!
//! Admits relay requests against subscription quotas, schedules them on a
//! persistent delayed queue, and supervises the relay subprocess that
//! streams each fetched asset to its ingest endpoint.

pub mod admission;
pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod queue;
pub mod relay;
pub mod services;
pub mod supervisor;

pub use error::{Error, Result};
