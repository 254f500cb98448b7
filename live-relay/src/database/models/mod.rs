//! Database models.
//!
//! These map directly onto the tables created by `migrations/`.

pub mod relay_job;
pub mod subscription;
pub mod task;

pub use relay_job::*;
pub use subscription::*;
pub use task::*;
