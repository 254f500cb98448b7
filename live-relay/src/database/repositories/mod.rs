//! Repository layer for database access.

pub mod relay_job;
pub mod subscription;
pub mod task;

pub use relay_job::*;
pub use subscription::*;
pub use task::*;
