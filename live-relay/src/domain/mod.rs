//! Domain types for relay jobs.

pub mod plan;
pub mod request;
pub mod source;
pub mod status;

pub use plan::{account_quota, plan_capacity};
pub use request::{RelayPayload, RelayRequest, StreamKey};
pub use source::parse_drive_file_id;
pub use status::RelayStatus;
