//! The external relay process: how it is invoked and how its lifecycle is
//! controlled.

mod command;
mod process;

pub use command::{
    DEFAULT_INGEST_BASE_URL, FfmpegConfig, RelayInvocation, RelayPlan, build_invocation,
    duration_until,
};
pub use process::{ExitOutcome, ProcessHandle, ProcessState, RelayProcess};
