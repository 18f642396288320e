//! Local process management.

mod process;

pub use process::{
    DEFAULT_STOP_GRACE, ProcessError, ProcessInfo, ProcessTracker, StopOutcome,
};
