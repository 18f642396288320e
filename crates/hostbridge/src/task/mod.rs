//! Asynchronous task execution and tracking.

mod executor;
mod models;
mod registry;

pub use executor::{ExecutorConfig, TaskExecutor};
pub use models::{
    CommandParams, FileParams, Outcome, ProgramParams, QueryParams, Task, TaskError, TaskKind,
};
pub use registry::TaskRegistry;
