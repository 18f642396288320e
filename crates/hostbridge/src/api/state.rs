//! Application state shared across handlers.

use std::sync::Arc;

use crate::auth::AuthState;
use crate::backend::BackendRegistry;
use crate::local::ProcessTracker;
use crate::task::{ExecutorConfig, TaskExecutor};

/// Shared application state.
///
/// Each registry is owned here and injected into handlers through axum's
/// `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Authentication state.
    pub auth: AuthState,
    /// Task submission and polling.
    pub executor: TaskExecutor,
    /// Connected models.
    pub backends: Arc<BackendRegistry>,
    /// Programs started through `program_control` tasks.
    pub processes: ProcessTracker,
}

impl AppState {
    /// Wire the executor to the shared registries.
    pub fn new(
        auth: AuthState,
        backends: Arc<BackendRegistry>,
        processes: ProcessTracker,
        executor_config: ExecutorConfig,
    ) -> Self {
        let executor = TaskExecutor::new(executor_config, processes.clone(), Arc::clone(&backends));
        Self {
            auth,
            executor,
            backends,
            processes,
        }
    }
}
