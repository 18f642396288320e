//! hostbridge: an authenticated HTTP control plane for running local tasks
//! on behalf of remote model clients.

pub mod api;
pub mod auth;
pub mod backend;
pub mod client;
pub mod local;
pub mod ops;
pub mod protocol;
pub mod task;
