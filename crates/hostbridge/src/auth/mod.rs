//! Static bearer token authentication.

mod config;
mod error;
mod middleware;

pub use config::{AuthConfig, ConfigValidationError, PLACEHOLDER_API_KEY};
pub use error::{AuthError, AuthErrorResponse};
pub use middleware::{AuthState, auth_middleware};
