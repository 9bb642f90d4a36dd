//! Middleware layers
//!
//! ## Available Middleware
//!
//! - `ingress`: process-local flood guard on every route
//! - `auth`: API key authentication, ban check and tenant rate limit
//! - `admin`: admin bearer token on `/admin` routes

pub mod admin;
pub mod auth;
pub mod ingress;

// Re-exports
pub use admin::admin_middleware;
pub use auth::{auth_middleware, END_USER_HEADER};
pub use ingress::ingress_middleware;
