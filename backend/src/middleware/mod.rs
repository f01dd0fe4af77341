//! Request middleware

pub mod auth;

pub use auth::{api_token_middleware, auth_middleware, AuthUser, CurrentUser};
