//! HTTP boundary: configuration, credential middleware, auth endpoints and
//! the error-kind → status mapping.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
