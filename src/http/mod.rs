//! HTTP surface: router, REST handlers and auth middleware

pub mod middleware;
pub mod routes;

pub use routes::build_router;
