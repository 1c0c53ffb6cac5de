//! API Module
//!
//! HTTP handlers and routing for the stampede-safe proxy.
//!
//! # Endpoints
//! - `GET /stream` - Stream rotation replies as newline-delimited JSON
//! - `GET /next` - Serve a single rotation reply
//! - `GET /get/:key` - Look a key up through the caching proxy
//! - `GET /stats` - Get proxy statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
