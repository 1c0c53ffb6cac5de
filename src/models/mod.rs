//! Models Module
//!
//! Response data transfer objects for the proxy API.

mod responses;

pub use responses::{HealthResponse, LookupResponse, NextResponse, StatsResponse};
