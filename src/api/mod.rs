//! Admin REST API access.
//!
//! [`ApiClient`] is the single HTTP entry point; the session controller
//! registers an [`Interceptor`] on it to attach credentials and react to
//! 401/403 responses.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiEnvelope, ApiRequest, ApiResponse, Interceptor};
pub use error::ApiError;
