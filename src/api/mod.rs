//! HTTP handlers
//!
//! The webhook endpoint and a small status endpoint.

pub mod status;
pub mod webhook;

// Re-export handlers
pub use status::status;
pub use webhook::handle_webhook;
