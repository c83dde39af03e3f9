//! HTTP API handlers for elect-loader
//!
//! Import control (start, status, cancel), the live event stream, read-only
//! browsing of stored protocols and the health check.

pub mod browse;
pub mod health;
pub mod import_workflow;
pub mod sse;

pub use browse::browse_routes;
pub use health::health_routes;
pub use import_workflow::import_routes;
pub use sse::import_event_stream;
