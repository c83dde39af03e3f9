//! # Elect Common Library
//!
//! Shared code for the election protocol loader:
//! - Error type used across crates
//! - Configuration loading and root folder resolution
//! - Import event vocabulary and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{EventBus, ImportEvent, LogSeverity};
