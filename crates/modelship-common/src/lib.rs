//! Common types for modelship: domain model, errors, naming and configuration

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod kube_utils;
pub mod naming;
pub mod telemetry;
pub mod types;

pub use config::EngineConfig;
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
