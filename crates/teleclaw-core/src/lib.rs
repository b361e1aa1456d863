//! # TeleClaw Core
//!
//! Shared building blocks for the TeleClaw automation engine:
//! configuration, the error type, domain types, and the traits that
//! external collaborators (record store, access resolver, action
//! transport, status sink) implement.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::TeleclawConfig;
pub use error::{PrecheckFailure, Result, TeleclawError};
