//! # API Shared
//!
//! Shared definitions for the MTB bridge APIs.
//!
//! Contains:
//! - The JSON payload model exchanged with the trial-matching portal (`model` module)
//! - Shared services like `HealthService`
//!
//! Used by `mtb-core`, `api-rest` and the `mtb` CLI.

pub mod health;
pub mod model;

pub use health::{HealthRes, HealthService};
pub use model::*;
