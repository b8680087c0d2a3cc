//! Domain layer for the trade journal export service.
//!
//! This crate contains:
//! - Domain models (export jobs, typed parameters, journal records, canonical tables)
//! - Business logic services (realized P/L, journal aggregates)
//! - Seams for the job store and the journal read side
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;

pub use error::ExportError;
