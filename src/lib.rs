//! menuledger: restaurant menu snapshot import and price/offer ledger.
//!
//! Scrapers write one JSON snapshot per restaurant per run. This crate
//! validates snapshots, reconciles them against stored restaurants,
//! categories and products without creating duplicates, appends every
//! observed price to a history ledger and tracks offers as they appear,
//! disappear and come back.

pub mod config;
pub mod error;
pub mod models;
pub mod reconcile;
pub mod repository;
pub mod schema;
pub mod services;
pub mod snapshot;

pub use error::{ImportError, ReconcileError, Result, SchemaError};
pub use services::{Audit, ImportOptions, ImportService, ImportSummary};
pub use snapshot::Snapshot;
