//! Service layer for menuledger business logic.
//!
//! This module contains domain logic separated from UI concerns.
//! Services take an explicit connection pool and can be used by the CLI or
//! any other caller.

pub mod audit;
pub mod import;

pub use audit::{Audit, AuditReport, CategoryHealth, DuplicateProducts, OfferStatistics, OfferSummary};
pub use import::{
    collect_snapshot_files, CancelFlag, FileOutcome, ImportEvent, ImportOptions, ImportService, ImportSummary,
};
