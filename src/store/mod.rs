//! Durable state: plans, items, interned reasons, executions, the recovery
//! log, and persisted reports, in one embedded SQLite database.

pub mod db;
pub mod reports;

pub use db::{Database, NewPlanItem, RecoveryFilter, RecoveryRow};
