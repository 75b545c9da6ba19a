#![forbid(unsafe_code)]

//! CleanMaster core — disk-hygiene engine for end-user workstations.
//!
//! Four-stage pipeline:
//! 1. **Scanner** — cancelable parallel walker producing a lazy candidate stream
//! 2. **Risk arbiter** — deterministic rules first, budgeted LLM arbitration second
//! 3. **Executor** — staged backup-then-delete with bounded retries
//! 4. **Recovery store** — content-addressed backups, manifests, retention reaper

pub mod ai;
pub mod arbiter;
pub mod backup;
pub mod core;
pub mod executor;
pub mod prelude;
pub mod recovery;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod store;
pub mod whitelist;

#[cfg(feature = "cli")]
pub mod cli_app;
