//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use cleanmaster::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{CmError, Result};
pub use crate::core::events::{EventSender, PipelineEvent, event_channel};
pub use crate::core::types::{
    BackupInfo, BackupKind, CleanupPlan, ExecutionResult, ItemKind, ItemStatus, PlanItem,
    PlanStatus, RiskLabel, ScanItem,
};

// Pipeline
pub use crate::arbiter::{Assessment, RiskArbiter};
pub use crate::executor::Executor;
pub use crate::rules::RuleEngine;
pub use crate::scanner::{IncrementalIndex, ScanFilters, ScannerPool};
pub use crate::whitelist::Whitelist;

// AI
pub use crate::ai::client::AiReviewer;
pub use crate::ai::cost::CostController;
pub use crate::ai::{LlmGateway, NoLlm};

// Backup and recovery
pub use crate::backup::{BackupManifest, BackupStore, cleanup_old_backups};
pub use crate::recovery::RecoveryManager;

// Persistence
pub use crate::store::{Database, NewPlanItem, RecoveryFilter};
