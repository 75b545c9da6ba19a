//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use cleanmaster::arbiter::RiskArbiter;
use cleanmaster::core::config::Config;
use cleanmaster::core::errors::Result;
use cleanmaster::prelude::*;
use parking_lot::Mutex;
use tempfile::TempDir;

/// Everything a pipeline test needs, rooted in temp directories.
pub struct Pipeline {
    pub state_dir: TempDir,
    pub work_dir: TempDir,
    pub config: Config,
    pub db: Arc<Database>,
    pub backups: BackupStore,
    pub whitelist: Arc<Whitelist>,
}

impl Pipeline {
    pub fn new() -> Self {
        let state_dir = TempDir::new().unwrap();
        // The work area must sit outside /tmp: paths under a `tmp` segment
        // are classified Safe by the junk rules, and several scenarios need
        // the rule engine to see a neutral (Suspicious) path.
        let work_dir = tempfile::Builder::new()
            .prefix("cm-e2e-work-")
            .tempdir_in(env!("CARGO_MANIFEST_DIR"))
            .unwrap();

        let mut config = Config::default();
        config.paths.db_path = state_dir.path().join("cleanmaster.db");
        config.backup.root = Some(state_dir.path().join("Backups"));
        config.incremental.index_path =
            Some(state_dir.path().join("incremental_history.json"));
        config.incremental.min_interval_secs = 0;
        config.executor.retry_delay_ms = 1;

        let db = Arc::new(Database::open(&config.paths.db_path).unwrap());
        let backups = BackupStore::open(&config.effective_backup_root()).unwrap();
        let whitelist = Arc::new(Whitelist::new(Vec::<PathBuf>::new()));

        Self {
            state_dir,
            work_dir,
            config,
            db,
            backups,
            whitelist,
        }
    }

    pub fn scanner(&self) -> ScannerPool {
        ScannerPool::from_config(
            &self.config,
            self.whitelist.current(),
            cleanmaster::core::events::null_sender(),
            None,
        )
        .unwrap()
    }

    pub fn scanner_with_index(&self, index: Arc<IncrementalIndex>) -> ScannerPool {
        ScannerPool::from_config(
            &self.config,
            self.whitelist.current(),
            cleanmaster::core::events::null_sender(),
            Some(index),
        )
        .unwrap()
    }

    pub fn index(&self) -> Arc<IncrementalIndex> {
        Arc::new(
            IncrementalIndex::open(
                &self.config.effective_index_path(),
                self.config.incremental.min_interval_secs,
            )
            .unwrap(),
        )
    }

    pub fn arbiter(&self, gateway: Arc<dyn LlmGateway>) -> RiskArbiter {
        RiskArbiter::new(RuleEngine::with_builtins(), self.whitelist.current(), gateway)
    }

    pub fn executor(&self) -> Executor {
        Executor::new(
            Arc::clone(&self.db),
            self.backups.clone(),
            self.whitelist.current(),
            cleanmaster::core::events::null_sender(),
            self.config.executor.clone(),
        )
    }

    pub fn recovery(&self) -> RecoveryManager {
        RecoveryManager::new(Arc::clone(&self.db), self.backups.clone())
    }

    /// Scan `roots`, arbitrate every item, and persist a sealed plan.
    pub fn preview(
        &self,
        roots: Vec<PathBuf>,
        gateway: Arc<dyn LlmGateway>,
    ) -> CleanupPlan {
        let scanner = self.scanner();
        let stream = scanner.scan(
            roots,
            ScanFilters::default(),
            Arc::new(std::sync::atomic::AtomicBool::new(false)),
        );
        let items: Vec<ScanItem> = stream.collect();
        self.plan_from_items(&items, gateway)
    }

    pub fn plan_from_items(
        &self,
        items: &[ScanItem],
        gateway: Arc<dyn LlmGateway>,
    ) -> CleanupPlan {
        let arbiter = self.arbiter(gateway);
        let now = Utc::now();
        let mut new_items = Vec::new();
        for item in items {
            let assessment = arbiter.assess(item, now);
            let reason_id = self.db.intern_reason(&assessment.rationale).unwrap();
            new_items.push(NewPlanItem {
                path: item.path.clone(),
                size: item.size,
                kind: item.kind,
                rule_label: assessment.rule_label,
                final_label: assessment.final_label,
                reason_id,
            });
        }
        self.db
            .save_plan("integration plan", "quick", "test", new_items)
            .unwrap()
    }

    pub fn recovery_rows(&self) -> Vec<cleanmaster::store::RecoveryRow> {
        self.db
            .query_recovery(&RecoveryFilter::default(), 100, 0)
            .unwrap()
    }

    pub fn work_path(&self, rel: &str) -> PathBuf {
        self.work_dir.path().join(rel)
    }
}

/// Scripted gateway for deterministic arbitration tests.
pub struct ScriptedGateway {
    replies: Mutex<Vec<Result<String>>>,
    pub calls: std::sync::atomic::AtomicU32,
}

impl ScriptedGateway {
    pub fn new(replies: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: std::sync::atomic::AtomicU32::new(0),
        })
    }

    pub fn safe_reply() -> Result<String> {
        Ok("{\"risk_level\":\"safe\",\"reason\":\"known cache\"}".to_string())
    }
}

impl LlmGateway for ScriptedGateway {
    fn available(&self) -> bool {
        !self.replies.lock().is_empty()
    }

    fn review(&self, _request: &cleanmaster::ai::ReviewRequest) -> Result<String> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut replies = self.replies.lock();
        if replies.is_empty() {
            Err(CmError::Runtime {
                details: "no scripted reply left".to_string(),
            })
        } else {
            replies.remove(0)
        }
    }
}

/// Write a file of a given size under the pipeline work dir.
pub fn write_file(path: &Path, bytes: usize) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, vec![0u8; bytes]).unwrap();
}
