//! Parallel cancelable walker emitting a lazy stream of candidates.
//!
//! Roots are distributed over a worker pool; inside a root traversal is
//! single-threaded DFS, parent before children. The output stream is a
//! bounded channel: a slow consumer blocks the workers instead of growing an
//! unbounded buffer. Cancellation is cooperative through one atomic flag,
//! polled at every directory and every few files.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use crossbeam_channel as channel;
use parking_lot::Mutex;
use regex::Regex;

use crate::core::config::Config;
use crate::core::errors::Result;
use crate::core::events::{EventSender, PipelineEvent};
use crate::core::paths::canonical_scan_path;
use crate::core::types::{ItemKind, ScanItem};
use crate::rules::engine::glob_to_regex;
use crate::scanner::dirsize::{DirSizeCaps, compute_dir_size};
use crate::scanner::incremental::IncrementalIndex;
use crate::scanner::progress::ProgressTracker;
use crate::whitelist::WhitelistSnapshot;

/// Per-scan entry filters.
#[derive(Debug, Clone, Default)]
pub struct ScanFilters {
    /// Entries smaller than this are not emitted.
    pub min_size: u64,
    /// Emit dot-prefixed entries too.
    pub include_hidden: bool,
    /// Allow-list of file extensions (lowercase, without the dot).
    pub extensions: Option<Vec<String>>,
    /// Only entries at least this stale (by access time) are emitted.
    pub min_age: Option<Duration>,
}

impl ScanFilters {
    fn passes_extension(&self, path: &Path, kind: ItemKind) -> bool {
        let Some(allowed) = &self.extensions else {
            return true;
        };
        if kind == ItemKind::Dir {
            return true;
        }
        path.extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .is_some_and(|ext| allowed.iter().any(|a| *a == ext))
    }

    fn passes_age(&self, accessed: Option<SystemTime>, now: SystemTime) -> bool {
        let Some(min_age) = self.min_age else {
            return true;
        };
        // An entry with unknown access time is treated as fresh.
        accessed.is_some_and(|at| {
            now.duration_since(at).map_or(false, |age| age >= min_age)
        })
    }
}

/// Summary returned once the scan has fully terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub roots_scanned: usize,
    pub roots_skipped: usize,
    pub items_emitted: u64,
    pub errors: u64,
    pub cancelled: bool,
}

/// Lazy, finite, non-restartable stream of scan items.
///
/// Pull items via `Iterator`; call [`ScanStream::join`] afterwards for the
/// summary. Dropping the stream early stops the workers.
pub struct ScanStream {
    rx: Option<channel::Receiver<ScanItem>>,
    progress: ProgressTracker,
    coordinator: Option<thread::JoinHandle<ScanSummary>>,
}

impl ScanStream {
    /// Progress tracker shared with the workers.
    #[must_use]
    pub fn progress(&self) -> ProgressTracker {
        self.progress.clone()
    }

    /// Wait for full termination and return the summary. Any unconsumed
    /// items are discarded.
    pub fn join(mut self) -> ScanSummary {
        // Disconnect so blocked workers stop, then drain what is in flight.
        if let Some(rx) = self.rx.take() {
            drop(rx);
        }
        self.coordinator
            .take()
            .map_or_else(
                || ScanSummary {
                    roots_scanned: 0,
                    roots_skipped: 0,
                    items_emitted: 0,
                    errors: 0,
                    cancelled: false,
                },
                |h| {
                    h.join().unwrap_or(ScanSummary {
                        roots_scanned: 0,
                        roots_skipped: 0,
                        items_emitted: 0,
                        errors: 0,
                        cancelled: true,
                    })
                },
            )
    }
}

impl Iterator for ScanStream {
    type Item = ScanItem;

    fn next(&mut self) -> Option<ScanItem> {
        self.rx.as_ref()?.recv().ok()
    }
}

struct ScanCtx {
    filters: ScanFilters,
    caps: DirSizeCaps,
    poll_granularity: usize,
    exclude: Vec<Regex>,
    system_skip: Vec<PathBuf>,
    whitelist: Arc<WhitelistSnapshot>,
    events: EventSender,
    cancel: Arc<AtomicBool>,
    seen: Mutex<HashSet<PathBuf>>,
    progress: ProgressTracker,
}

struct RootOutcome {
    root: PathBuf,
    items: u64,
    bytes: u64,
    errors: u64,
    completed: bool,
}

/// Parallel cancelable file-tree walker.
pub struct ScannerPool {
    thread_count: usize,
    channel_capacity: usize,
    caps: DirSizeCaps,
    poll_granularity: usize,
    exclude: Vec<Regex>,
    system_skip: Vec<PathBuf>,
    whitelist: Arc<WhitelistSnapshot>,
    events: EventSender,
    incremental: Option<Arc<IncrementalIndex>>,
}

impl ScannerPool {
    /// Build a pool from configuration plus the collaborators it consults.
    pub fn from_config(
        config: &Config,
        whitelist: Arc<WhitelistSnapshot>,
        events: EventSender,
        incremental: Option<Arc<IncrementalIndex>>,
    ) -> Result<Self> {
        let exclude = config
            .scanner
            .exclude_globs
            .iter()
            .map(|g| glob_to_regex(g))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            thread_count: config.effective_thread_count(),
            channel_capacity: config.scanner.channel_capacity,
            caps: DirSizeCaps {
                wall_clock: Duration::from_secs(config.scanner.dir_size_wall_clock_secs),
                max_files: config.scanner.dir_size_max_files,
            },
            poll_granularity: config.scanner.cancel_poll_granularity.max(1),
            exclude,
            system_skip: config.scanner.system_skip.clone(),
            whitelist,
            events,
            incremental,
        })
    }

    /// Start a scan. Returns immediately with the lazy item stream.
    #[must_use]
    pub fn scan(
        &self,
        roots: Vec<PathBuf>,
        filters: ScanFilters,
        cancel: Arc<AtomicBool>,
    ) -> ScanStream {
        let scan_started = Utc::now();
        let progress = ProgressTracker::new(roots.len());
        let (item_tx, item_rx) = channel::bounded::<ScanItem>(self.channel_capacity);

        // Resolve per-root incremental cutoffs and the min-interval guard
        // before any worker starts.
        let mut tasks: Vec<(PathBuf, Option<DateTime<Utc>>)> = Vec::new();
        let mut roots_skipped = 0usize;
        for root in roots {
            let root = canonical_scan_path(&root);
            if let Some(index) = &self.incremental {
                if !index.should_scan(&root, scan_started) {
                    roots_skipped += 1;
                    progress.root_completed();
                    self.events.send(PipelineEvent::ScanWarning {
                        path: root.clone(),
                        code: "min_interval",
                        message: "scanned too recently; skipping".to_string(),
                    });
                    continue;
                }
                tasks.push((root.clone(), index.last_scan_at(&root)));
            } else {
                tasks.push((root, None));
            }
        }

        let ctx = Arc::new(ScanCtx {
            filters,
            caps: self.caps,
            poll_granularity: self.poll_granularity,
            exclude: self.exclude.clone(),
            system_skip: self.system_skip.clone(),
            whitelist: Arc::clone(&self.whitelist),
            events: self.events.clone(),
            cancel,
            seen: Mutex::new(HashSet::new()),
            progress: progress.clone(),
        });

        let worker_count = self.thread_count.min(tasks.len()).max(1);
        let (task_tx, task_rx) = channel::unbounded::<(PathBuf, Option<DateTime<Utc>>)>();
        for task in tasks {
            let _ = task_tx.send(task);
        }
        drop(task_tx);

        let (outcome_tx, outcome_rx) = channel::unbounded::<RootOutcome>();

        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let task_rx = task_rx.clone();
            let item_tx = item_tx.clone();
            let outcome_tx = outcome_tx.clone();
            let ctx = Arc::clone(&ctx);
            workers.push(thread::spawn(move || {
                for (root, since) in &task_rx {
                    let outcome = scan_root(&root, since, &item_tx, &ctx);
                    ctx.progress.root_completed();
                    let _ = outcome_tx.send(outcome);
                    if ctx.cancel.load(Ordering::Relaxed) {
                        break;
                    }
                }
            }));
        }
        drop(item_tx);
        drop(outcome_tx);

        let incremental = self.incremental.clone();
        let coordinator = thread::spawn(move || {
            let outcomes: Vec<RootOutcome> = outcome_rx.iter().collect();
            for worker in workers {
                let _ = worker.join();
            }

            let cancelled = ctx.cancel.load(Ordering::Relaxed);
            if cancelled {
                ctx.progress.mark_cancelled();
            }

            // The index moves forward only after clean termination; a
            // cancelled scan must leave it untouched so nothing is missed.
            if !cancelled
                && let Some(index) = incremental
            {
                for outcome in outcomes.iter().filter(|o| o.completed) {
                    let _ = index.mark_scanned(
                        &outcome.root,
                        scan_started,
                        outcome.items,
                        outcome.bytes,
                    );
                }
            }

            ScanSummary {
                roots_scanned: outcomes.iter().filter(|o| o.completed).count(),
                roots_skipped,
                items_emitted: outcomes.iter().map(|o| o.items).sum(),
                errors: outcomes.iter().map(|o| o.errors).sum(),
                cancelled,
            }
        });

        ScanStream {
            rx: Some(item_rx),
            progress,
            coordinator: Some(coordinator),
        }
    }
}

/// Walk one root depth-first, emitting entries parent-before-children.
fn scan_root(
    root: &Path,
    since: Option<DateTime<Utc>>,
    item_tx: &channel::Sender<ScanItem>,
    ctx: &ScanCtx,
) -> RootOutcome {
    let mut outcome = RootOutcome {
        root: root.to_path_buf(),
        items: 0,
        bytes: 0,
        errors: 0,
        completed: false,
    };

    match fs::symlink_metadata(root) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) | Err(_) => {
            ctx.events.send(PipelineEvent::ScanWarning {
                path: root.to_path_buf(),
                code: "CM-3105",
                message: "root is missing or not a directory".to_string(),
            });
            outcome.errors += 1;
            return outcome;
        }
    }

    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        if ctx.cancel.load(Ordering::Relaxed) {
            return outcome;
        }
        ctx.progress.set_current_path(dir.clone());

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                if err.kind() == ErrorKind::PermissionDenied {
                    ctx.events.send(PipelineEvent::ScanWarning {
                        path: dir.clone(),
                        code: "CM-2002",
                        message: "permission denied".to_string(),
                    });
                }
                outcome.errors += 1;
                continue;
            }
        };

        let mut files_since_poll = 0usize;
        for entry in entries {
            files_since_poll += 1;
            if files_since_poll >= ctx.poll_granularity {
                files_since_poll = 0;
                if ctx.cancel.load(Ordering::Relaxed) {
                    return outcome;
                }
            }

            let Ok(entry) = entry else {
                outcome.errors += 1;
                continue;
            };
            let path = entry.path();
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(_) => {
                    // Broken symlink or entry vanished mid-scan.
                    outcome.errors += 1;
                    continue;
                }
            };
            if meta.file_type().is_symlink() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_lowercase();
            if !ctx.filters.include_hidden && name.starts_with('.') {
                continue;
            }

            if meta.is_dir() {
                if should_skip_dir(&path, &name, ctx) {
                    continue;
                }
                emit_dir(&path, &meta, since, item_tx, ctx, &mut outcome);
                stack.push(path);
            } else {
                emit_file(&path, &meta, since, item_tx, ctx, &mut outcome);
            }
        }
    }

    outcome.completed = !ctx.cancel.load(Ordering::Relaxed);
    outcome
}

fn should_skip_dir(path: &Path, lowered_name: &str, ctx: &ScanCtx) -> bool {
    if ctx.system_skip.iter().any(|skip| path.starts_with(skip)) {
        return true;
    }
    if ctx.whitelist.is_protected(path) {
        return true;
    }
    ctx.exclude.iter().any(|re| re.is_match(lowered_name))
}

fn emit_dir(
    path: &Path,
    meta: &fs::Metadata,
    since: Option<DateTime<Utc>>,
    item_tx: &channel::Sender<ScanItem>,
    ctx: &ScanCtx,
    outcome: &mut RootOutcome,
) {
    if let Some(cutoff) = since
        && !newer_than(meta.modified().ok(), cutoff)
    {
        return;
    }
    // A directory holding a protected descendant is still descended into,
    // but must not become a single deletable candidate.
    if ctx.whitelist.protects_within(path) {
        return;
    }

    let size = compute_dir_size(path, ctx.caps, &ctx.cancel);
    if size.capped {
        ctx.events.send(PipelineEvent::ScanWarning {
            path: path.to_path_buf(),
            code: "CM-2003",
            message: format!(
                "directory size is a partial sum ({} bytes over {} files)",
                size.bytes, size.files_seen
            ),
        });
    }
    if size.bytes < ctx.filters.min_size {
        return;
    }

    send_item(path, size.bytes, ItemKind::Dir, item_tx, ctx, outcome);
}

fn emit_file(
    path: &Path,
    meta: &fs::Metadata,
    since: Option<DateTime<Utc>>,
    item_tx: &channel::Sender<ScanItem>,
    ctx: &ScanCtx,
    outcome: &mut RootOutcome,
) {
    if meta.len() < ctx.filters.min_size {
        return;
    }
    if !ctx.filters.passes_extension(path, ItemKind::File) {
        return;
    }
    let accessed = meta.accessed().ok().or_else(|| meta.modified().ok());
    if !ctx.filters.passes_age(accessed, SystemTime::now()) {
        return;
    }
    if let Some(cutoff) = since
        && !newer_than(meta.modified().ok(), cutoff)
    {
        return;
    }

    send_item(path, meta.len(), ItemKind::File, item_tx, ctx, outcome);
}

fn send_item(
    path: &Path,
    size: u64,
    kind: ItemKind,
    item_tx: &channel::Sender<ScanItem>,
    ctx: &ScanCtx,
    outcome: &mut RootOutcome,
) {
    // Overlapping roots may reach the same path twice; within one scan every
    // emitted path is unique.
    if !ctx.seen.lock().insert(path.to_path_buf()) {
        return;
    }

    let item = ScanItem {
        path: path.to_path_buf(),
        size,
        kind,
        discovered_at: Utc::now(),
    };
    if item_tx.send(item).is_err() {
        // Downstream is gone; treat as cancellation so the index stays put.
        ctx.cancel.store(true, Ordering::Relaxed);
        return;
    }
    ctx.progress.record_item(size);
    outcome.items += 1;
    outcome.bytes = outcome.bytes.saturating_add(size);
}

fn newer_than(modified: Option<SystemTime>, cutoff: DateTime<Utc>) -> bool {
    modified.is_some_and(|m| DateTime::<Utc>::from(m) > cutoff)
}
