//! Polling file watcher for watch mode.
//!
//! Service directories are walked on every tick and compared against the
//! modification times seen so far. New or newer files are collected into a
//! pending batch; the batch is handed to a [`ChangeHandler`] only once no
//! further change has been seen for the debounce delay. Deleted files are not
//! reported.

use async_trait::async_trait;
use glob::Pattern;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use walkdir::WalkDir;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_DEBOUNCE_DELAY: Duration = Duration::from_millis(300);

pub const DEFAULT_IGNORE_PATTERNS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "__pycache__",
    "*.pyc",
    "bin",
    "obj",
    "dist",
    "build",
    "coverage",
    "test-results",
    ".DS_Store",
];

pub const RELEVANT_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "cs", "go", "java",
];

#[derive(Error, Debug)]
pub enum WatchError {
    /// A watched root is missing
    #[error("watch path does not exist: {}", path.display())]
    Scan { path: PathBuf },

    /// An ignore pattern is not a valid glob
    #[error("invalid ignore pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WatchResult<T> = Result<T, WatchError>;

/// Receives each debounced batch of changes.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    /// `services` lists the affected services; empty means every service.
    async fn on_change(&self, services: Vec<String>, files: Vec<PathBuf>);
}

/// Trailing-edge debounce over a set of changed paths.
#[derive(Debug, Default)]
pub struct Debouncer {
    delay: Duration,
    pending: BTreeSet<PathBuf>,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Record changes and push the deadline out to `now + delay`.
    pub fn notify(&mut self, paths: impl IntoIterator<Item = PathBuf>, now: Instant) {
        let mut changed = false;
        for path in paths {
            self.pending.insert(path);
            changed = true;
        }
        if changed {
            self.deadline = Some(now + self.delay);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the pending batch if the quiet period has elapsed.
    pub fn take_due(&mut self, now: Instant) -> Option<BTreeSet<PathBuf>> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }

    /// Drop anything pending without firing.
    pub fn cancel(&mut self) {
        self.deadline = None;
        self.pending.clear();
    }
}

pub struct FileWatcher {
    roots: Vec<PathBuf>,
    services: Vec<(String, PathBuf)>,
    ignore: Vec<Pattern>,
    poll_interval: Duration,
    debounce_delay: Duration,
    last_modified: BTreeMap<PathBuf, SystemTime>,
}

impl FileWatcher {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            services: Vec::new(),
            ignore: DEFAULT_IGNORE_PATTERNS
                .iter()
                .filter_map(|p| Pattern::new(p).ok())
                .collect(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            debounce_delay: DEFAULT_DEBOUNCE_DELAY,
            last_modified: BTreeMap::new(),
        }
    }

    /// Watch every service directory and resolve changes back to service names.
    pub fn for_services(services: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        let services: Vec<(String, PathBuf)> = services.into_iter().collect();
        let roots = services.iter().map(|(_, dir)| dir.clone()).collect();
        Self {
            services,
            ..Self::new(roots)
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce_delay = delay;
        self
    }

    pub fn add_ignore_pattern(&mut self, pattern: &str) -> WatchResult<()> {
        let compiled = Pattern::new(pattern).map_err(|e| WatchError::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.ignore.push(compiled);
        Ok(())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn tracked_files(&self) -> usize {
        self.last_modified.len()
    }

    fn should_ignore(&self, path: &Path) -> bool {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent = path
            .parent()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .unwrap_or("");
        self.ignore
            .iter()
            .any(|p| p.matches(name) || p.as_str() == parent)
    }

    fn is_relevant(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| RELEVANT_EXTENSIONS.contains(&ext))
    }

    /// Relevant files under the roots with their modification times.
    /// Unreadable entries are skipped.
    fn walk(&self) -> Vec<(PathBuf, SystemTime)> {
        let mut files = Vec::new();
        for root in &self.roots {
            let entries = WalkDir::new(root)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !self.should_ignore(e.path()))
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file() && Self::is_relevant(e.path()));
            for entry in entries {
                if let Some(modified) = entry.metadata().ok().and_then(|m| m.modified().ok()) {
                    files.push((entry.into_path(), modified));
                }
            }
        }
        files
    }

    /// Record current modification times without reporting anything.
    pub fn prime(&mut self) -> WatchResult<()> {
        if let Some(missing) = self.roots.iter().find(|r| !r.exists()) {
            return Err(WatchError::Scan {
                path: missing.clone(),
            });
        }
        self.last_modified = self.walk().into_iter().collect();
        debug!(files = self.last_modified.len(), "watch baseline recorded");
        Ok(())
    }

    /// Files that are new or were modified since the previous scan.
    pub fn check_for_changes(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for (path, modified) in self.walk() {
            let newer = self
                .last_modified
                .get(&path)
                .is_none_or(|seen| modified > *seen);
            if newer {
                self.last_modified.insert(path.clone(), modified);
                changed.push(path);
            }
        }
        changed
    }

    /// Map changed files to service names.
    ///
    /// A file belongs to the service whose directory equals it or is the
    /// longest directory containing it. The result is sorted and deduplicated.
    pub fn affected_services<'a>(&self, changed: impl IntoIterator<Item = &'a PathBuf>) -> Vec<String> {
        let mut affected = BTreeSet::new();
        for path in changed {
            let owner = self
                .services
                .iter()
                .filter(|(_, dir)| path.starts_with(dir))
                .max_by_key(|(_, dir)| dir.components().count());
            if let Some((name, _)) = owner {
                affected.insert(name.clone());
            }
        }
        affected.into_iter().collect()
    }

    /// Poll until `shutdown` resolves, handing debounced batches to `handler`.
    ///
    /// A batch that is still waiting out its quiet period when `shutdown`
    /// resolves is dropped.
    pub async fn watch<H, S>(&mut self, handler: &H, shutdown: S) -> WatchResult<()>
    where
        H: ChangeHandler + ?Sized,
        S: Future<Output = ()>,
    {
        self.prime()?;
        info!(roots = self.roots.len(), files = self.tracked_files(), "watching for changes");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut debouncer = Debouncer::new(self.debounce_delay);
        tokio::pin!(shutdown);

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                _ = &mut shutdown => {
                    debouncer.cancel();
                    info!("stopped watching");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    let changed = self.check_for_changes();
                    if !changed.is_empty() {
                        debug!(count = changed.len(), "changes detected");
                        debouncer.notify(changed, Instant::now());
                    }
                }
                _ = sleep_until(deadline), if deadline.is_some() => {
                    let Some(batch) = debouncer.take_due(Instant::now()) else {
                        continue;
                    };
                    let services = self.affected_services(&batch);
                    info!(
                        files = batch.len(),
                        services = ?services,
                        "re-running tests after changes"
                    );
                    handler.on_change(services, batch.into_iter().collect()).await;
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
