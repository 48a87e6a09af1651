//! Atomic multi-file edits
//!
//! An [`EditTransaction`] is staged (snapshots, fingerprints and diffs are
//! computed, nothing is written), then either committed or aborted. Commit is
//! all-or-nothing: if any write fails, everything already written in the same
//! transaction is put back in reverse order before the failure is reported.
//! Only when a revert itself fails does partial state survive, and then the
//! exact paths are reported.

pub mod diff;
pub mod store;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sdk::{EngineError, Interrupt, ToolError};
use serde::Serialize;
use tracing::{debug, error, info, warn};

pub use store::{FileStore, LocalFileStore};

/// Content hash used to detect external modification between stage and commit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(content: &str) -> Self {
        Self(blake3::hash(content.as_bytes()).to_hex().to_string())
    }

    /// Fingerprint of an optional file; `None` means "did not exist".
    pub fn of_file(content: Option<&str>) -> Option<Self> {
        content.map(Self::of)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A requested change to one file, with an already-validated path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Write { path: PathBuf, content: String },
    Delete { path: PathBuf },
}

impl Mutation {
    pub fn write(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        Self::Write {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn delete(path: impl Into<PathBuf>) -> Self {
        Self::Delete { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Write { path, .. } | Self::Delete { path } => path,
        }
    }
}

/// One staged file mutation
#[derive(Debug, Clone, Serialize)]
pub struct StagedEdit {
    pub path: PathBuf,
    pub display_path: String,
    /// Snapshot at stage time; `None` if the file did not exist
    pub original: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    /// `None` deletes the file
    pub proposed: Option<String>,
    pub diff: String,
    pub added: usize,
    pub removed: usize,
}

impl StagedEdit {
    pub fn is_create(&self) -> bool {
        self.original.is_none()
    }

    pub fn is_delete(&self) -> bool {
        self.proposed.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Staged,
    Committed,
    Aborted,
}

/// A named, ordered group of file mutations
#[derive(Debug, Clone, Serialize)]
pub struct EditTransaction {
    id: String,
    name: String,
    state: TransactionState,
    edits: Vec<StagedEdit>,
}

impl EditTransaction {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn edits(&self) -> &[StagedEdit] {
        &self.edits
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.edits.iter().map(|e| e.path.as_path()).collect()
    }

    /// All per-file diffs concatenated in declared order
    pub fn diff(&self) -> String {
        self.edits
            .iter()
            .map(|e| e.diff.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// e.g. `2 files changed (+12 -3)`
    pub fn summary(&self) -> String {
        let added: usize = self.edits.iter().map(|e| e.added).sum();
        let removed: usize = self.edits.iter().map(|e| e.removed).sum();
        let files = self.edits.len();
        format!(
            "{} file{} changed (+{} -{})",
            files,
            if files == 1 { "" } else { "s" },
            added,
            removed
        )
    }
}

/// Why a commit did not go through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CommitFailure {
    /// The on-disk fingerprint no longer matches the staged one
    Conflict,
    WriteFailed(String),
    Interrupted,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitResult {
    pub ok: bool,
    pub transaction_id: String,
    pub state: TransactionState,
    /// Paths written, in order (empty on failure once reverted)
    pub written: Vec<PathBuf>,
    pub failed_path: Option<PathBuf>,
    /// True when the workspace is back to its pre-transaction state
    pub reverted: bool,
    /// Paths whose content is unknown because a revert failed
    pub indeterminate: Vec<PathBuf>,
    pub failure: Option<CommitFailure>,
}

impl CommitResult {
    /// Map the outcome onto the tool error taxonomy.
    pub fn into_tool_result(self) -> Result<Vec<PathBuf>, ToolError> {
        if self.ok {
            return Ok(self.written);
        }

        let failed = self
            .failed_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        if !self.reverted {
            return Err(ToolError::EditIrrecoverable {
                failed_path: failed,
                paths: self
                    .indeterminate
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            });
        }

        match self.failure {
            Some(CommitFailure::Conflict) => Err(ToolError::EditConflict { path: failed }),
            Some(CommitFailure::Interrupted) => Err(ToolError::Interrupted),
            Some(CommitFailure::WriteFailed(reason)) => Err(ToolError::ExecutionFailed {
                message: format!("writing {} failed: {}; all changes reverted", failed, reason),
                output: None,
            }),
            None => Err(ToolError::execution_failed("commit failed")),
        }
    }

    /// Map the outcome onto the engine error taxonomy.
    pub fn into_engine_result(self) -> Result<Vec<PathBuf>, EngineError> {
        if !self.ok && !self.reverted {
            return Err(EngineError::EditIrrecoverable {
                failed_path: self.failed_path.unwrap_or_default(),
                paths: self.indeterminate,
            });
        }
        if let (false, Some(CommitFailure::Conflict)) = (self.ok, &self.failure) {
            return Err(EngineError::EditConflict(
                self.failed_path.unwrap_or_default(),
            ));
        }
        self.into_tool_result().map_err(EngineError::from)
    }
}

/// Sole owner of file-write ordering
///
/// Commits lock every path they touch (in sorted order, so overlapping
/// transactions cannot deadlock) and re-check fingerprints under the lock.
/// Transactions over disjoint paths never wait on each other.
pub struct EditManager {
    store: Arc<dyn FileStore>,
    root: Option<PathBuf>,
    locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl EditManager {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            root: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Render diff headers relative to `root`
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn FileStore> {
        &self.store
    }

    fn display(&self, path: &Path) -> String {
        self.root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Snapshot, fingerprint and diff every mutation without writing anything.
    pub async fn stage(
        &self,
        name: impl Into<String>,
        mutations: Vec<Mutation>,
    ) -> Result<EditTransaction, EngineError> {
        let name = name.into();
        if mutations.is_empty() {
            return Err(ToolError::invalid_args("an edit needs at least one file").into());
        }

        let mut seen = HashSet::new();
        let mut edits = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            let path = mutation.path().to_path_buf();
            if !seen.insert(path.clone()) {
                return Err(ToolError::invalid_args(format!(
                    "{} appears more than once in the same edit",
                    self.display(&path)
                ))
                .into());
            }

            let original = self.store.read(&path).await?;
            let proposed = match mutation {
                Mutation::Write { content, .. } => Some(content),
                Mutation::Delete { .. } => {
                    if original.is_none() {
                        return Err(ToolError::invalid_args(format!(
                            "cannot delete {}: file does not exist",
                            self.display(&path)
                        ))
                        .into());
                    }
                    None
                }
            };

            let display_path = self.display(&path);
            let diff = diff::unified(&display_path, original.as_deref(), proposed.as_deref());
            let (added, removed) = diff::line_stats(original.as_deref(), proposed.as_deref());
            edits.push(StagedEdit {
                fingerprint: Fingerprint::of_file(original.as_deref()),
                path,
                display_path,
                original,
                proposed,
                diff,
                added,
                removed,
            });
        }

        let tx = EditTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            state: TransactionState::Staged,
            edits,
        };
        debug!(tx = %tx.id, name = %tx.name, files = tx.edits.len(), "Staged edit transaction");
        Ok(tx)
    }

    /// Discard a staged transaction. Never touches the filesystem.
    pub fn abort(&self, mut tx: EditTransaction) -> EditTransaction {
        debug!(tx = %tx.id, "Aborted edit transaction");
        tx.state = TransactionState::Aborted;
        tx
    }

    /// Write every mutation in declared order, or none of them.
    pub async fn commit(&self, tx: EditTransaction, interrupt: &Interrupt) -> CommitResult {
        let _guards = self.lock_paths(&tx).await;

        let mut touched: Vec<usize> = Vec::new();
        let mut created_dirs: Vec<PathBuf> = Vec::new();
        let mut failure = None;
        let mut failed_path = None;

        for (index, edit) in tx.edits.iter().enumerate() {
            if interrupt.is_triggered() {
                warn!(tx = %tx.id, "Commit interrupted before {}", edit.display_path);
                failure = Some(CommitFailure::Interrupted);
                break;
            }

            let current = match self.store.read(&edit.path).await {
                Ok(current) => current,
                Err(e) => {
                    failure = Some(CommitFailure::WriteFailed(e.to_string()));
                    failed_path = Some(edit.path.clone());
                    break;
                }
            };
            if Fingerprint::of_file(current.as_deref()) != edit.fingerprint {
                warn!(tx = %tx.id, path = %edit.display_path, "File changed since it was staged");
                failure = Some(CommitFailure::Conflict);
                failed_path = Some(edit.path.clone());
                break;
            }

            if edit.original.is_none() {
                match self.store.create_parents(&edit.path).await {
                    Ok(dirs) => created_dirs.extend(dirs),
                    Err(e) => {
                        error!(tx = %tx.id, path = %edit.display_path, "Cannot create parent: {}", e);
                        failure = Some(CommitFailure::WriteFailed(e.to_string()));
                        failed_path = Some(edit.path.clone());
                        break;
                    }
                }
            }

            let outcome = match &edit.proposed {
                Some(content) => self.store.write(&edit.path, content).await,
                None => self.store.remove(&edit.path).await,
            };
            match outcome {
                Ok(()) => touched.push(index),
                Err(e) => {
                    error!(tx = %tx.id, path = %edit.display_path, "Write failed: {}", e);
                    // The failed write may have left partial content behind.
                    touched.push(index);
                    failure = Some(CommitFailure::WriteFailed(e.to_string()));
                    failed_path = Some(edit.path.clone());
                    break;
                }
            }
        }

        if failure.is_none() {
            info!(tx = %tx.id, name = %tx.name, "{}", tx.summary());
            return CommitResult {
                ok: true,
                transaction_id: tx.id.clone(),
                state: TransactionState::Committed,
                written: tx.edits.iter().map(|e| e.path.clone()).collect(),
                failed_path: None,
                reverted: false,
                indeterminate: Vec::new(),
                failure: None,
            };
        }

        let indeterminate = self.revert(&tx, &touched, &created_dirs).await;
        let reverted = indeterminate.is_empty();
        if reverted {
            info!(tx = %tx.id, "Reverted {} file(s)", touched.len());
        } else {
            error!(tx = %tx.id, paths = ?indeterminate, "Revert failed; files left indeterminate");
        }

        CommitResult {
            ok: false,
            transaction_id: tx.id.clone(),
            state: TransactionState::Aborted,
            written: Vec::new(),
            failed_path,
            reverted,
            indeterminate,
            failure,
        }
    }

    /// Restore touched edits in reverse order, then drop the directories the
    /// commit created, deepest first. Returns the paths that could not be
    /// restored.
    async fn revert(
        &self,
        tx: &EditTransaction,
        touched: &[usize],
        created_dirs: &[PathBuf],
    ) -> Vec<PathBuf> {
        let mut indeterminate = Vec::new();
        for &index in touched.iter().rev() {
            let edit = &tx.edits[index];

            // Skip files that already hold their original content.
            if let Ok(current) = self.store.read(&edit.path).await {
                if Fingerprint::of_file(current.as_deref()) == edit.fingerprint {
                    continue;
                }
            }

            let outcome = match &edit.original {
                Some(content) => self.store.write(&edit.path, content).await,
                None => self.store.remove(&edit.path).await,
            };
            if let Err(e) = outcome {
                error!(path = %edit.display_path, "Revert failed: {}", e);
                indeterminate.push(edit.path.clone());
            }
        }

        for dir in created_dirs.iter().rev() {
            if let Err(e) = self.store.remove_dir(dir).await {
                debug!(dir = %dir.display(), "Left directory in place: {}", e);
            }
        }
        indeterminate
    }

    async fn lock_paths(&self, tx: &EditTransaction) -> Vec<tokio::sync::OwnedMutexGuard<()>> {
        let ordered: BTreeSet<&PathBuf> = tx.edits.iter().map(|e| &e.path).collect();
        let locks: Vec<Arc<tokio::sync::Mutex<()>>> = {
            let mut table = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            table.retain(|_, lock| Arc::strong_count(lock) > 1);
            ordered
                .into_iter()
                .map(|path| Arc::clone(table.entry(path.clone()).or_default()))
                .collect()
        };

        let mut guards = Vec::with_capacity(locks.len());
        for lock in locks {
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}
