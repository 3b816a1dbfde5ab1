//! Compensating-action log for multi-step provisioning routines.
//!
//! Provisioning a VM spans heterogeneous resources (working directories,
//! disk images, hypervisor domains) with no native cross-resource
//! transaction. A [`RollbackContext`] is the portable substitute: as each
//! step succeeds the caller registers how to undo it, and if the routine's
//! scope ends without [`RollbackContext::commit`] every registered undo runs
//! in reverse.
//!
//! Rollback itself never fails the caller: individual undo failures are
//! accumulated as strings for reporting, and the error that triggered the
//! rollback is what the caller ultimately sees.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use wvm_core::error::Result;

type UndoFn = Box<dyn FnOnce() -> Result<()> + Send>;

struct RollbackAction {
    description: String,
    critical: bool,
    undo: Option<UndoFn>,
}

/// One provisioning transaction.
///
/// Single-writer: a context belongs to the one control flow driving the
/// provisioning routine and is not meant for concurrent registration.
pub struct RollbackContext {
    operation: String,
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    actions: Vec<RollbackAction>,
    committed: bool,
    rolled_back: bool,
}

impl RollbackContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            files: Vec::new(),
            dirs: Vec::new(),
            actions: Vec::new(),
            committed: false,
            rolled_back: false,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Register a file to delete on rollback.
    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        self.files.push(path.as_ref().to_path_buf());
    }

    /// Register a directory to delete recursively on rollback.
    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        self.dirs.push(path.as_ref().to_path_buf());
    }

    /// Register an arbitrary undo step.
    ///
    /// A `critical` action failing during rollback stops the remaining
    /// custom actions; file and directory cleanup still runs.
    pub fn register_action<F>(&mut self, description: &str, critical: bool, undo: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.actions.push(RollbackAction {
            description: description.to_string(),
            critical,
            undo: Some(Box::new(undo)),
        });
    }

    /// Mark the routine as fully succeeded; rollback becomes a no-op.
    pub fn commit(&mut self) {
        debug!(operation = %self.operation, "provisioning transaction committed");
        self.committed = true;
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Undo everything registered so far, most recent first.
    ///
    /// Runs at most once and only if the context was never committed.
    /// Never raises; returns the accumulated undo failures.
    pub fn rollback(&mut self) -> Vec<String> {
        if self.committed || self.rolled_back {
            return Vec::new();
        }
        self.rolled_back = true;

        info!(operation = %self.operation, "rolling back partial provisioning");
        let mut errors = Vec::new();

        // Custom actions first, in reverse registration order.
        while let Some(mut action) = self.actions.pop() {
            let undo = match action.undo.take() {
                Some(undo) => undo,
                None => continue,
            };
            match undo() {
                Ok(()) => debug!("undid: {}", action.description),
                Err(e) => {
                    warn!("rollback action '{}' failed: {}", action.description, e);
                    errors.push(format!("{}: {}", action.description, e));
                    if action.critical {
                        warn!(
                            "critical rollback action failed; skipping remaining actions"
                        );
                        self.actions.clear();
                        break;
                    }
                }
            }
        }

        // Filesystem cleanup is best-effort regardless of the action phase.
        while let Some(path) = self.files.pop() {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove file {}: {}", path.display(), e);
                    errors.push(format!("remove file {}: {}", path.display(), e));
                }
            }
        }

        while let Some(path) = self.dirs.pop() {
            if let Err(e) = fs::remove_dir_all(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove directory {}: {}", path.display(), e);
                    errors.push(format!("remove directory {}: {}", path.display(), e));
                }
            }
        }

        errors
    }
}

impl Drop for RollbackContext {
    fn drop(&mut self) {
        if !self.committed && !self.rolled_back {
            let errors = self.rollback();
            for error in errors {
                warn!(operation = %self.operation, "rollback error on drop: {}", error);
            }
        }
    }
}

/// Tie one [`RollbackContext`] to one provisioning call.
///
/// The closure receives the context and must call `commit()` once every step
/// has succeeded. If the scope ends uncommitted, rollback runs and the
/// closure's own result is returned unchanged, so rollback never masks the
/// root cause.
pub fn with_rollback<T, F>(operation: &str, f: F) -> Result<T>
where
    F: FnOnce(&mut RollbackContext) -> Result<T>,
{
    let mut ctx = RollbackContext::new(operation);
    let result = f(&mut ctx);
    if !ctx.is_committed() {
        for error in ctx.rollback() {
            warn!(operation = %operation, "rollback error: {}", error);
        }
    }
    result
}
