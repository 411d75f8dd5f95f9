//! Outcome types for launches and purges

use crate::TaskUserError;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Result of a successful command launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    /// Position of the command in its task
    pub index: usize,

    /// Log file, relative to the identity home directory
    pub log_file: String,

    /// Exit code reported by the run-as tool
    pub exit_code: i32,

    /// Wall-clock time from spawn to exit
    pub duration: Duration,
}

impl CommandResult {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A best-effort step that failed; logged and skipped
#[derive(Debug)]
pub struct Warning {
    /// What was being attempted
    pub context: String,

    /// Why it failed
    pub error: TaskUserError,
}

impl Warning {
    /// Record a warning and emit it to the log
    pub fn emit(context: impl Into<String>, error: TaskUserError) -> Self {
        let context = context.into();
        tracing::warn!(error = %error, "{context}");
        Self { context, error }
    }
}

/// What a stale-identity purge did
#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Accounts that were deleted
    pub deleted_accounts: Vec<String>,

    /// Home directories that were removed
    pub removed_home_dirs: Vec<PathBuf>,

    /// Steps that failed and were skipped
    pub warnings: Vec<Warning>,
}

impl PurgeReport {
    /// True when nothing was found to delete and nothing failed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deleted_accounts.is_empty()
            && self.removed_home_dirs.is_empty()
            && self.warnings.is_empty()
    }
}
