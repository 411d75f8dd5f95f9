//! Ephemeral identity lifecycle
//!
//! An identity is a throwaway OS account plus a locked-down home directory.
//! Accounts and home directories share the `Task_` prefix; that prefix is
//! the only thing telling them apart from real accounts, so a human account
//! named `Task_...` would be purged too.

use crate::credentials::generate_password;
use crate::result::{PurgeReport, Warning};
use crate::{HostAccountProvider, HostConfig, Result, TaskUserError};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Prefix shared by ephemeral account names and home directories
pub const IDENTITY_PREFIX: &str = "Task_";

/// Longest account name the host accepts
pub const MAX_ACCOUNT_NAME_LEN: usize = 20;

/// Account name for an identity created at `unix_secs`.
///
/// Two identities created within the same second get the same name.
#[must_use]
pub fn identity_name(unix_secs: u64) -> String {
    let mut name = format!("{IDENTITY_PREFIX}{unix_secs}");
    name.truncate(MAX_ACCOUNT_NAME_LEN);
    name
}

/// Whether an account or directory name belongs to an ephemeral identity
#[must_use]
pub fn is_ephemeral_name(name: &str) -> bool {
    name.starts_with(IDENTITY_PREFIX)
}

/// A provisioned OS account
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    home_dir: PathBuf,
    password: String,
}

impl Identity {
    pub fn new(
        name: impl Into<String>,
        home_dir: impl Into<PathBuf>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            home_dir: home_dir.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// `<home>/public/logs`
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.home_dir.join("public").join("logs")
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("home_dir", &self.home_dir)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Owns the host provider and the single live identity
#[derive(Debug)]
pub struct IdentityManager<H> {
    host: H,
    config: HostConfig,
    current: Option<Identity>,
}

impl<H: HostAccountProvider> IdentityManager<H> {
    pub const fn new(host: H, config: HostConfig) -> Self {
        Self {
            host,
            config,
            current: None,
        }
    }

    pub const fn host(&self) -> &H {
        &self.host
    }

    pub const fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The identity from the last successful provisioning
    pub const fn current(&self) -> Option<&Identity> {
        self.current.as_ref()
    }

    /// Purge leftovers from earlier runs, then provision a fresh identity.
    ///
    /// The purge never fails; a provisioning failure is returned.
    pub fn startup(&mut self) -> Result<PurgeReport> {
        let report = self.purge_stale_identities();
        self.provision_identity()?;
        Ok(report)
    }

    /// Delete every ephemeral account and home directory on the host.
    ///
    /// Best-effort: each failure becomes a warning in the report.
    pub fn purge_stale_identities(&self) -> PurgeReport {
        tracing::info!("looking for existing task users to delete");
        let mut report = PurgeReport::default();
        self.purge_accounts(&mut report);
        self.purge_home_dirs(&mut report);
        tracing::info!(
            accounts = report.deleted_accounts.len(),
            home_dirs = report.removed_home_dirs.len(),
            warnings = report.warnings.len(),
            "purge finished"
        );
        report
    }

    fn purge_accounts(&self, report: &mut PurgeReport) {
        let mut stale = Vec::new();
        if let Err(e) = self.host.list_accounts(&mut |name: &str| {
            if is_ephemeral_name(name) {
                stale.push(name.to_string());
            }
        }) {
            report
                .warnings
                .push(Warning::emit("could not list existing user accounts", e));
        }

        for account in stale {
            tracing::info!(%account, "removing stale user");
            match self.host.delete_account(&account) {
                Ok(()) => report.deleted_accounts.push(account),
                Err(e) => report.warnings.push(Warning::emit(
                    format!("could not remove user account {account}"),
                    e,
                )),
            }
        }
    }

    fn purge_home_dirs(&self, report: &mut PurgeReport) {
        let parent = &self.config.home_parent;
        let entries = match std::fs::read_dir(parent) {
            Ok(entries) => entries,
            Err(e) => {
                report.warnings.push(Warning::emit(
                    format!("could not open {} to find old home directories", parent.display()),
                    e.into(),
                ));
                return;
            }
        };

        // a failed entry does not stop the rest of the listing
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.warnings.push(Warning::emit(
                        format!("incomplete listing of {}", parent.display()),
                        e.into(),
                    ));
                    continue;
                }
            };

            let is_dir = entry.file_type().is_ok_and(|t| t.is_dir());
            if !is_dir || !is_ephemeral_name(&entry.file_name().to_string_lossy()) {
                continue;
            }

            let path = entry.path();
            tracing::info!(path = %path.display(), "removing home directory");
            match std::fs::remove_dir_all(&path) {
                Ok(()) => report.removed_home_dirs.push(path),
                Err(e) => report.warnings.push(Warning::emit(
                    format!("could not delete directory {}", path.display()),
                    e.into(),
                )),
            }
        }
    }

    /// Provision a new identity named after the current time
    pub fn provision_identity(&mut self) -> Result<&Identity> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| TaskUserError::Provision(format!("system clock before epoch: {e}")))?;
        self.provision_identity_at(now.as_secs())
    }

    /// Provision a new identity named after `unix_secs`.
    ///
    /// Any failing step aborts. Nothing is rolled back: whatever was created
    /// is left for the next purge.
    pub fn provision_identity_at(&mut self, unix_secs: u64) -> Result<&Identity> {
        let name = identity_name(unix_secs);
        let identity = Identity::new(
            name.as_str(),
            self.config.home_parent.join(&name),
            generate_password(),
        );
        let home = identity.home_dir();

        tracing::info!(account = %name, home = %home.display(), "creating task user");
        std::fs::create_dir_all(home).map_err(|e| {
            TaskUserError::Provision(format!("cannot create {}: {e}", home.display()))
        })?;

        self.host.restrict_home_dir(home)?;
        self.host.create_account(&identity)?;
        self.host.grant_full_control(home, &name)?;
        self.host.add_to_remote_access_group(&name)?;
        self.host.probe_login(&identity)?;

        let logs = identity.logs_dir();
        std::fs::create_dir_all(&logs).map_err(|e| {
            TaskUserError::Provision(format!("cannot create {}: {e}", logs.display()))
        })?;

        tracing::info!(account = %name, "task user ready");
        Ok(self.current.insert(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostOp, InMemoryHost};
    use tempfile::TempDir;

    const NOW: u64 = 1_700_000_000;

    fn manager(host: InMemoryHost) -> (IdentityManager<InMemoryHost>, TempDir) {
        let homes = tempfile::tempdir().unwrap();
        let config = HostConfig::builder().home_parent(homes.path()).build();
        (IdentityManager::new(host, config), homes)
    }

    #[test]
    fn name_has_prefix_and_fits() {
        assert_eq!(identity_name(NOW), "Task_1700000000");
        for secs in [0, NOW, u64::MAX] {
            let name = identity_name(secs);
            assert!(name.len() <= MAX_ACCOUNT_NAME_LEN);
            assert!(is_ephemeral_name(&name));
        }
    }

    #[test]
    fn debug_hides_password() {
        let identity = Identity::new("Task_1", "/homes/Task_1", "pWd0_hunter2");
        assert!(!format!("{identity:?}").contains("hunter2"));
    }

    #[test]
    fn purge_deletes_only_ephemeral_accounts() {
        let host = InMemoryHost::new().with_accounts(["Task_1000", "Task_2000", "Administrator"]);
        let (manager, _homes) = manager(host);

        let report = manager.purge_stale_identities();

        assert_eq!(report.deleted_accounts, ["Task_1000", "Task_2000"]);
        assert_eq!(manager.host().accounts(), ["Administrator"]);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn purge_removes_ephemeral_home_dirs() {
        let (manager, homes) = manager(InMemoryHost::new());
        std::fs::create_dir_all(homes.path().join("Task_1000").join("public")).unwrap();
        std::fs::create_dir(homes.path().join("Administrator")).unwrap();
        std::fs::write(homes.path().join("Task_file"), b"not a dir").unwrap();

        let report = manager.purge_stale_identities();

        assert_eq!(report.removed_home_dirs, [homes.path().join("Task_1000")]);
        assert!(!homes.path().join("Task_1000").exists());
        assert!(homes.path().join("Administrator").exists());
        assert!(homes.path().join("Task_file").exists());
    }

    #[test]
    fn purge_twice_is_quiet() {
        let host = InMemoryHost::new().with_accounts(["Task_1000", "Guest"]);
        let (manager, homes) = manager(host);
        std::fs::create_dir(homes.path().join("Task_1000")).unwrap();

        let first = manager.purge_stale_identities();
        assert!(!first.is_empty());
        let accounts = manager.host().accounts();

        let second = manager.purge_stale_identities();
        assert!(second.is_empty());
        assert_eq!(manager.host().accounts(), accounts);
    }

    #[test]
    fn listing_failure_still_purges_home_dirs() {
        let host = InMemoryHost::new()
            .with_accounts(["Task_1000"])
            .failing(HostOp::ListAccounts);
        let (manager, homes) = manager(host);
        std::fs::create_dir(homes.path().join("Task_1000")).unwrap();

        let report = manager.purge_stale_identities();

        assert_eq!(report.warnings.len(), 1);
        assert!(report.deleted_accounts.is_empty());
        assert_eq!(report.removed_home_dirs.len(), 1);
    }

    #[test]
    fn failed_delete_is_skipped() {
        let host = InMemoryHost::new()
            .with_accounts(["Task_1000", "Task_2000"])
            .failing_delete_of("Task_1000");
        let (manager, _homes) = manager(host);

        let report = manager.purge_stale_identities();

        assert_eq!(report.deleted_accounts, ["Task_2000"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].context.contains("Task_1000"));
    }

    #[test]
    fn missing_home_parent_is_a_warning() {
        let config = HostConfig::builder()
            .home_parent("/nonexistent/taskuser/homes")
            .build();
        let manager = IdentityManager::new(InMemoryHost::new(), config);

        let report = manager.purge_stale_identities();

        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn provision_runs_every_step() {
        let (mut manager, homes) = manager(InMemoryHost::new());

        let identity = manager.provision_identity_at(NOW).unwrap().clone();

        assert_eq!(identity.name(), "Task_1700000000");
        assert_eq!(identity.home_dir(), homes.path().join("Task_1700000000"));
        assert!(identity.logs_dir().is_dir());
        assert_eq!(
            manager.host().ops(),
            [
                HostOp::RestrictHomeDir,
                HostOp::CreateAccount,
                HostOp::GrantFullControl,
                HostOp::AddToRemoteAccessGroup,
                HostOp::ProbeLogin,
            ]
        );
        let host = manager.host();
        assert!(host.is_restricted(identity.home_dir()));
        assert_eq!(
            host.grants(identity.home_dir()),
            ["Task_1700000000", "SYSTEM", "Administrators"]
        );
        assert!(host.has_remote_access(identity.name()));
        assert_eq!(manager.current(), Some(&identity));
    }

    #[test]
    fn provision_into_existing_empty_home() {
        let (mut manager, homes) = manager(InMemoryHost::new());
        std::fs::create_dir(homes.path().join("Task_1700000000")).unwrap();

        assert!(manager.provision_identity_at(NOW).is_ok());
    }

    #[test]
    fn account_collision_aborts_before_group_and_probe() {
        let host = InMemoryHost::new().with_accounts(["Task_1700000000"]);
        let (mut manager, homes) = manager(host);

        let result = manager.provision_identity_at(NOW);

        assert!(matches!(result, Err(TaskUserError::HostCommand { .. })));
        let ops = manager.host().ops();
        assert!(!ops.contains(&HostOp::AddToRemoteAccessGroup));
        assert!(!ops.contains(&HostOp::ProbeLogin));
        assert!(manager.current().is_none());
        // left for the next purge
        assert!(homes.path().join("Task_1700000000").exists());
    }

    #[test]
    fn probe_failure_is_fatal() {
        let host = InMemoryHost::new().failing(HostOp::ProbeLogin);
        let (mut manager, homes) = manager(host);

        assert!(manager.provision_identity_at(NOW).is_err());
        assert!(!homes.path().join("Task_1700000000").join("public").exists());
    }

    #[test]
    fn startup_purges_then_provisions() {
        let host = InMemoryHost::new().with_accounts(["Task_1000"]);
        let (mut manager, homes) = manager(host);
        std::fs::create_dir(homes.path().join("Task_1000")).unwrap();

        let report = manager.startup().unwrap();

        assert_eq!(report.deleted_accounts, ["Task_1000"]);
        let current = manager.current().unwrap();
        assert_eq!(manager.host().accounts(), [current.name()]);
        assert_eq!(manager.host().ops()[..2], [HostOp::ListAccounts, HostOp::DeleteAccount]);
    }
}
