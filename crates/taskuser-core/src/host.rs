//! Host account providers
//!
//! Everything that mutates OS accounts or ACLs goes through
//! [`HostAccountProvider`]. [`WindowsHost`] shells out to the stock
//! `wmic`/`net`/`icacls` tools and the configured run-as tool;
//! [`InMemoryHost`] keeps the same state in memory for tests and dry runs.

use crate::identity::Identity;
use crate::launcher::{describe, run_as_command};
use crate::{HostConfig, Result, TaskUserError, scanner};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// OS account operations needed to provision and purge identities
pub trait HostAccountProvider {
    /// Stream every account name on the host to `on_account`
    fn list_accounts(&self, on_account: &mut dyn FnMut(&str)) -> Result<()>;

    /// Delete an account
    fn delete_account(&self, name: &str) -> Result<()>;

    /// Remove default grants and inherited permissions from a home directory
    fn restrict_home_dir(&self, home: &Path) -> Result<()>;

    /// Create the identity's account bound to its home directory, with no
    /// expiry and no forced password change
    fn create_account(&self, identity: &Identity) -> Result<()>;

    /// Grant full control over `home` to `account` and the admin principals
    fn grant_full_control(&self, home: &Path, account: &str) -> Result<()>;

    /// Add `account` to the remote-access group
    fn add_to_remote_access_group(&self, account: &str) -> Result<()>;

    /// Run a trivial command as the identity to confirm it can log on
    fn probe_login(&self, identity: &Identity) -> Result<()>;
}

/// Provider backed by the Windows account and ACL tools
#[derive(Debug, Clone)]
pub struct WindowsHost {
    config: HostConfig,
}

impl WindowsHost {
    #[must_use]
    pub const fn new(config: HostConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub const fn config(&self) -> &HostConfig {
        &self.config
    }
}

/// Run a host command to completion, failing on a non-zero exit.
///
/// `secret` is masked wherever the command line is logged.
pub(crate) fn run_checked(cmd: &mut Command, secret: Option<&str>) -> Result<String> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    tracing::debug!(command = %describe(cmd, secret), "running host command");

    let output = cmd
        .stdin(Stdio::null())
        .output()
        .map_err(|source| TaskUserError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        return Err(TaskUserError::HostCommand {
            program,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    tracing::debug!(%program, output = %stdout.trim(), "host command finished");
    Ok(stdout)
}

impl HostAccountProvider for WindowsHost {
    fn list_accounts(&self, on_account: &mut dyn FnMut(&str)) -> Result<()> {
        scanner::process_command_output(
            |line| on_account(line),
            "wmic",
            ["useraccount", "get", "name"],
        )
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        run_checked(
            Command::new("net").args(["user", name, "/delete"]),
            None,
        )?;
        Ok(())
    }

    fn restrict_home_dir(&self, home: &Path) -> Result<()> {
        for principal in &self.config.revoked_principals {
            run_checked(
                Command::new("icacls")
                    .arg(home)
                    .arg("/remove:g")
                    .arg(principal),
                None,
            )?;
        }
        run_checked(
            Command::new("icacls").arg(home).arg("/inheritance:r"),
            None,
        )?;
        Ok(())
    }

    fn create_account(&self, identity: &Identity) -> Result<()> {
        let mut homedir = std::ffi::OsString::from("/homedir:");
        homedir.push(identity.home_dir());
        run_checked(
            Command::new("net")
                .args(["user", identity.name(), identity.password()])
                .args(["/add", "/expires:never", "/passwordchg:no"])
                .arg(homedir)
                .arg("/y"),
            Some(identity.password()),
        )?;
        Ok(())
    }

    fn grant_full_control(&self, home: &Path, account: &str) -> Result<()> {
        let mut cmd = Command::new("icacls");
        cmd.arg(home)
            .arg("/grant:r")
            .arg(format!("{account}:(CI)F"));
        for principal in &self.config.admin_principals {
            cmd.arg(format!("{principal}:(CI)F"));
        }
        run_checked(&mut cmd, None)?;
        Ok(())
    }

    fn add_to_remote_access_group(&self, account: &str) -> Result<()> {
        run_checked(
            Command::new("net")
                .args(["localgroup", self.config.remote_access_group.as_str(), "/add", account]),
            None,
        )?;
        Ok(())
    }

    fn probe_login(&self, identity: &Identity) -> Result<()> {
        let mut cmd = run_as_command(&self.config, identity, "whoami");
        run_checked(&mut cmd, Some(identity.password()))?;
        Ok(())
    }
}

/// Operations recorded by [`InMemoryHost`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostOp {
    ListAccounts,
    DeleteAccount,
    RestrictHomeDir,
    CreateAccount,
    GrantFullControl,
    AddToRemoteAccessGroup,
    ProbeLogin,
}

/// One call made against an [`InMemoryHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCall {
    pub op: HostOp,
    /// Account name or home directory the call targeted
    pub target: String,
}

#[derive(Debug, Default)]
struct HostState {
    /// Account name to password
    accounts: BTreeMap<String, String>,
    restricted: BTreeSet<PathBuf>,
    grants: BTreeMap<PathBuf, Vec<String>>,
    remote_access: BTreeSet<String>,
    calls: Vec<HostCall>,
    failing_ops: HashSet<HostOp>,
    failing_accounts: HashSet<String>,
}

/// Provider that keeps accounts and ACLs in memory.
///
/// Never touches the OS account database; home directories are still real
/// paths owned by the caller.
#[derive(Debug)]
pub struct InMemoryHost {
    admin_principals: Vec<String>,
    state: Mutex<HostState>,
}

impl Default for InMemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self {
            admin_principals: HostConfig::default().admin_principals,
            state: Mutex::new(HostState::default()),
        }
    }

    /// Seed pre-existing accounts
    #[must_use]
    pub fn with_accounts<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            for name in names {
                state.accounts.insert(name.into(), String::new());
            }
        }
        self
    }

    /// Make every call of `op` fail
    #[must_use]
    pub fn failing(self, op: HostOp) -> Self {
        self.state.lock().failing_ops.insert(op);
        self
    }

    /// Make deletion of one account fail
    #[must_use]
    pub fn failing_delete_of(self, name: impl Into<String>) -> Self {
        self.state.lock().failing_accounts.insert(name.into());
        self
    }

    /// Account names currently present, sorted
    #[must_use]
    pub fn accounts(&self) -> Vec<String> {
        self.state.lock().accounts.keys().cloned().collect()
    }

    /// Every call made so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        self.state.lock().calls.clone()
    }

    /// Operations made so far, in order
    #[must_use]
    pub fn ops(&self) -> Vec<HostOp> {
        self.state.lock().calls.iter().map(|call| call.op).collect()
    }

    /// Principals holding full control over `home`
    #[must_use]
    pub fn grants(&self, home: &Path) -> Vec<String> {
        self.state.lock().grants.get(home).cloned().unwrap_or_default()
    }

    #[must_use]
    pub fn is_restricted(&self, home: &Path) -> bool {
        self.state.lock().restricted.contains(home)
    }

    #[must_use]
    pub fn has_remote_access(&self, account: &str) -> bool {
        self.state.lock().remote_access.contains(account)
    }
}

/// Record a call and apply any injected failure
fn record(state: &mut HostState, op: HostOp, target: &str) -> Result<()> {
    state.calls.push(HostCall {
        op,
        target: target.to_string(),
    });
    if state.failing_ops.contains(&op) {
        return Err(injected(op, target));
    }
    Ok(())
}

fn injected(op: HostOp, target: &str) -> TaskUserError {
    TaskUserError::HostCommand {
        program: format!("{op:?}"),
        status: "exit code: 1".into(),
        stderr: format!("injected failure for {target}"),
    }
}

impl HostAccountProvider for InMemoryHost {
    fn list_accounts(&self, on_account: &mut dyn FnMut(&str)) -> Result<()> {
        let names = {
            let mut state = self.state.lock();
            record(&mut state, HostOp::ListAccounts, "")?;
            state.accounts.keys().cloned().collect::<Vec<_>>()
        };
        // lock released: callbacks may call back into the host
        for name in &names {
            on_account(name);
        }
        Ok(())
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        record(&mut state, HostOp::DeleteAccount, name)?;
        if state.failing_accounts.contains(name) {
            return Err(injected(HostOp::DeleteAccount, name));
        }
        if state.accounts.remove(name).is_none() {
            return Err(TaskUserError::HostCommand {
                program: "net".into(),
                status: "exit code: 2".into(),
                stderr: format!("The user name could not be found: {name}"),
            });
        }
        state.remote_access.remove(name);
        Ok(())
    }

    fn restrict_home_dir(&self, home: &Path) -> Result<()> {
        let mut state = self.state.lock();
        record(&mut state, HostOp::RestrictHomeDir, &home.to_string_lossy())?;
        state.grants.remove(home);
        state.restricted.insert(home.to_path_buf());
        Ok(())
    }

    fn create_account(&self, identity: &Identity) -> Result<()> {
        let mut state = self.state.lock();
        record(&mut state, HostOp::CreateAccount, identity.name())?;
        if state.accounts.contains_key(identity.name()) {
            return Err(TaskUserError::HostCommand {
                program: "net".into(),
                status: "exit code: 2".into(),
                stderr: format!("The account {} already exists", identity.name()),
            });
        }
        state
            .accounts
            .insert(identity.name().to_string(), identity.password().to_string());
        Ok(())
    }

    fn grant_full_control(&self, home: &Path, account: &str) -> Result<()> {
        let mut state = self.state.lock();
        record(&mut state, HostOp::GrantFullControl, account)?;
        let principals = std::iter::once(account.to_string())
            .chain(self.admin_principals.iter().cloned())
            .collect();
        state.grants.insert(home.to_path_buf(), principals);
        Ok(())
    }

    fn add_to_remote_access_group(&self, account: &str) -> Result<()> {
        let mut state = self.state.lock();
        record(&mut state, HostOp::AddToRemoteAccessGroup, account)?;
        if !state.accounts.contains_key(account) {
            return Err(TaskUserError::HostCommand {
                program: "net".into(),
                status: "exit code: 2".into(),
                stderr: format!("There is no such global user or group: {account}"),
            });
        }
        state.remote_access.insert(account.to_string());
        Ok(())
    }

    fn probe_login(&self, identity: &Identity) -> Result<()> {
        let mut state = self.state.lock();
        record(&mut state, HostOp::ProbeLogin, identity.name())?;
        match state.accounts.get(identity.name()) {
            Some(password) if password == identity.password() => Ok(()),
            _ => Err(TaskUserError::HostCommand {
                program: "whoami".into(),
                status: "exit code: 1326".into(),
                stderr: "The user name or password is incorrect.".into(),
            }),
        }
    }
}
