//! Host configuration

use crate::{Result, TaskUserError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Line terminator written into generated scripts and expected from host tools.
pub const HOST_LINE_ENDING: &str = "\r\n";

/// Configuration for the host the identities live on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding every user's home directory
    pub home_parent: PathBuf,

    /// Run-as tool used for impersonated launches (PsExec)
    pub run_as_tool: PathBuf,

    /// Seconds the run-as tool may spend connecting and authenticating
    pub startup_timeout_secs: u32,

    /// Principals granted full control over each home directory
    pub admin_principals: Vec<String>,

    /// Principals whose default grants are removed from each home directory
    pub revoked_principals: Vec<String>,

    /// Local group granting remote access to the identity
    pub remote_access_group: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            home_parent: PathBuf::from(r"C:\Users"),
            run_as_tool: PathBuf::from(r"C:\Users\Administrator\PSTools\PsExec.exe"),
            startup_timeout_secs: 10,
            admin_principals: vec!["SYSTEM".into(), "Administrators".into()],
            revoked_principals: vec!["Users".into(), "Everyone".into()],
            remote_access_group: "Remote Desktop Users".into(),
        }
    }
}

impl HostConfig {
    /// Create a new config builder
    #[must_use]
    pub fn builder() -> HostConfigBuilder {
        HostConfigBuilder::default()
    }

    /// Load a JSON config file; absent fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TaskUserError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations no host command could work with
    pub fn validate(&self) -> Result<()> {
        if self.startup_timeout_secs == 0 {
            return Err(TaskUserError::Config(
                "startup_timeout_secs must be positive".into(),
            ));
        }
        if self.remote_access_group.trim().is_empty() {
            return Err(TaskUserError::Config(
                "remote_access_group must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for HostConfig
#[derive(Debug, Default)]
pub struct HostConfigBuilder {
    config: HostConfig,
}

impl HostConfigBuilder {
    #[must_use]
    pub fn home_parent(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.home_parent = path.into();
        self
    }

    #[must_use]
    pub fn run_as_tool(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.run_as_tool = path.into();
        self
    }

    #[must_use]
    pub fn startup_timeout_secs(mut self, secs: u32) -> Self {
        self.config.startup_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn admin_principal(mut self, principal: impl Into<String>) -> Self {
        self.config.admin_principals.push(principal.into());
        self
    }

    #[must_use]
    pub fn remote_access_group(mut self, group: impl Into<String>) -> Self {
        self.config.remote_access_group = group.into();
        self
    }

    #[must_use]
    pub fn build(self) -> HostConfig {
        self.config
    }
}

/// Get the config file path from the TASKUSER_CONFIG env var, if set
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os("TASKUSER_CONFIG").map(PathBuf::from)
}
