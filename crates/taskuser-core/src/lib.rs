//! # taskuser-core
//!
//! Ephemeral OS identities for isolated task execution.
//!
//! This crate provides:
//! - Password generation from the OS CSPRNG
//! - Provisioning and purging of disposable user accounts and home directories
//! - Per-command wrapper scripts that persist output to log files
//! - Impersonated (run-as) launching of those wrappers
//! - Line-wise scanning of host tool output

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod host;
pub mod identity;
pub mod launcher;
pub mod result;
pub mod scanner;
pub mod task;

pub use config::HostConfig;
pub use error::TaskUserError;
pub use host::{HostAccountProvider, InMemoryHost, WindowsHost};
pub use identity::{Identity, IdentityManager};
pub use result::{CommandResult, PurgeReport, Warning};
pub use task::{TaskCommand, TaskRun};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, TaskUserError>;
