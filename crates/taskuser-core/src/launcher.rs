//! Impersonated process launching

use crate::identity::Identity;
use crate::result::CommandResult;
use crate::task::{TaskCommand, TaskRun, generate_command};
use crate::{HostConfig, Result, TaskUserError};
use std::ffi::OsStr;
use std::process::Command;
use std::time::Instant;

/// Build `<run_as_tool> -u <name> -p <password> -w <home> -n <secs> <target>`.
///
/// The timeout only bounds connecting and logging on; the target itself
/// runs for as long as it likes.
pub fn run_as_command(config: &HostConfig, identity: &Identity, target: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(&config.run_as_tool);
    cmd.arg("-u")
        .arg(identity.name())
        .arg("-p")
        .arg(identity.password())
        .arg("-w")
        .arg(identity.home_dir())
        .arg("-n")
        .arg(config.startup_timeout_secs.to_string())
        .arg(target);
    cmd
}

/// Quoted command line with `secret` masked
#[must_use]
pub fn describe(cmd: &Command, secret: Option<&str>) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|arg| {
            let arg = arg.to_string_lossy();
            if secret.is_some_and(|s| arg == s) {
                "'********'".to_string()
            } else {
                format!("'{arg}'")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Start a generated command with extra environment and wait for it.
///
/// A spawn failure or a non-zero exit is an error.
pub fn launch<I, K, V>(command: &mut TaskCommand, index: usize, env: I) -> Result<CommandResult>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<OsStr>,
    V: AsRef<OsStr>,
{
    tracing::info!(index, log_file = %command.log_file, "launching command");
    let start = Instant::now();
    let status = command
        .process
        .envs(env)
        .status()
        .map_err(|e| TaskUserError::Launch(format!("command {index}: {e}")))?;
    let duration = start.elapsed();

    match status.code() {
        Some(0) => {
            tracing::info!(index, ?duration, "command finished");
            Ok(CommandResult {
                index,
                log_file: command.log_file.clone(),
                exit_code: 0,
                duration,
            })
        }
        code => Err(TaskUserError::NonZeroExit {
            index,
            code,
            log_file: command.log_file.clone(),
        }),
    }
}

/// Generate and launch every command of `task` in order under `identity`.
///
/// Stops at the first failure unless `keep_going` is set. One entry per
/// attempted command.
pub fn run_task(
    task: &mut TaskRun,
    identity: &Identity,
    config: &HostConfig,
    keep_going: bool,
) -> Vec<Result<CommandResult>> {
    let env = task.env.clone();
    let mut results = Vec::with_capacity(task.len());

    for index in 0..task.len() {
        let outcome = generate_command(task, index, identity, config)
            .and_then(|command| launch(command, index, &env));
        if let Err(e) = &outcome {
            tracing::error!(index, error = %e, "command failed");
        }
        let failed = outcome.is_err();
        results.push(outcome);
        if failed && !keep_going {
            break;
        }
    }

    results
}
