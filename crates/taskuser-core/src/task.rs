//! Task runs and per-command wrapper generation
//!
//! Each payload command becomes two batch files in the identity home: a
//! script holding the command verbatim and a wrapper that calls it with
//! stdout/stderr redirected to `public/logs`. The wrapper is what gets
//! launched, so output is both streamed live and kept on disk.

use crate::config::HOST_LINE_ENDING;
use crate::identity::Identity;
use crate::launcher::{describe, run_as_command};
use crate::{HostConfig, Result, TaskUserError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// One task: an id and the commands to run for it
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskRun {
    /// Task identifier, used only to annotate wrappers
    pub task_id: String,

    /// Payload commands, in execution order
    pub commands: Vec<String>,

    /// Extra environment for every launched command
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(skip)]
    produced: Vec<Option<TaskCommand>>,
}

impl TaskRun {
    pub fn new<I, S>(task_id: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            task_id: task_id.into(),
            commands: commands.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Parse a JSON task descriptor
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TaskUserError::Config(format!("cannot read task {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The command generated for `index`, if any
    #[must_use]
    pub fn command(&self, index: usize) -> Option<&TaskCommand> {
        self.produced.get(index).and_then(Option::as_ref)
    }
}

/// A generated, not yet started, command
#[derive(Debug)]
pub struct TaskCommand {
    /// Log file relative to the identity home, `/`-separated
    pub log_file: String,
    pub(crate) process: Command,
}

impl TaskCommand {
    pub fn new(log_file: impl Into<String>, process: Command) -> Self {
        Self {
            log_file: log_file.into(),
            process,
        }
    }

    /// The process that will run the wrapper
    #[must_use]
    pub const fn process(&self) -> &Command {
        &self.process
    }

    /// Absolute path of the log file
    #[must_use]
    pub fn log_path(&self, identity: &Identity) -> PathBuf {
        self.log_file
            .split('/')
            .fold(identity.home_dir().to_path_buf(), |path, part| path.join(part))
    }
}

/// File locations for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPaths {
    /// `Command_<index>` with the index zero-padded to six digits
    pub name: String,
    pub wrapper: PathBuf,
    pub script: PathBuf,
    pub log: PathBuf,
    /// `public/logs/<name>.log`
    pub log_relative: String,
}

impl CommandPaths {
    #[must_use]
    pub fn new(home: &Path, index: usize) -> Self {
        let name = format!("Command_{index:06}");
        Self {
            wrapper: home.join(format!("{name}_wrapper.bat")),
            script: home.join(format!("{name}.bat")),
            log: home.join("public").join("logs").join(format!("{name}.log")),
            log_relative: format!("public/logs/{name}.log"),
            name,
        }
    }
}

/// Write the wrapper and script for command `index` and build its run-as
/// process, stored in `task` and returned.
///
/// The process is not started. On error nothing is stored.
pub fn generate_command<'t>(
    task: &'t mut TaskRun,
    index: usize,
    identity: &Identity,
    config: &HostConfig,
) -> Result<&'t mut TaskCommand> {
    let len = task.commands.len();
    let payload = task
        .commands
        .get(index)
        .ok_or(TaskUserError::CommandIndex { index, len })?;
    let paths = CommandPaths::new(identity.home_dir(), index);

    let wrapper = format!(
        ":: This script runs command {index} defined in TaskId {}...{HOST_LINE_ENDING}\
         call {} > {} 2>&1{HOST_LINE_ENDING}",
        task.task_id,
        paths.script.display(),
        paths.log.display(),
    );
    write_script(&paths.wrapper, &wrapper)?;
    write_script(&paths.script, &format!("{payload}{HOST_LINE_ENDING}"))?;

    let mut process = run_as_command(config, identity, &paths.wrapper);
    process.stdout(Stdio::inherit()).stderr(Stdio::inherit());
    tracing::debug!(
        index,
        task_id = %task.task_id,
        command = %describe(&process, Some(identity.password())),
        "command prepared"
    );

    if task.produced.len() < len {
        task.produced.resize_with(len, || None);
    }
    Ok(task.produced[index].insert(TaskCommand::new(paths.log_relative, process)))
}

fn write_script(path: &Path, contents: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o755);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn identity() -> (Identity, TempDir) {
        let homes = tempfile::tempdir().unwrap();
        let home = homes.path().join("Task_1700000000");
        std::fs::create_dir_all(home.join("public").join("logs")).unwrap();
        (Identity::new("Task_1700000000", home, "pWd0_secret"), homes)
    }

    #[test]
    fn paths_are_zero_padded() {
        let paths = CommandPaths::new(Path::new("home"), 42);
        assert_eq!(paths.name, "Command_000042");
        assert_eq!(paths.wrapper, Path::new("home").join("Command_000042_wrapper.bat"));
        assert_eq!(paths.script, Path::new("home").join("Command_000042.bat"));
        assert_eq!(paths.log_relative, "public/logs/Command_000042.log");
    }

    #[test]
    fn echo_hello_scenario() {
        let (identity, _homes) = identity();
        let mut task = TaskRun::new("T1", ["echo hello"]);

        let command = generate_command(&mut task, 0, &identity, &HostConfig::default()).unwrap();
        assert_eq!(command.log_file, "public/logs/Command_000000.log");

        let home = identity.home_dir();
        let script = std::fs::read_to_string(home.join("Command_000000.bat")).unwrap();
        assert_eq!(script, "echo hello\r\n");

        let wrapper = std::fs::read_to_string(home.join("Command_000000_wrapper.bat")).unwrap();
        let lines: Vec<&str> = wrapper.split_terminator("\r\n").collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], ":: This script runs command 0 defined in TaskId T1...");
        let log = home.join("public").join("logs").join("Command_000000.log");
        assert_eq!(
            lines[1],
            format!(
                "call {} > {} 2>&1",
                home.join("Command_000000.bat").display(),
                log.display()
            )
        );
        assert!(task.command(0).is_some());
    }

    #[test]
    fn regenerating_overwrites_same_files() {
        let (identity, _homes) = identity();
        let mut task = TaskRun::new("T1", ["echo one", "echo two"]);
        let config = HostConfig::default();

        generate_command(&mut task, 1, &identity, &config).unwrap();
        generate_command(&mut task, 1, &identity, &config).unwrap();

        let mut files: Vec<String> = std::fs::read_dir(identity.home_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        files.sort();
        assert_eq!(files, ["Command_000001.bat", "Command_000001_wrapper.bat", "public"]);
        assert!(task.command(0).is_none());
        assert!(task.command(1).is_some());
    }

    #[test]
    fn process_runs_wrapper_as_identity() {
        let (identity, _homes) = identity();
        let mut task = TaskRun::new("T1", ["dir"]);
        let config = HostConfig::default();

        let command = generate_command(&mut task, 0, &identity, &config).unwrap();

        let process = command.process();
        assert_eq!(process.get_program(), config.run_as_tool.as_os_str());
        let args: Vec<_> = process.get_args().collect();
        assert_eq!(args[..2], ["-u", "Task_1700000000"]);
        assert_eq!(args[6..8], ["-n", "10"]);
        assert_eq!(
            args.last().unwrap(),
            &identity.home_dir().join("Command_000000_wrapper.bat").as_os_str()
        );
    }

    #[test]
    fn index_out_of_range() {
        let (identity, _homes) = identity();
        let mut task = TaskRun::new("T1", ["echo hello"]);

        let err = generate_command(&mut task, 3, &identity, &HostConfig::default()).unwrap_err();

        assert!(matches!(err, TaskUserError::CommandIndex { index: 3, len: 1 }));
        assert!(!identity.home_dir().join("Command_000003.bat").exists());
    }

    #[test]
    fn write_failure_stores_nothing() {
        let identity = Identity::new("Task_1", "/nonexistent/taskuser/Task_1", "pWd0_secret");
        let mut task = TaskRun::new("T1", ["echo hello"]);

        let result = generate_command(&mut task, 0, &identity, &HostConfig::default());

        assert!(matches!(result, Err(TaskUserError::Io(_))));
        assert!(task.command(0).is_none());
    }

    #[test]
    fn log_path_is_under_home() {
        let (identity, _homes) = identity();
        let mut task = TaskRun::new("T1", ["echo hello"]);
        let command = generate_command(&mut task, 0, &identity, &HostConfig::default()).unwrap();

        assert_eq!(
            command.log_path(&identity),
            identity.logs_dir().join("Command_000000.log")
        );
    }

    #[test]
    fn parses_task_descriptor() {
        let task = TaskRun::from_json(
            r#"{"task_id": "T9", "commands": ["echo a", "echo b"], "env": {"GREETING": "hi"}}"#,
        )
        .unwrap();
        assert_eq!(task.task_id, "T9");
        assert_eq!(task.len(), 2);
        assert_eq!(task.env.get("GREETING").map(String::as_str), Some("hi"));

        let bare = TaskRun::from_json(r#"{"task_id": "T1", "commands": []}"#).unwrap();
        assert!(bare.is_empty());
        assert!(bare.env.is_empty());
    }
}
