//! Line-wise scanning of host tool output

use crate::config::HOST_LINE_ENDING;
use crate::{Result, TaskUserError};
use std::ffi::OsStr;
use std::process::{Command, Stdio};

/// Run `program` and hand every line of its stdout to `callback`, in order.
///
/// Nothing is delivered when the program cannot be started or exits with a
/// failure status.
pub fn process_command_output<F, I, S>(callback: F, program: &str, args: I) -> Result<()>
where
    F: FnMut(&str),
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| TaskUserError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if !output.status.success() {
        let err = TaskUserError::HostCommand {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        tracing::debug!(error = %err, "scanned command failed");
        return Err(err);
    }

    for_each_line(&String::from_utf8_lossy(&output.stdout), callback);
    Ok(())
}

/// Split `text` on the host line ending and pass each trimmed line on.
///
/// A trailing terminator does not produce an extra empty line.
pub fn for_each_line<F>(text: &str, mut callback: F)
where
    F: FnMut(&str),
{
    for line in text.split_terminator(HOST_LINE_ENDING) {
        callback(line.trim_matches(|c| matches!(c, '\r' | '\n' | ' ')));
    }
}
