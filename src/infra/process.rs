//! External process execution
//!
//! Tools are spawned through `tokio::process` with stdout and stderr captured.
//! Children are killed when their handle is dropped, so aborting a scheduler
//! task never leaves an orphaned compiler behind.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::BuildError;
use crate::infra::toolchain::ToolCommand;

/// Captured result of one or more commands
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code of the last command run (`None` if killed by a signal)
    pub code: Option<i32>,
    /// Whether every command succeeded
    pub success: bool,
    /// Interleaved stdout and stderr of every command run
    pub output: String,
    /// Last command run, shell-quoted for reproduction
    pub command: String,
}

impl ProcessOutput {
    /// Human-readable exit status
    pub fn status(&self) -> String {
        self.code
            .map_or_else(|| "signal".to_string(), |c| format!("exit code {c}"))
    }
}

/// Render a command line for logs and error messages
pub fn render(command: &[String]) -> String {
    command
        .iter()
        .map(|arg| {
            if arg.is_empty() || arg.contains([' ', '"', '\'', '$', '\\']) {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run a single command
pub async fn run(command: &[String], cwd: Option<&Path>) -> Result<ProcessOutput, BuildError> {
    let Some((program, args)) = command.split_first() else {
        return Ok(ProcessOutput {
            success: true,
            code: Some(0),
            ..ProcessOutput::default()
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    tracing::debug!("Running: {}", render(command));
    let output = cmd.output().await.map_err(|e| BuildError::Spawn {
        program: program.clone(),
        error: e.to_string(),
    })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ProcessOutput {
        code: output.status.code(),
        success: output.status.success(),
        output: text,
        command: render(command),
    })
}

/// Run commands in order, stopping at the first failure
pub async fn run_all(commands: &[ToolCommand], cwd: Option<&Path>) -> Result<ProcessOutput, BuildError> {
    let mut combined = ProcessOutput {
        success: true,
        code: Some(0),
        ..ProcessOutput::default()
    };
    for command in commands {
        let result = run(command, cwd).await?;
        combined.output.push_str(&result.output);
        combined.code = result.code;
        combined.success = result.success;
        combined.command = result.command;
        if !result.success {
            break;
        }
    }
    Ok(combined)
}
