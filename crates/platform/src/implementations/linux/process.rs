//! Linux process operations implementation
//!
//! Wraps tokio's `Command` with event emission and platform error mapping.

use async_trait::async_trait;
use refurb_errors::{Error, PlatformError};
use refurb_events::{AppEvent, EventEmitter, FailureContext, PlatformEvent};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;

use crate::core::PlatformContext;
use crate::process::{CommandOutput, PlatformCommand, ProcessOperations};

/// Linux implementation of process operations
pub struct LinuxProcessOperations;

impl LinuxProcessOperations {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Default for LinuxProcessOperations {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn emit_spawned(ctx: &impl EventEmitter, cmd: &PlatformCommand, pid: Option<u32>) {
    ctx.emit(AppEvent::Platform(PlatformEvent::ProcessSpawned {
        program: cmd.program().to_string(),
        args: cmd.get_args().to_vec(),
        pid,
    }));
}

pub(crate) fn emit_spawn_failed(ctx: &impl EventEmitter, program: &str, error: &PlatformError) {
    ctx.emit(AppEvent::Platform(PlatformEvent::SpawnFailed {
        program: program.to_string(),
        failure: FailureContext::from_error(error),
    }));
}

pub(crate) fn emit_exited(
    ctx: &impl EventEmitter,
    program: &str,
    pid: Option<u32>,
    exit_code: Option<i32>,
    duration: Duration,
) {
    ctx.emit(AppEvent::Platform(PlatformEvent::ProcessExited {
        program: program.to_string(),
        pid,
        exit_code,
        duration_ms: duration_to_millis(duration),
    }));
}

/// Map a spawn error, distinguishing a missing binary
pub(crate) fn spawn_error(program: &str, err: &std::io::Error) -> PlatformError {
    match err.kind() {
        std::io::ErrorKind::NotFound => PlatformError::CommandNotFound {
            command: program.to_string(),
        },
        std::io::ErrorKind::PermissionDenied => PlatformError::PermissionDenied {
            operation: format!("spawn {program}"),
            message: err.to_string(),
        },
        _ => PlatformError::SpawnFailed {
            command: program.to_string(),
            message: err.to_string(),
        },
    }
}

#[async_trait]
impl ProcessOperations for LinuxProcessOperations {
    async fn execute_command(
        &self,
        ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, Error> {
        let start = Instant::now();
        tracing::debug!(command = %cmd.display(), "executing");

        let mut command = cmd.to_tokio();
        command
            .stdin(if cmd.get_stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let err = spawn_error(cmd.program(), &e);
                emit_spawn_failed(ctx, cmd.program(), &err);
                return Err(err.into());
            }
        };
        let pid = child.id();
        emit_spawned(ctx, &cmd, pid);

        if let (Some(data), Some(mut stdin)) = (cmd.get_stdin(), child.stdin.take()) {
            stdin
                .write_all(data)
                .await
                .map_err(|e| PlatformError::ProcessExecutionFailed {
                    command: cmd.program().to_string(),
                    message: format!("writing stdin: {e}"),
                })?;
            // dropping closes the pipe so the child sees EOF
            drop(stdin);
        }

        let output =
            child
                .wait_with_output()
                .await
                .map_err(|e| PlatformError::ProcessExecutionFailed {
                    command: cmd.program().to_string(),
                    message: e.to_string(),
                })?;

        emit_exited(ctx, cmd.program(), pid, output.status.code(), start.elapsed());

        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn create_command(&self, program: &str) -> PlatformCommand {
        PlatformCommand::new(program)
    }
}
