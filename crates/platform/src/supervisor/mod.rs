//! Supervision of one long-running external process
//!
//! The child runs in its own process group with stdout and stderr piped. Two
//! reader tasks forward raw chunks over a channel; [`SupervisedProcess::poll`]
//! waits on that channel for at most a caller-supplied timeout, so a poll
//! never blocks the runner longer than that.

mod lines;
mod signal;

pub use lines::{LineBuffer, MAX_CAPTURE, MAX_LINE};
pub use signal::{EscalationSignal, SignalEscalation};

use nix::errno::Errno;
use nix::sys::signal::killpg;
use nix::unistd::Pid;
use refurb_errors::PlatformError;
use refurb_events::{AppEvent, EventEmitter, PlatformEvent};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;

use crate::core::PlatformContext;
use crate::implementations::linux::process::{
    emit_exited, emit_spawn_failed, emit_spawned, spawn_error,
};
use crate::process::PlatformCommand;

/// How long pipes may stay open after the child exited before we stop waiting
/// for them (a grandchild can inherit and hold them)
const PIPE_LINGER: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

enum ReaderMsg {
    Data(OutputStream, Vec<u8>),
    Eof(OutputStream),
}

/// How a supervised child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    /// Exit code, absent when killed by a signal
    pub code: Option<i32>,
    /// Terminating signal number, if any
    pub signal: Option<i32>,
}

impl ExitOutcome {
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }

    /// Whether the exit code is one of `good`
    #[must_use]
    pub fn is_success_in(&self, good: &[i32]) -> bool {
        self.code.is_some_and(|code| good.contains(&code))
    }
}

/// Result of one bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Running,
    Exited(ExitOutcome),
}

/// A spawned child under supervision
pub struct SupervisedProcess {
    command: PlatformCommand,
    child: Child,
    pid: Option<u32>,
    rx: mpsc::UnboundedReceiver<ReaderMsg>,
    open_streams: u8,
    stdout: LineBuffer,
    stderr: LineBuffer,
    escalation: SignalEscalation,
    started: Instant,
    exited_at: Option<(Instant, ExitOutcome)>,
    exit: Option<ExitOutcome>,
    ctx: PlatformContext,
}

impl SupervisedProcess {
    /// Spawn `cmd` under supervision. Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::CommandNotFound` when the program does not
    /// exist and `PlatformError::SpawnFailed` for other spawn failures.
    pub fn spawn(ctx: &PlatformContext, cmd: &PlatformCommand) -> Result<Self, PlatformError> {
        let mut command = cmd.to_tokio();
        command
            .stdin(if cmd.get_stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            let err = spawn_error(cmd.program(), &e);
            emit_spawn_failed(ctx, cmd.program(), &err);
            err
        })?;
        let pid = child.id();
        tracing::debug!(command = %cmd.display(), ?pid, "spawned supervised process");
        emit_spawned(ctx, cmd, pid);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut open_streams = 0;
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(read_stream(stdout, OutputStream::Stdout, tx.clone()));
            open_streams += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(read_stream(stderr, OutputStream::Stderr, tx));
            open_streams += 1;
        }
        if let (Some(data), Some(mut stdin)) = (cmd.get_stdin(), child.stdin.take()) {
            let data = data.to_vec();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&data).await {
                    tracing::debug!("stdin write ended early: {e}");
                }
            });
        }

        Ok(Self {
            command: cmd.clone(),
            child,
            pid,
            rx,
            open_streams,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            escalation: SignalEscalation::new(),
            started: Instant::now(),
            exited_at: None,
            exit: None,
            ctx: ctx.clone(),
        })
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn command(&self) -> &PlatformCommand {
        &self.command
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[must_use]
    pub fn exit(&self) -> Option<ExitOutcome> {
        self.exit
    }

    /// Whether cancellation has already interrupted this child
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.escalation.interrupted()
    }

    /// Read whatever output arrives within `timeout` and check for exit.
    ///
    /// Exit is only reported once both pipes are drained, so the final
    /// lines are always visible before the caller sees `Exited`.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::ProcessExecutionFailed` if the child's status
    /// cannot be queried.
    pub async fn poll(&mut self, timeout: Duration) -> Result<PollStatus, PlatformError> {
        if let Some(exit) = self.exit {
            return Ok(PollStatus::Exited(exit));
        }

        if self.open_streams > 0 {
            match tokio::time::timeout(timeout, self.rx.recv()).await {
                Ok(Some(msg)) => self.absorb(msg),
                Ok(None) => self.close_all_streams(),
                Err(_) => {}
            }
            while let Ok(msg) = self.rx.try_recv() {
                self.absorb(msg);
            }
        }

        if self.open_streams == 0 {
            let status = match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(status) => Some(status.map_err(|e| self.wait_error(&e))?),
                Err(_) => None,
            };
            if let Some(status) = status {
                return Ok(PollStatus::Exited(self.record_exit(ExitOutcome::from_status(status))));
            }
            return Ok(PollStatus::Running);
        }

        // Pipes still open: note the exit but keep draining for a while
        match self.exited_at {
            Some((at, outcome)) if at.elapsed() >= PIPE_LINGER => {
                self.close_all_streams();
                Ok(PollStatus::Exited(self.record_exit(outcome)))
            }
            Some(_) => Ok(PollStatus::Running),
            None => {
                if let Some(status) = self.child.try_wait().map_err(|e| self.wait_error(&e))? {
                    self.exited_at = Some((Instant::now(), ExitOutcome::from_status(status)));
                }
                Ok(PollStatus::Running)
            }
        }
    }

    fn absorb(&mut self, msg: ReaderMsg) {
        match msg {
            ReaderMsg::Data(OutputStream::Stdout, data) => self.stdout.push(&data),
            ReaderMsg::Data(OutputStream::Stderr, data) => self.stderr.push(&data),
            ReaderMsg::Eof(stream) => {
                self.buffer_mut(stream).finish();
                self.open_streams = self.open_streams.saturating_sub(1);
            }
        }
    }

    fn close_all_streams(&mut self) {
        self.stdout.finish();
        self.stderr.finish();
        self.open_streams = 0;
    }

    fn record_exit(&mut self, outcome: ExitOutcome) -> ExitOutcome {
        if self.exit.is_none() {
            tracing::debug!(command = %self.command.program(), ?outcome, "process exited");
            emit_exited(
                &self.ctx,
                self.command.program(),
                self.pid,
                outcome.code,
                self.started.elapsed(),
            );
            self.exit = Some(outcome);
        }
        outcome
    }

    fn wait_error(&self, err: &std::io::Error) -> PlatformError {
        PlatformError::ProcessExecutionFailed {
            command: self.command.program().to_string(),
            message: err.to_string(),
        }
    }

    fn buffer_mut(&mut self, stream: OutputStream) -> &mut LineBuffer {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }

    /// Complete lines received on `stream` since the last call
    pub fn take_lines(&mut self, stream: OutputStream) -> Vec<String> {
        self.buffer_mut(stream).take_lines()
    }

    #[must_use]
    pub fn stdout_text(&self) -> String {
        self.stdout.text()
    }

    #[must_use]
    pub fn stderr_text(&self) -> String {
        self.stderr.text()
    }

    /// Deliver the next signal of the cancellation ladder to the child's
    /// process group. Returns the signal sent, or `None` once the child has
    /// exited or the ladder is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::SignalFailed` if delivery fails for a reason
    /// other than the process already being gone.
    pub fn terminate(&mut self) -> Result<Option<EscalationSignal>, PlatformError> {
        if self.exit.is_some() {
            return Ok(None);
        }
        let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return Ok(None);
        };
        let Some(signal) = self.escalation.next_signal() else {
            return Ok(None);
        };

        tracing::warn!(command = %self.command.program(), pid, %signal, "signalling process");
        match killpg(Pid::from_raw(pid), signal.as_nix()) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => {
                return Err(PlatformError::SignalFailed {
                    pid,
                    signal: signal.to_string(),
                    message: errno.desc().to_string(),
                })
            }
        }
        self.ctx
            .emit(AppEvent::Platform(PlatformEvent::SignalSent {
                program: self.command.program().to_string(),
                pid: self.pid.unwrap_or_default(),
                signal: signal.to_string(),
            }));
        Ok(Some(signal))
    }

    /// SIGKILL the whole process group and reap the child, skipping the
    /// ladder. Used when a task is torn down with its child still alive.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::SignalFailed` if the group cannot be signalled.
    pub async fn kill(&mut self) -> Result<(), PlatformError> {
        if self.exit.is_some() {
            return Ok(());
        }
        if let Some(pid) = self.pid.and_then(|p| i32::try_from(p).ok()) {
            match killpg(Pid::from_raw(pid), nix::sys::signal::Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(errno) => {
                    return Err(PlatformError::SignalFailed {
                        pid,
                        signal: EscalationSignal::Kill.to_string(),
                        message: errno.desc().to_string(),
                    })
                }
            }
        }
        let status = self.child.wait().await.map_err(|e| self.wait_error(&e))?;
        self.close_all_streams();
        self.record_exit(ExitOutcome::from_status(status));
        Ok(())
    }
}

async fn read_stream<R>(mut reader: R, stream: OutputStream, tx: mpsc::UnboundedSender<ReaderMsg>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(ReaderMsg::Data(stream, buf[..n].to_vec())).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(?stream, "pipe read failed: {e}");
                break;
            }
        }
    }
    let _ = tx.send(ReaderMsg::Eof(stream));
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run_to_exit(proc: &mut SupervisedProcess) -> ExitOutcome {
        for _ in 0..200 {
            if let PollStatus::Exited(outcome) = proc.poll(Duration::from_millis(50)).await.unwrap() {
                return outcome;
            }
        }
        panic!("process did not exit");
    }

    #[tokio::test]
    async fn collects_lines_from_both_streams() {
        let mut cmd = PlatformCommand::new("sh");
        cmd.args(["-c", "printf 'one\\rtwo\\n'; printf 'err' >&2; exit 1"]);
        let mut proc = SupervisedProcess::spawn(&PlatformContext::default(), &cmd).unwrap();

        let outcome = run_to_exit(&mut proc).await;
        assert_eq!(outcome.code, Some(1));
        assert!(outcome.is_success_in(&[0, 1]));
        assert!(!outcome.is_success_in(&[0]));
        assert_eq!(proc.take_lines(OutputStream::Stdout), vec!["one", "two"]);
        assert_eq!(proc.take_lines(OutputStream::Stderr), vec!["err"]);
        assert_eq!(proc.stderr_text(), "err");
    }

    #[tokio::test]
    async fn poll_is_bounded_while_child_is_silent() {
        let mut cmd = PlatformCommand::new("sleep");
        cmd.arg("5");
        let mut proc = SupervisedProcess::spawn(&PlatformContext::default(), &cmd).unwrap();
        let start = Instant::now();
        assert_eq!(
            proc.poll(Duration::from_millis(50)).await.unwrap(),
            PollStatus::Running
        );
        assert!(start.elapsed() < Duration::from_secs(2));
        proc.terminate().unwrap();
    }

    #[tokio::test]
    async fn escalates_interrupt_terminate_kill() {
        // the shell ignores INT and TERM, and the ignore survives exec
        let mut cmd = PlatformCommand::new("sh");
        cmd.args(["-c", "trap '' INT TERM; exec sleep 30"]);
        let mut proc = SupervisedProcess::spawn(&PlatformContext::default(), &cmd).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut sent = Vec::new();
        for _ in 0..2 {
            sent.push(proc.terminate().unwrap());
            assert_eq!(
                proc.poll(Duration::from_millis(100)).await.unwrap(),
                PollStatus::Running
            );
        }
        sent.push(proc.terminate().unwrap());
        assert_eq!(
            sent,
            vec![
                Some(EscalationSignal::Interrupt),
                Some(EscalationSignal::Terminate),
                Some(EscalationSignal::Kill),
            ]
        );

        let outcome = run_to_exit(&mut proc).await;
        assert_eq!(outcome.signal, Some(9));
        assert_eq!(proc.terminate().unwrap(), None);
    }

    #[tokio::test]
    async fn kill_reaps_a_running_child() {
        let mut cmd = PlatformCommand::new("sleep");
        cmd.arg("30");
        let mut proc = SupervisedProcess::spawn(&PlatformContext::default(), &cmd).unwrap();
        proc.kill().await.unwrap();
        let outcome = proc.exit().unwrap();
        assert_eq!(outcome.signal, Some(9));
        proc.kill().await.unwrap();
    }
}
