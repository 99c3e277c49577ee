//! Tasks that supervise one external command

use async_trait::async_trait;
use refurb_errors::TaskError;
use refurb_platform::{
    EscalationSignal, ExitOutcome, OutputStream, PlatformCommand, PollStatus, SupervisedProcess,
};

use crate::context::RunCtx;
use crate::state::TaskState;
use crate::task::Task;

/// Interprets a command's output lines as progress.
///
/// Parsers are pure with respect to the process: they only see lines and the
/// task state, which keeps them testable without spawning anything.
pub trait OutputParser: Send {
    /// Consume one reconstructed line
    ///
    /// # Errors
    ///
    /// Returns an error when the line proves the run has gone wrong.
    fn feed(
        &mut self,
        _stream: OutputStream,
        _line: &str,
        _state: &mut TaskState,
    ) -> Result<(), TaskError> {
        Ok(())
    }

    /// Whether this parser currently drives progress itself. While false the
    /// generic elapsed-over-estimate policy (and its timeout) applies.
    fn reports_progress(&self) -> bool {
        false
    }

    /// Called once after a successful exit, before the task completes
    ///
    /// # Errors
    ///
    /// Returns an error if the collected output is unusable.
    fn finish(&mut self, _state: &mut TaskState) -> Result<(), TaskError> {
        Ok(())
    }
}

/// Parser that ignores all output
#[derive(Debug, Default, Clone, Copy)]
pub struct NoParser;

impl OutputParser for NoParser {}

/// An external command run under supervision.
///
/// Exit codes in the good set complete the task. Any other exit fails it
/// with the numeric status, and both captured streams land in the verdict.
pub struct ProcessTask<P: OutputParser = NoParser> {
    state: TaskState,
    command: PlatformCommand,
    good_codes: Vec<i32>,
    parser: P,
    process: Option<SupervisedProcess>,
    cancel_baseline: usize,
    signals_sent: usize,
}

impl ProcessTask<NoParser> {
    #[must_use]
    pub fn new(description: impl Into<String>, command: PlatformCommand) -> Self {
        Self::with_parser(description, command, NoParser)
    }
}

impl<P: OutputParser> ProcessTask<P> {
    #[must_use]
    pub fn with_parser(description: impl Into<String>, command: PlatformCommand, parser: P) -> Self {
        Self {
            state: TaskState::new(description),
            command,
            good_codes: vec![0],
            parser,
            process: None,
            cancel_baseline: 0,
            signals_sent: 0,
        }
    }

    #[must_use]
    pub fn with_estimate(mut self, seconds: f64) -> Self {
        self.state.set_estimate(seconds);
        self
    }

    /// Exit codes treated as success (default `[0]`)
    #[must_use]
    pub fn good_codes(mut self, codes: &[i32]) -> Self {
        self.good_codes = codes.to_vec();
        self
    }

    #[must_use]
    pub fn as_teardown(mut self) -> Self {
        self.state.teardown = true;
        self
    }

    #[must_use]
    pub fn command(&self) -> &PlatformCommand {
        &self.command
    }

    #[must_use]
    pub fn parser(&self) -> &P {
        &self.parser
    }

    pub fn parser_mut(&mut self) -> &mut P {
        &mut self.parser
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(SupervisedProcess::pid)
    }

    fn conclude(&mut self, outcome: ExitOutcome) -> Result<(), TaskError> {
        let Some(process) = self.process.as_ref() else {
            return Ok(());
        };
        if outcome.is_success_in(&self.good_codes) {
            self.parser.finish(&mut self.state)?;
            self.state.complete();
            return Ok(());
        }

        let command = process.command().display();
        let stdout = process.stdout_text();
        let stderr = process.stderr_text();
        if !stdout.trim().is_empty() {
            self.state.append_verdict(format!("stdout: {}", stdout.trim_end()));
        }
        if !stderr.trim().is_empty() {
            self.state.append_verdict(format!("stderr: {}", stderr.trim_end()));
        }

        if process.interrupted() {
            return Err(TaskError::Cancelled {
                task: self.state.description.clone(),
            });
        }
        match (outcome.code, outcome.signal) {
            (Some(status), _) => Err(TaskError::ProcessFailed {
                command,
                status,
                stdout,
                stderr,
            }),
            (None, Some(signal)) => Err(TaskError::Signalled { command, signal }),
            (None, None) => Err(TaskError::failed(
                self.state.description.clone(),
                "process ended without a status",
            )),
        }
    }
}

#[async_trait]
impl<P: OutputParser> Task for ProcessTask<P> {
    fn state(&self) -> &TaskState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    async fn setup(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        // cancels issued before this task started are not ours to act on
        self.cancel_baseline = ctx.cancel_requests();
        self.state.message = self.command.display();
        let process = SupervisedProcess::spawn(ctx.platform_context(), &self.command)
            .map_err(|e| TaskError::setup(self.state.description.clone(), e.to_string()))?;
        self.process = Some(process);
        Ok(())
    }

    async fn poll(&mut self, ctx: &RunCtx) -> Result<(), TaskError> {
        let pending = ctx.cancel_requests().saturating_sub(self.cancel_baseline);
        while self.signals_sent < pending {
            self.signals_sent += 1;
            if self.terminate()?.is_none() {
                break;
            }
        }

        let Some(process) = self.process.as_mut() else {
            return Err(TaskError::failed(
                self.state.description.clone(),
                "process was never started",
            ));
        };
        let status = process.poll(ctx.config().runner.poll_timeout()).await?;
        for stream in [OutputStream::Stdout, OutputStream::Stderr] {
            for line in process.take_lines(stream) {
                self.parser.feed(stream, &line, &mut self.state)?;
            }
        }

        match status {
            PollStatus::Running => {
                if !self.parser.reports_progress() {
                    self.state.time_based_progress(&ctx.config().runner)?;
                }
                Ok(())
            }
            PollStatus::Exited(outcome) => self.conclude(outcome),
        }
    }

    async fn teardown(&mut self, _ctx: &RunCtx) -> Result<(), TaskError> {
        if let Some(process) = self.process.as_mut() {
            if process.exit().is_none() {
                tracing::warn!(command = %process.command().program(), "killing leftover process");
                process.kill().await?;
            }
        }
        Ok(())
    }

    fn terminate(&mut self) -> Result<Option<EscalationSignal>, TaskError> {
        match self.process.as_mut() {
            Some(process) => Ok(process.terminate()?),
            None => Ok(None),
        }
    }
}
