//! Cancellation signal ladder

use nix::sys::signal::Signal;
use std::fmt;

/// One rung of the cancellation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationSignal {
    Interrupt,
    Terminate,
    Kill,
}

impl EscalationSignal {
    #[must_use]
    pub fn as_nix(self) -> Signal {
        match self {
            Self::Interrupt => Signal::SIGINT,
            Self::Terminate => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
        }
    }
}

impl fmt::Display for EscalationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_nix().as_str())
    }
}

/// Hands out SIGINT, SIGTERM and SIGKILL in that order, one per request.
/// Requests after the kill yield nothing.
#[derive(Debug, Default, Clone)]
pub struct SignalEscalation {
    sent: usize,
}

impl SignalEscalation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the ladder and return the signal to deliver now
    pub fn next_signal(&mut self) -> Option<EscalationSignal> {
        let signal = match self.sent {
            0 => EscalationSignal::Interrupt,
            1 => EscalationSignal::Terminate,
            2 => EscalationSignal::Kill,
            _ => return None,
        };
        self.sent += 1;
        Some(signal)
    }

    /// Whether the first interrupt has gone out
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.sent > 0
    }

    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.sent >= 3
    }
}
