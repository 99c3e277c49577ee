//! Core platform abstractions and context management

use refurb_events::{EventEmitter, EventSender};
use std::collections::HashMap;

use crate::implementations::linux::LinuxProcessOperations;
use crate::process::{CommandOutput, PlatformCommand, ProcessOperations};

/// Context for platform operations, providing event emission and metadata tracking
#[derive(Clone, Default)]
pub struct PlatformContext {
    event_sender: Option<EventSender>,
    operation_metadata: HashMap<String, String>,
}

impl PlatformContext {
    /// Create a new platform context with event emission capabilities
    #[must_use]
    pub fn new(event_sender: Option<EventSender>) -> Self {
        Self {
            event_sender,
            operation_metadata: HashMap::new(),
        }
    }

    /// Add custom metadata to the context
    pub fn add_metadata(&mut self, key: String, value: String) {
        self.operation_metadata.insert(key, value);
    }

    /// Get all metadata
    #[must_use]
    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.operation_metadata
    }
}

impl EventEmitter for PlatformContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

/// Main platform abstraction providing access to platform operations
pub struct Platform {
    process_ops: Box<dyn ProcessOperations>,
}

impl Platform {
    /// Create a new platform instance with the specified implementation
    #[must_use]
    pub fn new(process_ops: Box<dyn ProcessOperations>) -> Self {
        Self { process_ops }
    }

    /// The platform this binary runs on
    #[must_use]
    pub fn current() -> Self {
        Self::new(Box::new(LinuxProcessOperations::new()))
    }

    /// Access process operations
    #[must_use]
    pub fn process(&self) -> &dyn ProcessOperations {
        &*self.process_ops
    }

    /// Create a platform context with event emission
    #[must_use]
    pub fn create_context(&self, event_sender: Option<EventSender>) -> PlatformContext {
        PlatformContext::new(event_sender)
    }

    /// Convenience method: Execute a command and get output
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned.
    pub async fn execute_command(
        &self,
        ctx: &PlatformContext,
        cmd: PlatformCommand,
    ) -> Result<CommandOutput, refurb_errors::Error> {
        self.process().execute_command(ctx, cmd).await
    }

    /// Convenience method: Create a new command builder
    #[must_use]
    pub fn command(&self, program: &str) -> PlatformCommand {
        self.process().create_command(program)
    }
}
