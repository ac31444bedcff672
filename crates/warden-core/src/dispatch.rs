//! Command dispatch table.
//!
//! Maps a request's command code to a handler. Codes without a handler are
//! answered with `EINVAL`. New commands are added by registering entries;
//! framing never changes.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::event::EventSource;
use crate::protocol::{CommandCode, Errno, Request};
use crate::registry::ConnectionId;

/// What a command handler may touch while serving one request.
pub struct CommandContext<'a> {
    /// Connection the request arrived on.
    pub connection: ConnectionId,
    /// Scheduler capability of the hosting process.
    pub events: &'a dyn EventSource,
}

/// Outcome of a command: response payload bytes, or an error code.
pub type CommandResult = Result<Vec<u8>, Errno>;

/// A control command.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, request: &Request, payload: &[u8], ctx: &CommandContext<'_>)
    -> CommandResult;
}

impl<F> CommandHandler for F
where
    F: Fn(&Request, &[u8], &CommandContext<'_>) -> CommandResult + Send + Sync,
{
    fn handle(
        &self,
        request: &Request,
        payload: &[u8],
        ctx: &CommandContext<'_>,
    ) -> CommandResult {
        self(request, payload, ctx)
    }
}

/// Initiates orderly process shutdown. The responding connection stays open.
#[derive(Debug, Default, Clone, Copy)]
pub struct StopCommand;

impl CommandHandler for StopCommand {
    fn handle(&self, request: &Request, _payload: &[u8], ctx: &CommandContext<'_>) -> CommandResult {
        info!(connection = %ctx.connection, id = request.id, "Got stop command");
        ctx.events.request_shutdown();
        Ok(Vec::new())
    }
}

/// Registrable table from command code to handler.
pub struct Dispatcher {
    handlers: HashMap<CommandCode, Box<dyn CommandHandler>>,
}

impl Dispatcher {
    /// A table with no commands at all; every request is malformed.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// The built-in command set: [`CommandCode::STOP`].
    pub fn new() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register(CommandCode::STOP, Box::new(StopCommand));
        dispatcher
    }

    /// Register a handler, returning the one it replaces.
    pub fn register(
        &mut self,
        code: CommandCode,
        handler: Box<dyn CommandHandler>,
    ) -> Option<Box<dyn CommandHandler>> {
        self.handlers.insert(code, handler)
    }

    /// Register a closure as a handler.
    pub fn register_fn<F>(&mut self, code: CommandCode, handler: F) -> Option<Box<dyn CommandHandler>>
    where
        F: Fn(&Request, &[u8], &CommandContext<'_>) -> CommandResult + Send + Sync + 'static,
    {
        self.register(code, Box::new(handler))
    }

    pub fn contains(&self, code: CommandCode) -> bool {
        self.handlers.contains_key(&code)
    }

    /// Registered codes in ascending order.
    pub fn codes(&self) -> Vec<CommandCode> {
        let mut codes: Vec<_> = self.handlers.keys().copied().collect();
        codes.sort();
        codes
    }

    pub fn dispatch(&self, request: &Request, payload: &[u8], ctx: &CommandContext<'_>) -> CommandResult {
        match self.handlers.get(&request.code) {
            Some(handler) => handler.handle(request, payload, ctx),
            None => {
                debug!(
                    connection = %ctx.connection,
                    code = %request.code,
                    "Malformed control command received"
                );
                Err(Errno::INVALID_ARGUMENT)
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}
