//! Command registry and dispatch for extension commands.
//!
//! ## Learning: Type Erasure for Async Closures
//!
//! Each extension supplies its own closure type and its own future type.
//! `CommandEntry::new` boxes both, so entries with different concrete
//! types live in the same slice and dispatch goes through a vtable.
//!
//! Dispatch itself is the free function [`execute_command`], which only
//! needs a slice of entries. The registry hands it a snapshot; tests can
//! hand it a literal list.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{self, BoxFuture, FutureExt, TryFutureExt};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reactive::{ReplayLatest, Unsubscribable};
use crate::{CommandError, CommandResult};

/// Future returned by a command body.
pub type CommandFuture = BoxFuture<'static, anyhow::Result<Value>>;

type RunFn = dyn Fn(Vec<Value>) -> CommandFuture + Send + Sync;

/// A registered command.
pub struct CommandEntry {
    /// The command id, conventionally `extension.command`.
    command: String,
    run: Box<RunFn>,
}

impl CommandEntry {
    /// Creates an entry from an id and an async body.
    pub fn new<F, Fut>(command: impl Into<String>, run: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        Self {
            command: command.into(),
            run: Box::new(move |args| run(args).boxed()),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Invokes the command body.
    pub fn run(&self, args: Vec<Value>) -> CommandFuture {
        (self.run)(args)
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// An immutable snapshot of the registered commands, in registration order.
pub type CommandList = Arc<[Arc<CommandEntry>]>;

/// Request to run a command, as sent by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteCommandParams {
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<Value>>,
}

impl ExecuteCommandParams {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }
}

/// Runs the first command in `commands` whose id matches `params.command`.
///
/// A missing command resolves to [`CommandError::NotFound`] without
/// running anything. Errors from the command body come back as
/// [`CommandError::Run`] unchanged.
pub fn execute_command(
    commands: &[Arc<CommandEntry>],
    params: ExecuteCommandParams,
) -> BoxFuture<'static, CommandResult<Value>> {
    let Some(entry) = commands.iter().find(|e| e.command == params.command) else {
        tracing::debug!(command = %params.command, "Command not found");
        return future::ready(Err(CommandError::NotFound(params.command))).boxed();
    };

    tracing::debug!(command = %params.command, "Executing command");
    entry
        .run(params.arguments.unwrap_or_default())
        .map_err(CommandError::Run)
        .boxed()
}

/// Manages and executes commands from all extensions.
#[derive(Clone)]
pub struct CommandRegistry {
    entries: ReplayLatest<CommandList>,
}

impl CommandRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: ReplayLatest::with_value(Vec::new().into()),
        }
    }

    /// Registers a command.
    ///
    /// Fails with [`CommandError::Duplicate`] if a command with the same id
    /// is already registered; the registry is left as it was.
    pub fn register_command(&self, entry: CommandEntry) -> CommandResult<CommandRegistration> {
        let entry = Arc::new(entry);
        self.entries.try_update(|current| {
            let current = current.map(|list| &list[..]).unwrap_or_default();
            if current.iter().any(|e| e.command == entry.command) {
                return Err(CommandError::Duplicate(entry.command.clone()));
            }
            let mut next = current.to_vec();
            next.push(Arc::clone(&entry));
            Ok(Some(next.into()))
        })?;

        tracing::debug!(command = %entry.command, "Registered command");
        Ok(CommandRegistration {
            entries: self.entries.clone(),
            entry: Mutex::new(Some(entry)),
        })
    }

    /// Dispatches `params` against the current snapshot.
    pub fn execute_command(
        &self,
        params: ExecuteCommandParams,
    ) -> BoxFuture<'static, CommandResult<Value>> {
        execute_command(&self.commands_snapshot(), params)
    }

    /// All commands, re-emitted whenever the set changes.
    ///
    /// The current list is delivered immediately on subscription.
    pub fn commands(&self) -> BoxStream<'static, CommandList> {
        self.entries.subscribe()
    }

    /// The current set of commands, for callers that do not need updates.
    pub fn commands_snapshot(&self) -> CommandList {
        self.entries.get().unwrap_or_else(|| Vec::new().into())
    }

    pub fn len(&self) -> usize {
        self.commands_snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns whether a command with this id is registered.
    pub fn contains(&self, command: &str) -> bool {
        self.commands_snapshot()
            .iter()
            .any(|e| e.command == command)
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by [`CommandRegistry::register_command`].
///
/// Unsubscribing removes exactly the entry this handle registered, matched
/// by identity, so a stale handle never removes a newer command that reuses
/// the same id.
#[must_use = "dropping the handle leaves the command registered with no way to remove it"]
pub struct CommandRegistration {
    entries: ReplayLatest<CommandList>,
    entry: Mutex<Option<Arc<CommandEntry>>>,
}

impl Unsubscribable for CommandRegistration {
    fn unsubscribe(&self) {
        let Some(entry) = self
            .entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        let removed = self.entries.update(|current| {
            let current = current?;
            if !current.iter().any(|e| Arc::ptr_eq(e, &entry)) {
                return None;
            }
            let next: Vec<_> = current
                .iter()
                .filter(|e| !Arc::ptr_eq(e, &entry))
                .cloned()
                .collect();
            Some(next.into())
        });

        if removed {
            tracing::debug!(command = %entry.command, "Unregistered command");
        }
    }
}
