//! # Conduit Core
//!
//! Command registry, dispatch and reactive primitives for the extension bridge.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐  register_command   ┌─────────────────────┐
//! │  Extension   │ ──────────────────► │   CommandRegistry   │
//! └──────────────┘                     │  ReplayLatest<list> │
//!                                      └──────────┬──────────┘
//! ┌──────────────┐  execute_command               │ snapshot
//! │     Host     │ ──────────────────► execute_command(list, params)
//! └──────────────┘
//! ```
//!
//! ## Learning: Copy-on-Write Snapshots
//!
//! The command list is an `Arc<[Arc<CommandEntry>]>`. Every change builds
//! a new slice and swaps it in, so a reader holding a snapshot never sees a
//! half-applied registration.

pub mod command;
pub mod config;
pub mod proxy;
pub mod reactive;

pub use command::{
    execute_command, CommandEntry, CommandList, CommandRegistration, CommandRegistry,
    ExecuteCommandParams,
};
pub use config::{Config, PendingPolicy};
pub use proxy::{ProxyTag, ProxyValue, TransferMode};
pub use reactive::{
    switch_latest, Guarded, ReplayLatest, SwitchLatest, Teardown, Unsubscribable,
};

/// Result type for command operations
pub type CommandResult<T> = Result<T, CommandError>;

/// Errors that can occur while registering or dispatching commands
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command is already registered: {0:?}")]
    Duplicate(String),

    #[error("command not found: {0:?}")]
    NotFound(String),

    /// The command's own body failed; the error is passed through as is.
    #[error(transparent)]
    Run(#[from] anyhow::Error),
}
