//! Session engine: commands, the worker pool, the client and persistence.

pub mod account;
mod client;
pub mod command;
mod pool;
pub mod record;

pub use account::{AccountDetails, AccountFlags, Quota};
pub use client::{SessionClient, SessionStatus};
pub use command::{Command, CommandKind, CommandOutput, CommandState, CommandTicket};
pub use pool::{CommandHandler, WorkerPool};
pub use record::SessionRecord;
