//! Queued remote operations and their single-shot completion callbacks.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::error::{MegaError, Result};
use crate::fs::Node;
use crate::session::account::{AccountDetails, AccountFlags};

/// Completion callback. Runs on a worker task, never on the enqueuing one.
pub type Callback = Box<dyn FnOnce(Result<CommandOutput>) + Send + 'static>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
}

impl CommandState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CommandState::Running,
            2 => CommandState::Completed,
            3 => CommandState::Failed,
            _ => CommandState::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandState::Completed | CommandState::Failed)
    }
}

/// What a command does.
#[derive(Clone)]
pub enum CommandKind {
    Login { email: String, password: String },
    FetchNodes,
    AccountDetails(AccountFlags),
    /// Fetch `node` into the local file `dest`.
    Download { node: Node, dest: PathBuf },
    /// Store the local file `source` in the folder `parent`.
    Upload { source: PathBuf, parent: Node },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Login { .. } => "login",
            CommandKind::FetchNodes => "fetch_nodes",
            CommandKind::AccountDetails(_) => "account_details",
            CommandKind::Download { .. } => "download",
            CommandKind::Upload { .. } => "upload",
        }
    }

    /// Everything except the login itself needs session keys.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, CommandKind::Login { .. })
    }
}

impl std::fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Login { email, .. } => f
                .debug_struct("Login")
                .field("email", email)
                .field("password", &"<redacted>")
                .finish(),
            CommandKind::FetchNodes => f.write_str("FetchNodes"),
            CommandKind::AccountDetails(flags) => {
                f.debug_tuple("AccountDetails").field(flags).finish()
            }
            CommandKind::Download { node, dest } => f
                .debug_struct("Download")
                .field("node", &node.handle)
                .field("dest", dest)
                .finish(),
            CommandKind::Upload { source, parent } => f
                .debug_struct("Upload")
                .field("source", source)
                .field("parent", &parent.handle)
                .finish(),
        }
    }
}

/// Success value delivered to a callback.
#[derive(Debug, Clone)]
pub enum CommandOutput {
    /// `nodes` is `None` when the initial listing failed; the session is
    /// still authenticated with a stale tree.
    LoggedIn { email: String, nodes: Option<usize> },
    Refreshed { nodes: usize },
    Account(AccountDetails),
    Downloaded { node: Node, path: PathBuf, bytes: u64 },
    Uploaded { node: Node, bytes: u64 },
}

/// Caller-side view of a queued command.
#[derive(Debug, Clone)]
pub struct CommandTicket {
    id: u64,
    state: Arc<AtomicU8>,
}

impl CommandTicket {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// One unit of asynchronous work.
///
/// The kind is fixed at construction; only the execution state changes. The
/// callback fires exactly once: from [`complete`](Self::complete), or with
/// `PoolStopped` if the command is dropped before completing.
pub struct Command {
    id: u64,
    kind: CommandKind,
    epoch: u64,
    state: Arc<AtomicU8>,
    callback: Option<Callback>,
}

impl Command {
    pub fn new(
        kind: CommandKind,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            epoch: 0,
            state: Arc::new(AtomicU8::new(CommandState::Pending as u8)),
            callback: Some(Box::new(done)),
        }
    }

    /// Fetch a remote file into a local path.
    pub fn download(
        node: Node,
        dest: impl Into<PathBuf>,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) -> Self {
        Self::new(
            CommandKind::Download {
                node,
                dest: dest.into(),
            },
            done,
        )
    }

    /// Store a local file in a remote folder.
    pub fn upload(
        source: impl Into<PathBuf>,
        parent: Node,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) -> Self {
        Self::new(
            CommandKind::Upload {
                source: source.into(),
                parent,
            },
            done,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn state(&self) -> CommandState {
        CommandState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn ticket(&self) -> CommandTicket {
        CommandTicket {
            id: self.id,
            state: self.state.clone(),
        }
    }

    /// Session epoch the command was accepted in.
    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    pub(crate) fn set_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    pub(crate) fn mark_running(&self) {
        self.state
            .store(CommandState::Running as u8, Ordering::Release);
    }

    /// Drop the callback without calling it. Used when the command is
    /// rejected synchronously and the caller already has the error.
    pub(crate) fn disarm(mut self) {
        self.callback = None;
    }

    /// Record the terminal state and deliver `result`.
    pub(crate) fn complete(mut self, result: Result<CommandOutput>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<CommandOutput>) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let state = if result.is_ok() {
            CommandState::Completed
        } else {
            CommandState::Failed
        };
        self.state.store(state as u8, Ordering::Release);

        let id = self.id;
        let kind = self.kind.name();
        if catch_unwind(AssertUnwindSafe(move || callback(result))).is_err() {
            error!("callback for {} command #{} panicked", kind, id);
        }
    }
}

impl Drop for Command {
    fn drop(&mut self) {
        self.finish(Err(MegaError::PoolStopped));
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}
