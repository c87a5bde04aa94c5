//! # megashell
//!
//! Asynchronous command engine behind an interactive cloud-storage shell.
//!
//! ## Features
//!
//! - **Session client**: login, logout, full tree listing and account
//!   details, with every network call queued on a worker pool and reported
//!   through a single-shot callback.
//! - **Remote node tree**: immutable snapshots swapped atomically, path
//!   resolution against a current folder, incremental patches after uploads.
//! - **Worker pool**: fixed number of workers, unbounded FIFO queue, panic
//!   isolation and a configurable drain policy on stop.
//! - **Session persistence**: a field-named JSON record carrying the key
//!   material and the last tree snapshot, so a new process can resume
//!   without logging in.
//! - **Transport seam**: the service is reached through the [`Transport`]
//!   trait; [`MemoryTransport`] is a complete in-process implementation.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use megashell::{ClientConfig, CommandOutput, MemoryTransport, SessionClient};
//!
//! # async fn example() -> megashell::Result<()> {
//! let transport = Arc::new(MemoryTransport::new());
//! transport.add_account("user@example.com", "password");
//!
//! let config = ClientConfig::new("app-key").with_session_file("session.json");
//! let client = SessionClient::load_or_new(config, transport).await;
//!
//! let (tx, rx) = tokio::sync::oneshot::channel();
//! client.login("user@example.com", "password", move |res| {
//!     let _ = tx.send(res);
//! })?;
//! if let Ok(Ok(CommandOutput::LoggedIn { email, .. })) = rx.await {
//!     println!("logged in as {}", email);
//! }
//!
//! for node in client.children(&client.resolve("/")?)? {
//!     println!("{} ({} bytes)", node.name, node.size);
//! }
//!
//! // Drain queued work and persist the session.
//! client.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod base64;
pub mod config;
pub mod error;
pub mod fs;
pub mod session;
pub mod shell;

// Re-export commonly used types
pub use api::{ApiErrorCode, MemoryTransport, SessionKeys, Transport};
pub use config::{ClientConfig, DrainPolicy};
pub use error::{MegaError, Result};
pub use fs::{Node, NodeTree, NodeType, SharedTree};
pub use session::{
    AccountDetails, AccountFlags, Command, CommandKind, CommandOutput, CommandState,
    CommandTicket, Quota, SessionClient, SessionRecord, SessionStatus, WorkerPool,
};
pub use shell::{Flow, Shell, ShellCommand};
