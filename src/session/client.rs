//! Session client: authentication state, tree cache and the command queue.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::RngCore;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::{SessionKeys, Transport};
use crate::config::ClientConfig;
use crate::error::{MegaError, Result};
use crate::fs::{Node, NodeTree, SharedTree};
use crate::session::account::AccountFlags;
use crate::session::command::{Command, CommandKind, CommandOutput, CommandTicket};
use crate::session::pool::{CommandHandler, WorkerPool};
use crate::session::record::SessionRecord;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    /// Logged in. `tree_fresh` turns true after a successful full listing.
    Authenticated { tree_fresh: bool },
}

/// Local storage failures during a transfer are transfer failures.
fn local_error(path: &Path, e: std::io::Error) -> MegaError {
    MegaError::Transfer(format!("{}: {}", path.display(), e))
}

/// State shared between the client handle and the workers.
struct Engine {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    tree: SharedTree,
    /// Epoch changes only while this lock is held for writing.
    keys: RwLock<Option<Arc<SessionKeys>>>,
    epoch: AtomicU64,
    tree_fresh: AtomicBool,
}

impl Engine {
    fn not_logged_in() -> MegaError {
        MegaError::Authentication("not logged in".to_string())
    }

    /// Keys for a command accepted in `epoch`, if that session is still live.
    fn keys_for(&self, epoch: u64) -> Result<Arc<SessionKeys>> {
        let slot = self.keys.read();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(MegaError::Authentication(
                "session ended before the command ran".to_string(),
            ));
        }
        slot.clone().ok_or_else(Self::not_logged_in)
    }

    /// Run `apply` only if `epoch` is still current. The read lock keeps a
    /// logout from slipping in between the check and the mutation.
    fn if_current<T>(&self, epoch: u64, apply: impl FnOnce() -> Result<T>) -> Result<T> {
        let slot = self.keys.read();
        if slot.is_none() || self.epoch.load(Ordering::SeqCst) != epoch {
            debug!("dropping tree update from ended session (epoch {})", epoch);
            return Err(MegaError::Authentication(
                "session ended while the command ran".to_string(),
            ));
        }
        apply()
    }

    async fn login(&self, email: &str, password: &str, epoch: u64) -> Result<CommandOutput> {
        let keys = Arc::new(
            self.transport
                .authenticate(&self.config.app_key, email, password)
                .await?,
        );
        {
            let mut slot = self.keys.write();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(MegaError::Authentication(
                    "logged out while the login ran".to_string(),
                ));
            }
            if let Some(existing) = slot.as_ref() {
                return Err(MegaError::Authentication(format!(
                    "already logged in as {}",
                    existing.email
                )));
            }
            *slot = Some(keys.clone());
            self.tree_fresh.store(false, Ordering::SeqCst);
        }
        info!("logged in as {} (session {})", keys.email, keys.session_tag());

        let nodes = match self.refresh(&keys, epoch).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!("initial listing after login failed: {}", e);
                None
            }
        };
        Ok(CommandOutput::LoggedIn {
            email: keys.email.clone(),
            nodes,
        })
    }

    /// Full listing followed by an atomic tree replace.
    async fn refresh(&self, keys: &SessionKeys, epoch: u64) -> Result<usize> {
        let nodes = self.transport.fetch_nodes(keys).await?;
        let tree = NodeTree::from_nodes(nodes)?;
        let count = tree.len();
        self.if_current(epoch, || {
            self.tree.replace(tree);
            self.tree_fresh.store(true, Ordering::SeqCst);
            Ok(())
        })?;
        info!("tree refreshed: {} nodes", count);
        Ok(count)
    }

    async fn download(&self, keys: &SessionKeys, node: &Node, dest: &Path) -> Result<CommandOutput> {
        if !node.is_file() {
            return Err(MegaError::Transfer(format!("{} is not a file", node.name)));
        }
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // Unique per transfer: the same node may be fetched twice at once.
        let temp = dir.join(format!(
            ".megatmp.{}.{:016x}",
            node.handle,
            rand::thread_rng().next_u64()
        ));

        let mut file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| local_error(&temp, e))?;
        let written = match self.write_body(keys, node, &temp, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return Err(e);
            }
        };
        drop(file);

        if written != node.size {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(MegaError::Transfer(format!(
                "{}: expected {} bytes, got {}",
                node.name, node.size, written
            )));
        }
        if let Err(e) = tokio::fs::rename(&temp, dest).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(local_error(dest, e));
        }
        debug!("downloaded {} ({} bytes) to {}", node.name, written, dest.display());
        Ok(CommandOutput::Downloaded {
            node: node.clone(),
            path: dest.to_path_buf(),
            bytes: written,
        })
    }

    async fn write_body(
        &self,
        keys: &SessionKeys,
        node: &Node,
        temp: &Path,
        file: &mut tokio::fs::File,
    ) -> Result<u64> {
        let written = self.transport.download(keys, node, file).await?;
        file.flush().await.map_err(|e| local_error(temp, e))?;
        file.sync_all().await.map_err(|e| local_error(temp, e))?;
        Ok(written)
    }

    async fn upload(
        &self,
        keys: &SessionKeys,
        source: &Path,
        parent: &Node,
        epoch: u64,
    ) -> Result<CommandOutput> {
        if !parent.is_folder() {
            return Err(MegaError::NotADirectory(parent.name.clone()));
        }
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| local_error(source, e))?;
        if !meta.is_file() {
            return Err(MegaError::Transfer(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| MegaError::Transfer(format!("{} has no file name", source.display())))?;

        let size = meta.len();
        let mut file = tokio::fs::File::open(source)
            .await
            .map_err(|e| local_error(source, e))?;
        let node = self
            .transport
            .upload(keys, parent, &name, &mut file, size)
            .await?;
        drop(file);
        debug!("uploaded {} ({} bytes) as {}", name, size, node.handle);

        self.refresh_folder(keys, parent, &node, epoch).await;
        Ok(CommandOutput::Uploaded { node, bytes: size })
    }

    /// Bring the parent of a freshly stored node up to date. Falls back to
    /// inserting the stored node alone when the listing fails.
    async fn refresh_folder(&self, keys: &SessionKeys, parent: &Node, stored: &Node, epoch: u64) {
        let patched = match self.transport.fetch_children(keys, parent).await {
            Ok(children) => self.if_current(epoch, || {
                self.tree.patch(|t| t.replace_children(&parent.handle, children))
            }),
            Err(e) => Err(e),
        };
        if let Err(e) = patched {
            if e.is_auth() {
                return;
            }
            warn!("refreshing {} after upload failed: {}", parent.name, e);
            let upserted = self.if_current(epoch, || {
                self.tree.patch(|t| t.upsert(stored.clone()))
            });
            if let Err(e) = upserted {
                warn!("could not add {} to the cached tree: {}", stored.name, e);
            }
        }
    }
}

#[async_trait]
impl CommandHandler for Engine {
    async fn execute(&self, kind: &CommandKind, epoch: u64) -> Result<CommandOutput> {
        let result = match kind {
            CommandKind::Login { email, password } => self.login(email, password, epoch).await,
            CommandKind::FetchNodes => {
                let keys = self.keys_for(epoch)?;
                self.refresh(&keys, epoch)
                    .await
                    .map(|nodes| CommandOutput::Refreshed { nodes })
            }
            CommandKind::AccountDetails(flags) => {
                let keys = self.keys_for(epoch)?;
                self.transport
                    .account_details(&keys, flags)
                    .await
                    .map(|details| CommandOutput::Account(details.restrict_to(flags)))
            }
            CommandKind::Download { node, dest } => {
                let keys = self.keys_for(epoch)?;
                self.download(&keys, node, dest).await
            }
            CommandKind::Upload { source, parent } => {
                let keys = self.keys_for(epoch)?;
                self.upload(&keys, source, parent, epoch).await
            }
        };
        if let Err(e) = &result {
            if e.is_auth() && kind.requires_auth() {
                warn!("{} rejected: {}", kind.name(), e);
            }
        }
        result
    }
}

/// Handle to one account session.
///
/// Cheap to clone. Tree queries answer from the cached snapshot on the
/// calling task; everything that talks to the service is queued on the
/// worker pool and reported through a callback.
#[derive(Clone)]
pub struct SessionClient {
    engine: Arc<Engine>,
    pool: Arc<WorkerPool>,
}

impl SessionClient {
    /// Create an unauthenticated client and start its workers.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let pool = Arc::new(WorkerPool::new(config.workers, config.drain_policy));
        let engine = Arc::new(Engine {
            config,
            transport,
            tree: SharedTree::new(),
            keys: RwLock::new(None),
            epoch: AtomicU64::new(0),
            tree_fresh: AtomicBool::new(false),
        });
        pool.start(engine.clone());
        Self { engine, pool }
    }

    /// Create a client, resuming the session stored in the configured
    /// session file when there is a usable one.
    ///
    /// An unreadable or foreign record is logged and ignored.
    pub async fn load_or_new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let path = config.session_file.clone();
        let client = Self::new(config, transport);
        let Some(path) = path else {
            return client;
        };
        match SessionRecord::load_from(&path).await {
            Ok(Some(record)) => {
                if let Err(e) = client.restore(record) {
                    warn!("ignoring session file {}: {}", path.display(), e);
                }
            }
            Ok(None) => debug!("no session file at {}", path.display()),
            Err(e) => warn!("ignoring session file {}: {}", path.display(), e),
        }
        client
    }

    pub fn config(&self) -> &ClientConfig {
        &self.engine.config
    }

    pub fn status(&self) -> SessionStatus {
        if self.engine.keys.read().is_some() {
            SessionStatus::Authenticated {
                tree_fresh: self.engine.tree_fresh.load(Ordering::SeqCst),
            }
        } else {
            SessionStatus::Unauthenticated
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.engine.keys.read().is_some()
    }

    /// Email of the logged-in account.
    pub fn email(&self) -> Option<String> {
        self.engine.keys.read().as_ref().map(|k| k.email.clone())
    }

    /// Current key material.
    pub fn keys(&self) -> Option<Arc<SessionKeys>> {
        self.engine.keys.read().clone()
    }

    /// Queue a login. The callback receives `LoggedIn` once the handshake
    /// and the initial listing are done.
    pub fn login(
        &self,
        email: &str,
        password: &str,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) -> Result<CommandTicket> {
        self.enqueue_command(Command::new(
            CommandKind::Login {
                email: email.to_string(),
                password: password.to_string(),
            },
            done,
        ))
    }

    /// Drop the session: keys, cached tree and current folder.
    ///
    /// Commands still queued fail with an authentication error when they
    /// reach a worker. Returns false when there was no session.
    pub fn logout(&self) -> bool {
        let had_session = {
            let mut slot = self.engine.keys.write();
            self.engine.epoch.fetch_add(1, Ordering::SeqCst);
            self.engine.tree_fresh.store(false, Ordering::SeqCst);
            self.engine.tree.clear();
            slot.take()
        };
        match had_session {
            Some(keys) => {
                info!("logged out {}", keys.email);
                true
            }
            None => false,
        }
    }

    /// Queue a full listing; the tree is swapped when it arrives.
    pub fn fetch_nodes(
        &self,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) -> Result<CommandTicket> {
        self.enqueue_command(Command::new(CommandKind::FetchNodes, done))
    }

    /// Queue an account-details request for the categories in `flags`.
    pub fn account_details(
        &self,
        flags: AccountFlags,
        done: impl FnOnce(Result<CommandOutput>) + Send + 'static,
    ) -> Result<CommandTicket> {
        self.enqueue_command(Command::new(CommandKind::AccountDetails(flags), done))
    }

    /// Validate `command` against the session state and queue it.
    ///
    /// Fails synchronously, without touching the queue, when the command
    /// needs a session and there is none, or when a login is attempted on
    /// an authenticated session. A rejected command's callback is not
    /// invoked.
    pub fn enqueue_command(&self, mut command: Command) -> Result<CommandTicket> {
        let epoch = {
            let slot = self.engine.keys.read();
            let rejection = match (command.kind().requires_auth(), slot.as_ref()) {
                (true, None) => Some(Engine::not_logged_in()),
                (false, Some(keys)) => Some(MegaError::Authentication(format!(
                    "already logged in as {}",
                    keys.email
                ))),
                _ => None,
            };
            if let Some(e) = rejection {
                debug!("rejecting {} command: {}", command.kind().name(), e);
                command.disarm();
                return Err(e);
            }
            self.engine.epoch.load(Ordering::SeqCst)
        };
        command.set_epoch(epoch);
        self.pool.enqueue(command)
    }

    /// The shared tree cache.
    pub fn tree(&self) -> &SharedTree {
        &self.engine.tree
    }

    pub fn resolve(&self, path: &str) -> Result<Node> {
        self.engine.tree.resolve(path)
    }

    pub fn children(&self, node: &Node) -> Result<Vec<Node>> {
        self.engine.tree.children(node)
    }

    pub fn current_folder(&self) -> Option<Node> {
        self.engine.tree.current_folder()
    }

    pub fn set_current_folder(&self, node: &Node) -> Result<()> {
        self.engine.tree.set_current_folder(node)
    }

    /// Snapshot of the session for persistence. `None` when logged out.
    pub fn record(&self) -> Option<SessionRecord> {
        let keys = self.keys()?;
        let snapshot = self.engine.tree.snapshot();
        let mut record = SessionRecord::new(self.engine.config.app_key.clone(), &keys);
        if !snapshot.is_empty() {
            record.tree = Some(snapshot.to_nodes());
        }
        record.current_folder = self.engine.tree.current_handle();
        Some(record)
    }

    /// Resume from a persisted record without logging in.
    ///
    /// A tree snapshot that fails validation is discarded; the keys are
    /// restored regardless and the tree is left stale.
    pub fn restore(&self, record: SessionRecord) -> Result<()> {
        if record.app_key != self.engine.config.app_key {
            return Err(MegaError::CorruptState(
                "record was written for a different application key".to_string(),
            ));
        }
        let keys = Arc::new(record.keys());
        let mut slot = self.engine.keys.write();
        if let Some(existing) = slot.as_ref() {
            return Err(MegaError::Authentication(format!(
                "already logged in as {}",
                existing.email
            )));
        }

        let tree = record.tree.map(NodeTree::from_nodes).transpose();
        match tree {
            Ok(Some(tree)) => {
                let current = record
                    .current_folder
                    .filter(|h| match tree.get(h) {
                        Some(node) if node.is_folder() => true,
                        _ => {
                            warn!("ignoring stored current folder {}: not a folder in the tree", h);
                            false
                        }
                    });
                self.engine.tree.replace(tree);
                self.engine.tree.set_current_handle(current);
            }
            Ok(None) => self.engine.tree.clear(),
            Err(e) => {
                warn!("discarding cached tree from session record: {}", e);
                self.engine.tree.clear();
            }
        }
        self.engine.tree_fresh.store(false, Ordering::SeqCst);
        info!("resumed session for {} (session {})", keys.email, keys.session_tag());
        *slot = Some(keys);
        Ok(())
    }

    /// Persist the session to the configured file. A logged-out client
    /// removes the file instead.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = self.engine.config.session_file.as_ref() else {
            return Ok(());
        };
        match self.record() {
            Some(record) => record.save_to(path).await,
            None => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Stop the workers (draining per the configured policy), then persist.
    ///
    /// Every command accepted before this call has had its callback invoked
    /// when it returns.
    pub async fn shutdown(&self) -> Result<()> {
        self.pool.stop().await;
        self.save().await
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("status", &self.status())
            .field("tree", &self.engine.tree)
            .field("pool", &self.pool)
            .finish()
    }
}
