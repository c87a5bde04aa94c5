//! The network/crypto collaborator the engine drives.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::fs::Node;
use crate::session::account::{AccountDetails, AccountFlags};

/// Key material and identity produced by a successful login.
///
/// Immutable for the life of a session; a logout drops it.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub email: String,
    pub user_handle: String,
    pub session_id: String,
    pub master_key: [u8; 16],
    pub session_key: Option<[u8; 16]>,
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("email", &self.email)
            .field("user_handle", &self.user_handle)
            .field("session_id", &self.session_id)
            .field("master_key", &"<redacted>")
            .finish()
    }
}

impl SessionKeys {
    /// Short form of the session id, safe for logs.
    pub fn session_tag(&self) -> String {
        self.session_id.chars().take(8).collect()
    }
}

/// Remote service operations.
///
/// Every call may be slow and may fail; the engine only calls these from
/// worker tasks. Timeouts are the implementation's business and must surface
/// as errors.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the login handshake.
    async fn authenticate(&self, app_key: &str, email: &str, password: &str)
        -> Result<SessionKeys>;

    /// Full listing of the account's tree.
    async fn fetch_nodes(&self, keys: &SessionKeys) -> Result<Vec<Node>>;

    /// Direct children of one folder.
    async fn fetch_children(&self, keys: &SessionKeys, parent: &Node) -> Result<Vec<Node>>;

    /// Account metadata for the selected categories.
    async fn account_details(
        &self,
        keys: &SessionKeys,
        flags: &AccountFlags,
    ) -> Result<AccountDetails>;

    /// Stream a file's plaintext into `sink`, returning the byte count.
    async fn download(
        &self,
        keys: &SessionKeys,
        node: &Node,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64>;

    /// Store `size` bytes read from `source` as `name` under `parent`.
    async fn upload(
        &self,
        keys: &SessionKeys,
        parent: &Node,
        name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
    ) -> Result<Node>;
}
