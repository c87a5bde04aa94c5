//! In-process account store implementing [`Transport`].
//!
//! Behaves like a small remote service: accounts with passwords and key
//! material, a node table, file contents and live sessions. Used by the demo
//! shell for offline runs and by the test suite.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::api::error::ApiErrorCode;
use crate::api::transport::{SessionKeys, Transport};
use crate::base64::base64url_encode;
use crate::error::{MegaError, Result};
use crate::fs::Node;
use crate::session::account::{
    AccountDetails, AccountFlags, Balance, Purchase, Quota, SessionEntry, Transaction,
    TransferDirection, TransferEntry,
};

const DEFAULT_QUOTA: u64 = 20 * 1024 * 1024 * 1024;

struct Account {
    password: String,
    user_handle: String,
    master_key: [u8; 16],
    root: String,
    quota_total: u64,
    nodes: HashMap<String, Node>,
    blobs: HashMap<String, Vec<u8>>,
    history: Vec<TransferEntry>,
    balance: Vec<Balance>,
    purchases: Vec<Purchase>,
    transactions: Vec<Transaction>,
}

struct LiveSession {
    email: String,
    created: i64,
    last_seen: i64,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, LiveSession>,
    fail_next: Option<ApiErrorCode>,
    calls: usize,
}

/// In-memory [`Transport`].
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<State>,
    latency: Option<Duration>,
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn random_handle() -> String {
    let mut bytes = [0u8; 6];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64url_encode(&bytes)
}

fn account_key(email: &str) -> String {
    email.trim().to_lowercase()
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Register an account and return its root node.
    pub fn add_account(&self, email: &str, password: &str) -> Node {
        let mut master_key = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut master_key);
        let root = Node::root(random_handle()).with_timestamp(now());
        let account = Account {
            password: password.to_string(),
            user_handle: random_handle(),
            master_key,
            root: root.handle.clone(),
            quota_total: DEFAULT_QUOTA,
            nodes: HashMap::from([(root.handle.clone(), root.clone())]),
            blobs: HashMap::new(),
            history: Vec::new(),
            balance: Vec::new(),
            purchases: Vec::new(),
            transactions: Vec::new(),
        };
        self.state.lock().accounts.insert(account_key(email), account);
        root
    }

    /// Create a folder directly in the store.
    pub fn add_folder(&self, email: &str, parent: &Node, name: &str) -> Result<Node> {
        let node = Node::folder(random_handle(), parent.handle.clone(), name).with_timestamp(now());
        self.insert(email, node, None)
    }

    /// Create a file with `data` as content directly in the store.
    pub fn add_file(&self, email: &str, parent: &Node, name: &str, data: &[u8]) -> Result<Node> {
        let node = Node::file(
            random_handle(),
            parent.handle.clone(),
            name,
            data.len() as u64,
        )
        .with_timestamp(now());
        self.insert(email, node, Some(data.to_vec()))
    }

    /// Set the storage quota reported for an account.
    pub fn set_quota(&self, email: &str, total: u64) {
        if let Some(account) = self.state.lock().accounts.get_mut(&account_key(email)) {
            account.quota_total = total;
        }
    }

    /// Record a paid purchase: adds the purchase, a matching credit
    /// transaction and the amount to the balance in `currency`.
    pub fn add_purchase(&self, email: &str, amount: f64, currency: &str) -> Result<()> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(&account_key(email))
            .ok_or_else(|| ApiErrorCode::NotExist.into_error(email))?;
        let id = random_handle();
        let stamp = now();
        account.purchases.push(Purchase {
            id: id.clone(),
            timestamp: stamp,
            amount,
            currency: currency.to_string(),
        });
        account.transactions.push(Transaction {
            id,
            timestamp: stamp,
            delta: amount,
            currency: currency.to_string(),
        });
        match account.balance.iter_mut().find(|b| b.currency == currency) {
            Some(balance) => balance.amount += amount,
            None => account.balance.push(Balance {
                amount,
                currency: currency.to_string(),
            }),
        }
        Ok(())
    }

    /// Make the next call fail with `code`.
    pub fn fail_next(&self, code: ApiErrorCode) {
        self.state.lock().fail_next = Some(code);
    }

    /// Invalidate every live session of an account.
    pub fn revoke_sessions(&self, email: &str) {
        let key = account_key(email);
        self.state.lock().sessions.retain(|_, s| s.email != key);
    }

    /// Stored content of a file.
    pub fn contents(&self, email: &str, handle: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .accounts
            .get(&account_key(email))
            .and_then(|a| a.blobs.get(handle).cloned())
    }

    /// Root node of an account.
    pub fn root_of(&self, email: &str) -> Option<Node> {
        let state = self.state.lock();
        let account = state.accounts.get(&account_key(email))?;
        account.nodes.get(&account.root).cloned()
    }

    /// Number of transport calls served so far.
    pub fn calls(&self) -> usize {
        self.state.lock().calls
    }

    fn insert(&self, email: &str, node: Node, data: Option<Vec<u8>>) -> Result<Node> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(&account_key(email))
            .ok_or_else(|| ApiErrorCode::NotExist.into_error(email))?;
        Self::check_parent(account, node.parent_handle.as_deref().unwrap_or_default())?;
        if let Some(data) = data {
            account.blobs.insert(node.handle.clone(), data);
        }
        account.nodes.insert(node.handle.clone(), node.clone());
        Ok(node)
    }

    fn check_parent(account: &Account, parent: &str) -> Result<()> {
        match account.nodes.get(parent) {
            Some(p) if p.is_folder() => Ok(()),
            Some(p) => Err(MegaError::NotADirectory(p.name.clone())),
            None => Err(ApiErrorCode::NotExist.into_error(parent)),
        }
    }

    async fn enter(&self) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        state.calls += 1;
        match state.fail_next.take() {
            Some(code) => Err(code.into()),
            None => Ok(()),
        }
    }

    /// Run `f` against the account owning the session in `keys`.
    fn with_account<T>(
        &self,
        keys: &SessionKeys,
        f: impl FnOnce(&mut Account) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let session = state
            .sessions
            .get_mut(&keys.session_id)
            .ok_or_else(|| ApiErrorCode::Expired.into_error(&keys.email))?;
        session.last_seen = now();
        let account = state
            .accounts
            .get_mut(&session.email)
            .ok_or_else(|| ApiErrorCode::Expired.into_error(&keys.email))?;
        f(account)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn authenticate(
        &self,
        app_key: &str,
        email: &str,
        password: &str,
    ) -> Result<SessionKeys> {
        self.enter().await?;
        if app_key.is_empty() {
            return Err(ApiErrorCode::AppKey.into());
        }
        let key = account_key(email);
        let mut state = self.state.lock();
        let (user_handle, master_key) = match state.accounts.get(&key) {
            Some(account) if account.password == password => {
                (account.user_handle.clone(), account.master_key)
            }
            _ => return Err(ApiErrorCode::AccessDenied.into_error(email)),
        };

        let mut sid = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut sid);
        let mut session_key = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut session_key);
        let session_id = base64url_encode(&sid);
        let stamp = now();
        state.sessions.insert(
            session_id.clone(),
            LiveSession {
                email: key.clone(),
                created: stamp,
                last_seen: stamp,
            },
        );
        debug!("memory transport: session opened for {}", key);

        Ok(SessionKeys {
            email: key,
            user_handle,
            session_id,
            master_key,
            session_key: Some(session_key),
        })
    }

    async fn fetch_nodes(&self, keys: &SessionKeys) -> Result<Vec<Node>> {
        self.enter().await?;
        self.with_account(keys, |account| Ok(account.nodes.values().cloned().collect()))
    }

    async fn fetch_children(&self, keys: &SessionKeys, parent: &Node) -> Result<Vec<Node>> {
        self.enter().await?;
        self.with_account(keys, |account| {
            Self::check_parent(account, &parent.handle)?;
            Ok(account
                .nodes
                .values()
                .filter(|n| n.parent_handle.as_deref() == Some(parent.handle.as_str()))
                .cloned()
                .collect())
        })
    }

    async fn account_details(
        &self,
        keys: &SessionKeys,
        flags: &AccountFlags,
    ) -> Result<AccountDetails> {
        self.enter().await?;
        let sessions: Vec<SessionEntry> = {
            let state = self.state.lock();
            let email = state
                .sessions
                .get(&keys.session_id)
                .map(|s| s.email.clone())
                .unwrap_or_default();
            state
                .sessions
                .iter()
                .filter(|(_, s)| s.email == email)
                .map(|(id, s)| SessionEntry {
                    id: id.chars().take(8).collect(),
                    created: s.created,
                    last_seen: s.last_seen,
                    client: "megashell".to_string(),
                    current: *id == keys.session_id,
                })
                .collect()
        };

        let flags = *flags;
        self.with_account(keys, move |account| {
            let used = account.blobs.values().map(|b| b.len() as u64).sum();
            let details = AccountDetails {
                email: keys.email.clone(),
                storage: flags.storage.then(|| Quota {
                    total: account.quota_total,
                    used,
                }),
                sessions: flags.sessions.then_some(sessions),
                transfers: flags.transfers.then(|| account.history.clone()),
                balance: flags.balance.then(|| account.balance.clone()),
                purchases: flags.purchases.then(|| account.purchases.clone()),
                transactions: flags.transactions.then(|| account.transactions.clone()),
            };
            Ok(details)
        })
    }

    async fn download(
        &self,
        keys: &SessionKeys,
        node: &Node,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64> {
        self.enter().await?;
        let data = self.with_account(keys, |account| {
            let data = account
                .blobs
                .get(&node.handle)
                .cloned()
                .ok_or_else(|| ApiErrorCode::NotExist.into_error(&node.name))?;
            account.history.push(TransferEntry {
                timestamp: now(),
                direction: TransferDirection::Download,
                bytes: data.len() as u64,
            });
            Ok(data)
        })?;

        sink.write_all(&data)
            .await
            .map_err(|e| MegaError::Transfer(format!("{}: {}", node.name, e)))?;
        sink.flush().await?;
        Ok(data.len() as u64)
    }

    async fn upload(
        &self,
        keys: &SessionKeys,
        parent: &Node,
        name: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
        size: u64,
    ) -> Result<Node> {
        self.enter().await?;
        let mut data = Vec::with_capacity(size as usize);
        source
            .read_to_end(&mut data)
            .await
            .map_err(|e| MegaError::Transfer(format!("{}: {}", name, e)))?;
        if data.len() as u64 != size {
            return Err(MegaError::Transfer(format!(
                "{}: expected {} bytes, read {}",
                name,
                size,
                data.len()
            )));
        }

        self.with_account(keys, |account| {
            Self::check_parent(account, &parent.handle)?;
            let existing = account
                .nodes
                .values()
                .find(|n| {
                    n.parent_handle.as_deref() == Some(parent.handle.as_str()) && n.name == name
                })
                .cloned();
            // Same-name files are replaced, folders are not.
            if let Some(old) = existing {
                if old.is_folder() {
                    return Err(ApiErrorCode::Exist.into_error(name));
                }
                account.nodes.remove(&old.handle);
                account.blobs.remove(&old.handle);
            }

            let mut key = vec![0u8; 16];
            rand::thread_rng().fill_bytes(&mut key);
            let node = Node::file(random_handle(), parent.handle.clone(), name, size)
                .with_timestamp(now())
                .with_key(key);
            account.history.push(TransferEntry {
                timestamp: node.timestamp,
                direction: TransferDirection::Upload,
                bytes: size,
            });
            account.nodes.insert(node.handle.clone(), node.clone());
            account.blobs.insert(node.handle.clone(), data);
            Ok(node)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::NodeTree;

    const EMAIL: &str = "user@example.com";

    fn store() -> (MemoryTransport, Node) {
        let transport = MemoryTransport::new();
        let root = transport.add_account(EMAIL, "secret");
        (transport, root)
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (transport, _) = store();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();
        assert_eq!(keys.email, EMAIL);
        assert!(keys.session_key.is_some());
        assert_eq!(keys.session_tag().len(), 8);

        let bad = transport.authenticate("app", EMAIL, "wrong").await;
        assert!(matches!(bad, Err(MegaError::Authentication(_))));
        let no_app = transport.authenticate("", EMAIL, "secret").await;
        assert!(matches!(no_app, Err(MegaError::Authentication(_))));
        let unknown = transport.authenticate("app", "nobody@x", "secret").await;
        assert!(matches!(unknown, Err(MegaError::Authentication(_))));
    }

    #[tokio::test]
    async fn test_listing_builds_valid_tree() {
        let (transport, root) = store();
        assert_eq!(transport.root_of("USER@example.com"), Some(root.clone()));
        let docs = transport.add_folder(EMAIL, &root, "docs").unwrap();
        transport.add_file(EMAIL, &docs, "a.txt", b"hello").unwrap();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();

        let tree = NodeTree::from_nodes(transport.fetch_nodes(&keys).await.unwrap()).unwrap();
        assert_eq!(tree.resolve("/docs/a.txt").unwrap().size, 5);

        let kids = transport.fetch_children(&keys, &docs).await.unwrap();
        assert_eq!(kids.len(), 1);
    }

    #[tokio::test]
    async fn test_revoked_session_is_expired() {
        let (transport, _) = store();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();
        transport.revoke_sessions(EMAIL);
        let res = transport.fetch_nodes(&keys).await;
        assert!(matches!(res, Err(e) if e.is_auth()));
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let (transport, root) = store();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();

        let mut src: &[u8] = b"payload";
        let node = transport
            .upload(&keys, &root, "p.bin", &mut src, 7)
            .await
            .unwrap();
        assert_eq!(node.size, 7);
        assert_eq!(node.key().len(), 16);

        let mut sink = Vec::new();
        let n = transport.download(&keys, &node, &mut sink).await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(sink, b"payload");

        // Replacing a file by name drops the old handle.
        let mut src: &[u8] = b"v2";
        let v2 = transport
            .upload(&keys, &root, "p.bin", &mut src, 2)
            .await
            .unwrap();
        assert_ne!(v2.handle, node.handle);
        assert!(transport.contents(EMAIL, &node.handle).is_none());
    }

    #[tokio::test]
    async fn test_upload_size_mismatch_is_transfer_error() {
        let (transport, root) = store();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();
        let mut src: &[u8] = b"abc";
        let res = transport.upload(&keys, &root, "x", &mut src, 10).await;
        assert!(matches!(res, Err(MegaError::Transfer(_))));
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot() {
        let (transport, _) = store();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();
        transport.fail_next(ApiErrorCode::TempUnavail);
        assert!(matches!(
            transport.fetch_nodes(&keys).await,
            Err(MegaError::Transfer(_))
        ));
        assert!(transport.fetch_nodes(&keys).await.is_ok());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_account_details_honours_flags() {
        let (transport, root) = store();
        transport.add_file(EMAIL, &root, "f", &[0u8; 42]).unwrap();
        transport.set_quota(EMAIL, 1000);
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();

        let details = transport
            .account_details(&keys, &AccountFlags::storage_only())
            .await
            .unwrap();
        assert_eq!(details.storage, Some(Quota { total: 1000, used: 42 }));
        assert!(details.sessions.is_none());

        let all = transport
            .account_details(&keys, &AccountFlags::all())
            .await
            .unwrap();
        let sessions = all.sessions.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].current);
        assert!(all.transactions.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_account_details_financial_categories() {
        let (transport, _) = store();
        transport.add_purchase(EMAIL, 9.99, "EUR").unwrap();
        transport.add_purchase(EMAIL, 5.01, "EUR").unwrap();
        transport.add_purchase(EMAIL, 3.0, "USD").unwrap();
        let keys = transport.authenticate("app", EMAIL, "secret").await.unwrap();

        let flags = AccountFlags {
            balance: true,
            purchases: true,
            ..AccountFlags::default()
        };
        let details = transport.account_details(&keys, &flags).await.unwrap();
        let balance = details.balance.unwrap();
        assert_eq!(balance.len(), 2);
        let eur = balance.iter().find(|b| b.currency == "EUR").unwrap();
        assert!((eur.amount - 15.0).abs() < 1e-9);
        assert_eq!(details.purchases.unwrap().len(), 3);
        assert!(details.transactions.is_none());
        assert!(details.storage.is_none());

        let all = transport
            .account_details(&keys, &AccountFlags::all())
            .await
            .unwrap();
        let transactions = all.transactions.unwrap();
        assert_eq!(transactions.len(), 3);
        assert!((transactions[2].delta - 3.0).abs() < 1e-9);
    }
}
