//! Account detail categories and their selection flags.

use serde::{Deserialize, Serialize};

/// Storage quota information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Quota {
    /// Total storage in bytes
    pub total: u64,
    /// Used storage in bytes
    pub used: u64,
}

impl Quota {
    /// Get free storage in bytes.
    pub fn free(&self) -> u64 {
        self.total.saturating_sub(self.used)
    }

    /// Get usage percentage.
    pub fn usage_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.used as f64 / self.total as f64) * 100.0
        }
    }
}

/// Which categories an account-details request asks for.
///
/// Each flag toggles one category both in the request and in the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccountFlags {
    pub storage: bool,
    pub sessions: bool,
    pub transfers: bool,
    pub balance: bool,
    pub purchases: bool,
    pub transactions: bool,
}

impl AccountFlags {
    /// Every category.
    pub fn all() -> Self {
        Self {
            storage: true,
            sessions: true,
            transfers: true,
            balance: true,
            purchases: true,
            transactions: true,
        }
    }

    /// Storage quota only.
    pub fn storage_only() -> Self {
        Self {
            storage: true,
            ..Self::default()
        }
    }

    /// True when no category is selected.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One active login session on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    pub created: i64,
    pub last_seen: i64,
    pub client: String,
    pub current: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Download,
    Upload,
}

/// One completed transfer from the account history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub timestamp: i64,
    pub direction: TransferDirection,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub timestamp: i64,
    pub amount: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub timestamp: i64,
    pub delta: f64,
    pub currency: String,
}

/// Account metadata. A category is `None` when it was not requested.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountDetails {
    pub email: String,
    pub storage: Option<Quota>,
    pub sessions: Option<Vec<SessionEntry>>,
    pub transfers: Option<Vec<TransferEntry>>,
    pub balance: Option<Vec<Balance>>,
    pub purchases: Option<Vec<Purchase>>,
    pub transactions: Option<Vec<Transaction>>,
}

impl AccountDetails {
    /// Clear every category `flags` did not ask for.
    pub fn restrict_to(mut self, flags: &AccountFlags) -> Self {
        if !flags.storage {
            self.storage = None;
        }
        if !flags.sessions {
            self.sessions = None;
        }
        if !flags.transfers {
            self.transfers = None;
        }
        if !flags.balance {
            self.balance = None;
        }
        if !flags.purchases {
            self.purchases = None;
        }
        if !flags.transactions {
            self.transactions = None;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_calculations() {
        let quota = Quota {
            total: 1000,
            used: 250,
        };

        assert_eq!(quota.free(), 750);
        assert_eq!(quota.usage_percent(), 25.0);

        let empty_quota = Quota { total: 0, used: 0 };
        assert_eq!(empty_quota.usage_percent(), 0.0);
    }

    #[test]
    fn test_flags() {
        assert!(AccountFlags::default().is_empty());
        assert!(!AccountFlags::all().is_empty());
        let storage = AccountFlags::storage_only();
        assert!(storage.storage && !storage.sessions && !storage.transactions);
    }

    #[test]
    fn test_restrict_to_clears_unrequested() {
        let full = AccountDetails {
            email: "a@b.c".into(),
            storage: Some(Quota { total: 10, used: 1 }),
            sessions: Some(vec![]),
            transfers: Some(vec![]),
            balance: Some(vec![Balance {
                amount: 4.5,
                currency: "EUR".into(),
            }]),
            purchases: Some(vec![Purchase {
                id: "p1".into(),
                timestamp: 1,
                amount: 4.5,
                currency: "EUR".into(),
            }]),
            transactions: Some(vec![Transaction {
                id: "p1".into(),
                timestamp: 1,
                delta: 4.5,
                currency: "EUR".into(),
            }]),
        };
        let flags = AccountFlags {
            sessions: true,
            balance: true,
            ..AccountFlags::default()
        };
        let trimmed = full.restrict_to(&flags);
        assert_eq!(trimmed.storage, None);
        assert!(trimmed.sessions.is_some());
        assert!(trimmed.transfers.is_none());
        assert_eq!(trimmed.balance.as_ref().map(Vec::len), Some(1));
        assert!(trimmed.purchases.is_none());
        assert!(trimmed.transactions.is_none());
        assert_eq!(trimmed.email, "a@b.c");
    }
}
