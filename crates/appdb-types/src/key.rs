use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::id::{AppId, ItemKey, ModelName, WalletId};

/// The (wallet, app, model) triple that scopes a set of documents.
///
/// Item keys are unique within a partition. Listing and key generation both
/// operate on a partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Partition {
    #[serde(rename = "walletID")]
    pub wallet: WalletId,
    pub app: AppId,
    pub model: ModelName,
}

impl Partition {
    pub fn new(wallet: WalletId, app: AppId, model: ModelName) -> Self {
        Self { wallet, app, model }
    }

    /// Build a partition from raw strings, rejecting empty components.
    pub fn parse(wallet: &str, app: &str, model: &str) -> Result<Self, TypeError> {
        Ok(Self {
            wallet: wallet.parse()?,
            app: app.parse()?,
            model: model.parse()?,
        })
    }

    /// The key of the item `key` inside this partition.
    pub fn key(&self, key: ItemKey) -> DocumentKey {
        DocumentKey {
            wallet: self.wallet.clone(),
            app: self.app.clone(),
            model: self.model.clone(),
            key,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.wallet, self.app, self.model)
    }
}

/// Globally unique identity of a document: (wallet, app, model, key).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentKey {
    #[serde(rename = "walletID")]
    pub wallet: WalletId,
    pub app: AppId,
    pub model: ModelName,
    pub key: ItemKey,
}

impl DocumentKey {
    pub fn new(wallet: WalletId, app: AppId, model: ModelName, key: ItemKey) -> Self {
        Self {
            wallet,
            app,
            model,
            key,
        }
    }

    /// Build a key from raw strings, rejecting empty components.
    pub fn parse(wallet: &str, app: &str, model: &str, key: &str) -> Result<Self, TypeError> {
        Ok(Partition::parse(wallet, app, model)?.key(key.parse()?))
    }

    /// The partition this key belongs to.
    pub fn partition(&self) -> Partition {
        Partition {
            wallet: self.wallet.clone(),
            app: self.app.clone(),
            model: self.model.clone(),
        }
    }
}

impl fmt::Display for DocumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.wallet, self.app, self.model, self.key)
    }
}

/// Exclusive bounds on item keys for range listing.
///
/// A present `start` admits only keys strictly greater than it; a present
/// `end` admits only keys strictly less than it. A missing bound is
/// unbounded on that side.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRange {
    pub start: Option<ItemKey>,
    pub end: Option<ItemKey>,
}

impl KeyRange {
    /// The unbounded range.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a range from possibly-empty strings; empty means unbounded.
    pub fn from_bounds(start: &str, end: &str) -> Self {
        Self {
            start: ItemKey::new(start).ok(),
            end: ItemKey::new(end).ok(),
        }
    }

    /// Returns `true` if `key` lies strictly inside the bounds.
    pub fn contains(&self, key: &ItemKey) -> bool {
        if let Some(ref start) = self.start {
            if key <= start {
                return false;
            }
        }
        if let Some(ref end) = self.end {
            if key >= end {
                return false;
            }
        }
        true
    }

    /// Returns `true` if no key can satisfy both bounds.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => start >= end,
            _ => false,
        }
    }
}
