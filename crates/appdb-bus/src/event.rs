use std::fmt;

use serde::{Deserialize, Serialize};

use appdb_types::{AppId, Document, DocumentKey, ModelName, Partition, WalletId};

/// Classification of change events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A document was created or replaced.
    Upserted,
    /// A document was deleted. The event carries a tombstone.
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Upserted => "upserted",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// One committed change, as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvent {
    /// Bus-wide sequence number, strictly increasing in publication order.
    pub seq: u64,
    pub kind: EventKind,
    /// The stored document, or a tombstone (key with an empty value) for
    /// [`EventKind::Deleted`].
    pub document: Document,
}

impl DocumentEvent {
    pub fn key(&self) -> &DocumentKey {
        &self.document.key
    }
}

/// The set of documents a subscription observes: one wallet's data for one
/// app, optionally narrowed to a single model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    #[serde(rename = "walletID")]
    pub wallet: WalletId,
    pub app: AppId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelName>,
}

impl Scope {
    /// Every model of `app` for `wallet`.
    pub fn app(wallet: WalletId, app: AppId) -> Self {
        Self {
            wallet,
            app,
            model: None,
        }
    }

    /// Exactly the documents of `partition`.
    pub fn partition(partition: &Partition) -> Self {
        Self {
            wallet: partition.wallet.clone(),
            app: partition.app.clone(),
            model: Some(partition.model.clone()),
        }
    }

    pub fn with_model(mut self, model: ModelName) -> Self {
        self.model = Some(model);
        self
    }

    /// Returns `true` if a change to `key` is visible in this scope.
    pub fn matches(&self, key: &DocumentKey) -> bool {
        if self.wallet != key.wallet || self.app != key.app {
            return false;
        }
        match self.model {
            Some(ref model) => *model == key.model,
            None => true,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.model {
            Some(ref model) => write!(f, "{}/{}/{}", self.wallet, self.app, model),
            None => write!(f, "{}/{}/*", self.wallet, self.app),
        }
    }
}
