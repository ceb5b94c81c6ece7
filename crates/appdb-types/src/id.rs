use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::TypeError;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Wrap a non-empty string.
            pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
                let value = value.into();
                if value.is_empty() {
                    return Err(TypeError::EmptyIdentifier { kind: $kind });
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = TypeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(
    /// Wallet that owns a set of app documents.
    WalletId,
    "wallet id"
);

opaque_id!(
    /// Application identifier; conventionally the URL of the app's manifest.
    AppId,
    "app id"
);

opaque_id!(
    /// Name of a model declared by an app manifest.
    ModelName,
    "model name"
);

opaque_id!(
    /// Key of a document within its (wallet, app, model) partition.
    ///
    /// Keys are compared as plain strings; listing order is byte order.
    ItemKey,
    "item key"
);

const SLUG_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

static SLUG_COUNTER: AtomicU32 = AtomicU32::new(0);

impl ItemKey {
    /// Generate a short, collision-resistant key for `Add`.
    ///
    /// Layout (base36, 10 chars): 4 chars of wall-clock milliseconds,
    /// 2 chars of a process-wide counter, 4 random chars.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis().unsigned_abs();
        let count = u64::from(SLUG_COUNTER.fetch_add(1, Ordering::Relaxed));

        let mut slug = String::with_capacity(10);
        push_base36(&mut slug, millis, 4);
        push_base36(&mut slug, count, 2);

        let mut rng = rand::thread_rng();
        for _ in 0..4 {
            let idx = rng.gen_range(0..SLUG_ALPHABET.len());
            slug.push(SLUG_ALPHABET[idx] as char);
        }
        Self(slug)
    }
}

/// Append the lowest `width` base36 digits of `value`, most significant first.
fn push_base36(out: &mut String, mut value: u64, width: usize) {
    let mut digits = [b'0'; 8];
    for slot in digits.iter_mut().take(width).rev() {
        *slot = SLUG_ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    for &d in digits.iter().take(width) {
        out.push(d as char);
    }
}
