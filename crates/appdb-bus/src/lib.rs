//! Change bus for appdb.
//!
//! Writers publish a [`DocumentEvent`] after every committed upsert or
//! delete; subscribers receive the events of one wallet and app (optionally
//! one model) in publication order. Publication never blocks: every
//! subscription owns a bounded buffer and an [`OverflowPolicy`] decides what
//! is lost when a subscriber falls behind.

pub mod bus;
pub mod error;
pub mod event;

pub use bus::{BusConfig, ChangeBus, OverflowPolicy, Subscription, MAX_CAPACITY};
pub use error::TryRecvError;
pub use event::{DocumentEvent, EventKind, Scope};
