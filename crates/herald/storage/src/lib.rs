//! Herald storage abstractions.
//!
//! One repository trait per persisted entity, plus poll cursors, rate
//! counters and TTL leases. Uniqueness guarantees live here:
//! - inbox rows are unique on `(source, external_id)`
//! - reply-log rows are unique on `reply_to_id`
//! - at most one style version is active
//! - `learning_processed` only ever flips false→true, through a conditional claim
//! - a draft carries at most one publish claim
//! - a rate event is only reserved while every window cap has room
//!
//! The in-memory backend is deterministic and test-friendly; PostgreSQL
//! (feature `postgres`) is the multi-instance source of truth.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use memory::InMemoryHeraldStorage;
pub use model::{DraftCounts, InboxCounts, LeaseRecord, RateCap};
pub use traits::{
    CounterStore, CursorStore, DraftStore, HeraldStorage, InboxStore, LeaseStore, MemoryStore,
    OutboundStore, QueryWindow, ReplyLogStore, SettingsStorage, StyleStore, ThreadStore,
};
