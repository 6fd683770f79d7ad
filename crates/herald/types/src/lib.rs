//! Herald core types
//!
//! Shared vocabulary for the persona orchestration layer:
//! - strongly-typed identifiers
//! - inbound items and their deduplication key
//! - drafts, outbound posts, reply log and threads, with the draft state machine
//! - extracted memories and style versions
//! - runtime settings and worker status

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod ids;
pub mod inbox;
pub mod learning;
pub mod post;
pub mod settings;
pub mod worker;

pub use ids::{DraftId, ExternalId, HolderId, MemoryId, PostId, StyleVersionId};
pub use inbox::{InboxItem, RawItem};
pub use learning::{Memory, MemoryCandidate, MemoryKind, StyleVersion, StyleVersionPayload};
pub use post::{
    Draft, DraftAction, DraftStatus, OutboundPost, PostStatus, PostType, ReplyLogEntry, Thread,
    TransitionError,
};
pub use settings::{RuntimeSettings, SettingRecord, SettingsPatch};
pub use worker::{RunOutcome, SkipReason, WorkerKind, WorkerStatus};
