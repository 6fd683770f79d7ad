//! Outbound content: drafts, posts, the reply log and conversation threads

use crate::ids::{DraftId, ExternalId, PostId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Kind of outbound content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostType {
    Reply,
    Timeline,
    Quote,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostType::Reply => "reply",
            PostType::Timeline => "timeline",
            PostType::Quote => "quote",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "reply" => Some(PostType::Reply),
            "timeline" => Some(PostType::Timeline),
            "quote" => Some(PostType::Quote),
            _ => None,
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status recorded on an outbound post row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Approved,
    Posted,
    Rejected,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Approved => "approved",
            PostStatus::Posted => "posted",
            PostStatus::Rejected => "rejected",
        }
    }
}

/// Status of a draft in the approval queue.
///
/// The graph is `pending -> {approved, rejected}`, `approved -> posted`, and
/// `pending -> posted` only while approval is not required. `rejected` and
/// `posted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Approved,
    Rejected,
    Posted,
}

/// Operation requested against a draft
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftAction {
    Approve,
    Reject,
    Publish,
}

/// Why a draft operation was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("draft already finalized (status: {0})")]
    AlreadyFinalized(DraftStatus),

    #[error("draft must be approved before publishing")]
    ApprovalRequired,
}

impl DraftStatus {
    pub const ALL: [DraftStatus; 4] = [
        DraftStatus::Pending,
        DraftStatus::Approved,
        DraftStatus::Rejected,
        DraftStatus::Posted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Pending => "pending",
            DraftStatus::Approved => "approved",
            DraftStatus::Rejected => "rejected",
            DraftStatus::Posted => "posted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(DraftStatus::Pending),
            "approved" => Some(DraftStatus::Approved),
            "rejected" => Some(DraftStatus::Rejected),
            "posted" => Some(DraftStatus::Posted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DraftStatus::Rejected | DraftStatus::Posted)
    }

    /// Resolve the status an action leads to.
    ///
    /// Approve and reject are review decisions and only apply to pending
    /// drafts; a second decision reports the draft as already finalized.
    pub fn apply(
        self,
        action: DraftAction,
        approval_required: bool,
    ) -> Result<DraftStatus, TransitionError> {
        match (self, action) {
            (DraftStatus::Pending, DraftAction::Approve) => Ok(DraftStatus::Approved),
            (DraftStatus::Pending, DraftAction::Reject) => Ok(DraftStatus::Rejected),
            (DraftStatus::Pending, DraftAction::Publish) if approval_required => {
                Err(TransitionError::ApprovalRequired)
            }
            (DraftStatus::Pending, DraftAction::Publish) => Ok(DraftStatus::Posted),
            (DraftStatus::Approved, DraftAction::Publish) => Ok(DraftStatus::Posted),
            (status, _) => Err(TransitionError::AlreadyFinalized(status)),
        }
    }

    /// Whether a draft in this status may be handed to the publisher.
    pub fn is_publishable(&self, approval_required: bool) -> bool {
        match self {
            DraftStatus::Approved => true,
            DraftStatus::Pending => !approval_required,
            _ => false,
        }
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candidate output awaiting review or final safety checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: DraftId,
    pub text: String,
    pub post_type: PostType,

    /// Platform message this draft answers (reply drafts only)
    pub reply_to_id: Option<ExternalId>,
    pub conversation_id: Option<String>,

    pub status: DraftStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Operator who approved or rejected the draft
    pub decided_by: Option<String>,
    pub rejection_reason: Option<String>,

    /// Set once, when the draft is posted
    pub external_id: Option<ExternalId>,
    pub posted_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl Draft {
    pub fn reply(
        text: impl Into<String>,
        reply_to_id: ExternalId,
        conversation_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut draft = Self::new(text, PostType::Reply, now);
        draft.reply_to_id = Some(reply_to_id);
        draft.conversation_id = conversation_id;
        draft
    }

    pub fn timeline(text: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(text, PostType::Timeline, now)
    }

    pub fn new(text: impl Into<String>, post_type: PostType, now: DateTime<Utc>) -> Self {
        Self {
            id: DraftId::generate(),
            text: text.into(),
            post_type,
            reply_to_id: None,
            conversation_id: None,
            status: DraftStatus::Pending,
            created_at: now,
            updated_at: now,
            decided_by: None,
            rejection_reason: None,
            external_id: None,
            posted_at: None,
            note: None,
        }
    }
}

/// A published (or otherwise recorded) outbound post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundPost {
    pub id: PostId,
    pub draft_id: Option<DraftId>,
    pub external_id: Option<ExternalId>,
    pub text: String,
    pub post_type: PostType,
    pub reply_to_id: Option<ExternalId>,
    pub status: PostStatus,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub learning_processed: bool,
    pub learning_processed_at: Option<DateTime<Utc>>,
}

impl OutboundPost {
    pub fn posted_from(draft: &Draft, external_id: ExternalId, posted_at: DateTime<Utc>) -> Self {
        Self {
            id: PostId::generate(),
            draft_id: Some(draft.id),
            external_id: Some(external_id),
            text: draft.text.clone(),
            post_type: draft.post_type,
            reply_to_id: draft.reply_to_id.clone(),
            status: PostStatus::Posted,
            created_at: draft.created_at,
            posted_at: Some(posted_at),
            learning_processed: false,
            learning_processed_at: None,
        }
    }
}

/// Reply-log row. Its existence for a `reply_to_id` is the at-most-once
/// reply guarantee; the row is written as a claim before publishing and
/// completed with our reply's id afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyLogEntry {
    pub reply_to_id: ExternalId,
    pub draft_id: DraftId,
    pub reply_external_id: Option<ExternalId>,
    pub claimed_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ReplyLogEntry {
    pub fn claim(reply_to_id: ExternalId, draft_id: DraftId, now: DateTime<Utc>) -> Self {
        Self {
            reply_to_id,
            draft_id,
            reply_external_id: None,
            claimed_at: now,
            completed_at: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.reply_external_id.is_some()
    }
}

/// Engagement tracking for one external conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub conversation_id: String,
    pub reply_count: u32,
    pub stopped: bool,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn new(conversation_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            reply_count: 0,
            stopped: false,
            updated_at: now,
        }
    }
}
