//! Herald runtime.
//!
//! Background orchestration for an AI persona on a social platform:
//! - [`worker`]: ingestion, timeline, learning, self-style and publisher
//!   workers, plus the cancellable loop that drives them
//! - [`approval`]: the draft state machine and the at-most-once publish path
//! - [`safety`], [`rate_limit`], [`settings`]: the pre-publish kill switch,
//!   rolling rate caps and runtime-mutable settings
//! - [`leader`]: TTL leases for leader-gated work
//! - [`style`]: explicit activation and rollback of style versions
//! - [`orchestrator`]: the facade that wires it all together
//!
//! Every component reads time through [`clock::Clock`], so schedules can be
//! driven by a [`clock::ManualClock`] in tests.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

pub mod approval;
pub mod backoff;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod leader;
pub mod orchestrator;
pub mod rate_limit;
pub mod safety;
pub mod settings;
pub mod status;
pub mod style;
pub mod worker;

pub use approval::{ApprovalResult, DraftApprovalQueue, PublishOutcome, QueueConfig};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{
    call_with_timeout, Analyzer, CollaboratorResult, ContentGenerator, Extractor, LearningRow,
    Platform, PollBatch, Scorer,
};
pub use config::{
    IngestionConfig, LearningConfig, PublisherConfig, RuntimeConfig, SelfStyleConfig,
    TimelineConfig,
};
pub use error::{ApprovalError, CollaboratorError, StyleError, WorkerError};
pub use leader::{LeaderLock, Lease, LeaseGuard};
pub use orchestrator::{
    ApprovalReceipt, Collaborators, Orchestrator, OrchestratorBuilder, StatusReport,
};
pub use rate_limit::{RateLimiter, RateLimits, RateUsage, Reservation};
pub use safety::{ActionOrigin, Admission, BlockReason, GateDecision, SafetyGate};
pub use settings::SettingsStore;
pub use status::WorkerRegistry;
pub use style::{StyleManager, StylePolicy};
pub use worker::{
    run_worker, IngestionWorker, LearningWorker, PublisherWorker, SelfStyleWorker, TickReport,
    TimelinePoster, Worker,
};
