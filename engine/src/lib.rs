//! # Fieldsync Engine
//!
//! Deterministic queue logic for delivery agents who keep working offline.
//!
//! This crate holds everything about the offline queue that can be decided
//! without touching storage or the network: the data model, payload
//! validation, replay ordering, retry backoff, quota classification and
//! conflict checks against remote state. The `fieldsync-agent` crate wires it
//! to SQLite and HTTP.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never reads a clock, a file or a socket; time is
//!   always passed in as a [`Timestamp`]
//! - **Deterministic**: the same queue snapshot always replays in the same order
//! - **Testable**: pure functions, no mocks needed
//!
//! ## Core Concepts
//!
//! ### Pending operations
//!
//! A [`PendingOperation`] is a mutation the agent committed locally. It is
//! replayed by priority tier ([`Priority`]), then creation time. Operations
//! touching the same entity are always replayed in creation order.
//!
//! ### Backoff
//!
//! [`Backoff`] holds the fixed delay schedule (1s, 5s, 15s, 30s, 60s) and the
//! retry bound after which an operation is moved to the conflict log.
//!
//! ### Conflicts
//!
//! [`conflict::evaluate`] checks a decoded [`Payload`] against the remote
//! state of its entity and returns a [`Verdict`]. Anything that cannot be
//! applied becomes a [`ConflictRecord`]; nothing is silently dropped.
//!
//! ### Quota
//!
//! [`StorageEstimate::admit`] refuses derived writes once storage is
//! critically full, while writes for committed user actions always pass.
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldsync_engine::{Backoff, OperationType, PendingOperation, ReplayPlan, Step};
//! use serde_json::json;
//!
//! let op = PendingOperation::new(
//!     "op_1",
//!     OperationType::DeliveryCompletion,
//!     json!({"stopId": "S1", "completedAt": 1706745600000u64}),
//!     1706745600000,
//! );
//!
//! let backoff = Backoff::default();
//! let mut plan = ReplayPlan::new(vec![op]);
//! assert_eq!(plan.total(), 1);
//!
//! match plan.next_step(1706745600000, &backoff) {
//!     Some(Step::Dispatch(op)) => assert_eq!(op.entity_key(), "stop:S1"),
//!     other => panic!("unexpected step: {other:?}"),
//! }
//! ```

pub mod backoff;
pub mod conflict;
pub mod error;
pub mod operation;
pub mod payload;
pub mod progress;
pub mod queue;
pub mod quota;
pub mod record;

// Re-export main types at crate root
pub use backoff::Backoff;
pub use conflict::{
    ConflictRecord, RemoteOrder, RemoteRoute, RemoteSnapshot, RemoteStop, RouteState,
    SnapshotRequest, StopState, Verdict,
};
pub use error::Error;
pub use operation::{FailureOutcome, OperationType, PendingOperation, Priority};
pub use payload::{
    DeliveryCompletion, LocationUpdate, OrderUpdate, Payload, RouteAction, RouteStatus,
    SamplePayload,
};
pub use progress::SyncProgress;
pub use queue::{replay_order, ReplayPlan, SkipReason, Step};
pub use quota::{QuotaLevel, StorageEstimate, WriteClass};
pub use record::{CacheEntry, CapturedPhoto, LocationSample};

/// Type aliases for clarity
pub type OperationId = String;
pub type Timestamp = u64;
