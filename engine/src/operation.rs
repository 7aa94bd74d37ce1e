//! Pending operations: locally committed intents awaiting replay.
//!
//! An operation is created at the moment of intent, regardless of
//! connectivity, and is only ever mutated by the sync loop recording a
//! failed attempt. It leaves the queue exactly once: deleted on success,
//! or evicted to the conflict log.

use crate::{error::Result, Backoff, Error, OperationId, Timestamp};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The kind of mutation an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    DeliveryCompletion,
    LocationUpdate,
    RouteStatus,
    OrderUpdate,
}

impl OperationType {
    /// Stable string form, as stored and sent over the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::DeliveryCompletion => "delivery_completion",
            OperationType::LocationUpdate => "location_update",
            OperationType::RouteStatus => "route_status",
            OperationType::OrderUpdate => "order_update",
        }
    }

    /// Priority used when the caller does not pick one.
    pub fn default_priority(&self) -> Priority {
        match self {
            OperationType::DeliveryCompletion | OperationType::RouteStatus => Priority::High,
            OperationType::OrderUpdate => Priority::Normal,
            OperationType::LocationUpdate => Priority::Low,
        }
    }
}

impl FromStr for OperationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "delivery_completion" => Ok(OperationType::DeliveryCompletion),
            "location_update" => Ok(OperationType::LocationUpdate),
            "route_status" => Ok(OperationType::RouteStatus),
            "order_update" => Ok(OperationType::OrderUpdate),
            other => Err(Error::UnknownOperationType(other.to_string())),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Replay tier. `High` drains before `Normal`, which drains before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Numeric rank used as a sortable storage column.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }

    /// Inverse of [`Priority::rank`].
    pub fn from_rank(rank: u8) -> Result<Self> {
        match rank {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::Low),
            other => Err(Error::UnknownPriority(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(Error::UnknownPriority(other.to_string())),
        }
    }
}

/// A locally queued mutation awaiting replay against the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Operation ID, also used as the idempotency key
    pub id: OperationId,
    /// What kind of mutation this is
    #[serde(rename = "type")]
    pub kind: OperationType,
    /// Type-specific payload (see [`crate::payload`])
    pub payload: serde_json::Value,
    /// When the intent was captured locally
    pub created_at: Timestamp,
    /// Replay tier
    pub priority: Priority,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Time of the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<Timestamp>,
    /// Error from the last failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// What the queue should do with an operation after a transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Stay queued; eligible again at `next_attempt_at`
    Retry {
        attempt: u32,
        next_attempt_at: Timestamp,
    },
    /// Retry budget spent; move to the conflict log
    Exhausted { attempts: u32 },
}

impl PendingOperation {
    /// Create a new operation with the type's default priority.
    pub fn new(
        id: impl Into<OperationId>,
        kind: OperationType,
        payload: serde_json::Value,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
            created_at,
            priority: kind.default_priority(),
            retry_count: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    /// Builder-style priority override.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Key of the logical entity this operation touches.
    ///
    /// Operations sharing a key are replayed in creation order. Location
    /// updates are append-only and get a key of their own.
    pub fn entity_key(&self) -> String {
        let field = match self.kind {
            OperationType::DeliveryCompletion => Some(("stop", "stopId")),
            OperationType::RouteStatus => Some(("route", "routeId")),
            OperationType::OrderUpdate => Some(("order", "orderId")),
            OperationType::LocationUpdate => None,
        };

        match field.and_then(|(prefix, name)| Some((prefix, self.payload.get(name)?.as_str()?))) {
            Some((prefix, id)) => format!("{prefix}:{id}"),
            None => format!("{}:{}", self.kind.as_str(), self.id),
        }
    }

    /// Whether the operation's backoff window has elapsed.
    pub fn is_due(&self, now: Timestamp, backoff: &Backoff) -> bool {
        match self.last_attempt_at {
            None => true,
            Some(last) => now >= backoff.next_attempt_at(self.retry_count, last),
        }
    }

    /// Record a failed attempt.
    ///
    /// `retry_count` only ever grows. The failure that brings it to the
    /// policy's bound reports [`FailureOutcome::Exhausted`].
    pub fn record_failure(
        &mut self,
        error: impl Into<String>,
        now: Timestamp,
        backoff: &Backoff,
    ) -> FailureOutcome {
        self.retry_count = self.retry_count.saturating_add(1);
        self.last_attempt_at = Some(now);
        self.last_error = Some(error.into());

        if backoff.is_exhausted(self.retry_count) {
            FailureOutcome::Exhausted {
                attempts: self.retry_count,
            }
        } else {
            FailureOutcome::Retry {
                attempt: self.retry_count,
                next_attempt_at: backoff.next_attempt_at(self.retry_count, now),
            }
        }
    }

    /// Note a wait that is not a failure (e.g. evidence still uploading).
    pub fn record_wait(&mut self, reason: impl Into<String>) {
        self.last_error = Some(reason.into());
    }
}
