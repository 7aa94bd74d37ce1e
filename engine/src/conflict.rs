//! Conflict detection against remote state.
//!
//! Before a queued mutation is replayed, the current remote state of the
//! entity it touches is fetched and checked here. The check is per
//! operation type:
//!
//! - delivery completion: the stop was already completed earlier by
//!   someone else
//! - route start: the route has left its `planned` state
//! - route complete: the route was already completed
//! - order update: last write wins on the server's `updatedAt` versus the
//!   locally captured time
//! - location update: never conflicts
//!
//! An exact match between remote state and the local intent means our own
//! earlier replay was applied and only its acknowledgment was lost. That is
//! reported as [`Verdict::AlreadyApplied`] rather than a conflict.

use crate::{
    payload::{
        DeliveryCompletion, LocationUpdate, OrderUpdate, Payload, RouteAction, RouteStatus,
        SamplePayload,
    },
    OperationId, OperationType, PendingOperation, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Remote lifecycle of a delivery stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    Pending,
    Completed,
}

/// Remote view of a delivery stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStop {
    pub stop_id: String,
    pub status: StopState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

/// Remote lifecycle of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Planned,
    InProgress,
    Completed,
}

/// Remote view of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRoute {
    pub route_id: String,
    pub status: RouteState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
}

/// Remote view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOrder {
    pub order_id: String,
    pub updated_at: Timestamp,
}

/// Which remote entity must be fetched before replaying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRequest {
    Stop(String),
    Route(String),
    Order(String),
    /// Append-only data, no remote check
    Nothing,
}

impl SnapshotRequest {
    pub fn for_payload(payload: &Payload) -> Self {
        match payload {
            Payload::DeliveryCompletion(p) => SnapshotRequest::Stop(p.stop_id.clone()),
            Payload::RouteStatus(p) => SnapshotRequest::Route(p.route_id.clone()),
            Payload::OrderUpdate(p) => SnapshotRequest::Order(p.order_id.clone()),
            Payload::LocationUpdate(_) => SnapshotRequest::Nothing,
        }
    }
}

/// Remote state fetched for a conflict check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteSnapshot {
    Stop(RemoteStop),
    Route(RemoteRoute),
    Order(RemoteOrder),
    None,
}

impl RemoteSnapshot {
    /// JSON form stored in a conflict record.
    pub fn to_value(&self) -> Option<serde_json::Value> {
        match self {
            RemoteSnapshot::None => None,
            other => serde_json::to_value(other).ok(),
        }
    }
}

/// Outcome of a conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Safe to replay
    Proceed,
    /// Remote state already reflects this exact intent
    AlreadyApplied,
    /// Replaying would contradict or duplicate a remote change
    Conflict { reason: String },
}

impl Verdict {
    fn conflict(reason: impl Into<String>) -> Self {
        Verdict::Conflict {
            reason: reason.into(),
        }
    }
}

/// Check a decoded payload against the remote state of its entity.
pub fn evaluate(payload: &Payload, remote: &RemoteSnapshot) -> Verdict {
    match (payload, remote) {
        (Payload::LocationUpdate(_), _) => Verdict::Proceed,
        (Payload::DeliveryCompletion(local), RemoteSnapshot::Stop(stop)) => {
            check_delivery(local, stop)
        }
        (Payload::RouteStatus(local), RemoteSnapshot::Route(route)) => check_route(local, route),
        (Payload::OrderUpdate(local), RemoteSnapshot::Order(order)) => check_order(local, order),
        (_, other) => Verdict::conflict(format!(
            "remote snapshot {} does not match operation payload",
            snapshot_name(other)
        )),
    }
}

fn snapshot_name(snapshot: &RemoteSnapshot) -> &'static str {
    match snapshot {
        RemoteSnapshot::Stop(_) => "stop",
        RemoteSnapshot::Route(_) => "route",
        RemoteSnapshot::Order(_) => "order",
        RemoteSnapshot::None => "none",
    }
}

fn check_delivery(local: &DeliveryCompletion, stop: &RemoteStop) -> Verdict {
    match (stop.status, stop.completed_at) {
        (StopState::Completed, Some(remote_at)) if remote_at < local.completed_at => {
            Verdict::conflict(format!(
                "stop {} already completed at {} (local completion at {})",
                local.stop_id, remote_at, local.completed_at
            ))
        }
        (StopState::Completed, Some(remote_at)) if remote_at == local.completed_at => {
            Verdict::AlreadyApplied
        }
        // A later remote completion is left to the idempotent endpoint,
        // which answers with a conflict status if it disagrees.
        _ => Verdict::Proceed,
    }
}

fn check_route(local: &RouteStatus, route: &RemoteRoute) -> Verdict {
    match local.action {
        RouteAction::Start => match route.status {
            RouteState::Planned => Verdict::Proceed,
            RouteState::InProgress if route.started_at == Some(local.at) => {
                Verdict::AlreadyApplied
            }
            state => Verdict::conflict(format!(
                "route {} cannot start from state {:?}",
                local.route_id, state
            )),
        },
        RouteAction::Complete => match route.status {
            RouteState::Completed if route.completed_at == Some(local.at) => {
                Verdict::AlreadyApplied
            }
            RouteState::Completed => Verdict::conflict(format!(
                "route {} already completed by another process",
                local.route_id
            )),
            _ => Verdict::Proceed,
        },
    }
}

fn check_order(local: &OrderUpdate, order: &RemoteOrder) -> Verdict {
    if order.updated_at > local.captured_at {
        Verdict::conflict(format!(
            "order {} changed remotely at {} after local capture at {}",
            local.order_id, order.updated_at, local.captured_at
        ))
    } else {
        Verdict::Proceed
    }
}

/// A queued operation that left the active queue without being applied.
///
/// Written once by the sync loop and read-only afterwards; consumed by a
/// manual review surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub operation_id: OperationId,
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub local_payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_snapshot: Option<serde_json::Value>,
    pub detected_at: Timestamp,
    pub error: String,
}

impl ConflictRecord {
    /// Build a record from the operation being evicted.
    pub fn from_operation(
        op: &PendingOperation,
        remote_snapshot: Option<serde_json::Value>,
        error: impl Into<String>,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            operation_id: op.id.clone(),
            kind: op.kind,
            local_payload: op.payload.clone(),
            remote_snapshot,
            detected_at,
            error: error.into(),
        }
    }

    /// Build a record for a breadcrumb batch the server refused.
    ///
    /// The local payload has the shape of a `location_update`.
    pub fn from_location_batch(
        batch_key: impl Into<OperationId>,
        samples: &[SamplePayload],
        remote_snapshot: Option<serde_json::Value>,
        error: impl Into<String>,
        detected_at: Timestamp,
    ) -> Self {
        let batch = LocationUpdate {
            samples: samples.to_vec(),
        };

        Self {
            operation_id: batch_key.into(),
            kind: OperationType::LocationUpdate,
            local_payload: serde_json::to_value(batch).unwrap_or_default(),
            remote_snapshot,
            detected_at,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delivery(stop: &str, at: Timestamp) -> Payload {
        Payload::decode(
            OperationType::DeliveryCompletion,
            &json!({"stopId": stop, "completedAt": at}),
        )
        .unwrap()
    }

    fn route(action: &str, at: Timestamp) -> Payload {
        Payload::decode(
            OperationType::RouteStatus,
            &json!({"routeId": "R1", "action": action, "at": at}),
        )
        .unwrap()
    }

    fn order(captured_at: Timestamp) -> Payload {
        Payload::decode(
            OperationType::OrderUpdate,
            &json!({"orderId": "O1", "capturedAt": captured_at, "changes": {"qty": 1}}),
        )
        .unwrap()
    }

    fn stop(status: StopState, completed_at: Option<Timestamp>) -> RemoteSnapshot {
        RemoteSnapshot::Stop(RemoteStop {
            stop_id: "S1".into(),
            status,
            completed_at,
        })
    }

    fn remote_route(
        status: RouteState,
        started_at: Option<Timestamp>,
        completed_at: Option<Timestamp>,
    ) -> RemoteSnapshot {
        RemoteSnapshot::Route(RemoteRoute {
            route_id: "R1".into(),
            status,
            started_at,
            completed_at,
        })
    }

    #[test]
    fn delivery_beaten_by_earlier_completion() {
        let verdict = evaluate(&delivery("S1", 2_000), &stop(StopState::Completed, Some(1_000)));
        assert!(matches!(verdict, Verdict::Conflict { .. }));
    }

    #[test]
    fn delivery_same_completion_is_already_applied() {
        let verdict = evaluate(&delivery("S1", 2_000), &stop(StopState::Completed, Some(2_000)));
        assert_eq!(verdict, Verdict::AlreadyApplied);
    }

    #[test]
    fn delivery_pending_proceeds() {
        let verdict = evaluate(&delivery("S1", 2_000), &stop(StopState::Pending, None));
        assert_eq!(verdict, Verdict::Proceed);

        let later = evaluate(&delivery("S1", 2_000), &stop(StopState::Completed, Some(3_000)));
        assert_eq!(later, Verdict::Proceed);
    }

    #[test]
    fn route_start_requires_planned() {
        let planned = remote_route(RouteState::Planned, None, None);
        assert_eq!(evaluate(&route("start", 10), &planned), Verdict::Proceed);

        let started_by_us = remote_route(RouteState::InProgress, Some(10), None);
        assert_eq!(
            evaluate(&route("start", 10), &started_by_us),
            Verdict::AlreadyApplied
        );

        let started_elsewhere = remote_route(RouteState::InProgress, Some(5), None);
        assert!(matches!(
            evaluate(&route("start", 10), &started_elsewhere),
            Verdict::Conflict { .. }
        ));

        let done = remote_route(RouteState::Completed, Some(5), Some(8));
        assert!(matches!(
            evaluate(&route("start", 10), &done),
            Verdict::Conflict { .. }
        ));
    }

    #[test]
    fn route_complete_conflicts_when_done_elsewhere() {
        let running = remote_route(RouteState::InProgress, Some(5), None);
        assert_eq!(evaluate(&route("complete", 20), &running), Verdict::Proceed);

        let done_by_us = remote_route(RouteState::Completed, Some(5), Some(20));
        assert_eq!(
            evaluate(&route("complete", 20), &done_by_us),
            Verdict::AlreadyApplied
        );

        let done_elsewhere = remote_route(RouteState::Completed, Some(5), Some(15));
        assert!(matches!(
            evaluate(&route("complete", 20), &done_elsewhere),
            Verdict::Conflict { .. }
        ));
    }

    #[test]
    fn order_last_write_wins() {
        let newer = RemoteSnapshot::Order(RemoteOrder {
            order_id: "O1".into(),
            updated_at: 200,
        });
        assert!(matches!(evaluate(&order(100), &newer), Verdict::Conflict { .. }));

        let older = RemoteSnapshot::Order(RemoteOrder {
            order_id: "O1".into(),
            updated_at: 50,
        });
        assert_eq!(evaluate(&order(100), &older), Verdict::Proceed);

        let same = RemoteSnapshot::Order(RemoteOrder {
            order_id: "O1".into(),
            updated_at: 100,
        });
        assert_eq!(evaluate(&order(100), &same), Verdict::Proceed);
    }

    #[test]
    fn location_never_conflicts() {
        let payload = Payload::decode(
            OperationType::LocationUpdate,
            &json!({"samples": [
                {"id": "l1", "latitude": 1.0, "longitude": 2.0, "accuracy": 3.0, "capturedAt": 4}
            ]}),
        )
        .unwrap();
        assert_eq!(SnapshotRequest::for_payload(&payload), SnapshotRequest::Nothing);
        assert_eq!(evaluate(&payload, &RemoteSnapshot::None), Verdict::Proceed);
    }

    #[test]
    fn refused_batch_record_decodes_as_location_update() {
        let sample = SamplePayload {
            id: "l1".into(),
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 3.0,
            captured_at: 4,
        };
        let record =
            ConflictRecord::from_location_batch("locations:l1:l1:1", &[sample], None, "422", 9);

        assert_eq!(record.kind, OperationType::LocationUpdate);
        assert_eq!(record.local_payload["samples"][0]["id"], "l1");
        assert!(Payload::decode(record.kind, &record.local_payload).is_ok());
    }

    #[test]
    fn mismatched_snapshot_is_a_conflict() {
        let verdict = evaluate(&delivery("S1", 1), &RemoteSnapshot::None);
        assert!(matches!(verdict, Verdict::Conflict { reason } if reason.contains("none")));
    }

    #[test]
    fn snapshot_requests() {
        assert_eq!(
            SnapshotRequest::for_payload(&delivery("S7", 1)),
            SnapshotRequest::Stop("S7".into())
        );
        assert_eq!(
            SnapshotRequest::for_payload(&route("start", 1)),
            SnapshotRequest::Route("R1".into())
        );
        assert_eq!(
            SnapshotRequest::for_payload(&order(1)),
            SnapshotRequest::Order("O1".into())
        );
    }

    #[test]
    fn conflict_record_from_operation() {
        let op = PendingOperation::new(
            "op-1",
            OperationType::DeliveryCompletion,
            json!({"stopId": "S1", "completedAt": 2_000}),
            2_000,
        );
        let snapshot = stop(StopState::Completed, Some(1_000));
        let record = ConflictRecord::from_operation(&op, snapshot.to_value(), "beaten", 3_000);

        assert_eq!(record.operation_id, "op-1");
        assert_eq!(record.kind, OperationType::DeliveryCompletion);
        assert_eq!(record.local_payload, op.payload);
        assert_eq!(record.remote_snapshot.as_ref().unwrap()["kind"], "stop");
        assert_eq!(record.remote_snapshot.as_ref().unwrap()["completedAt"], 1_000);

        assert!(RemoteSnapshot::None.to_value().is_none());
    }
}
