//! Integration tests for the HTTP remote client against a local mock API.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use fieldsync_agent::{HttpRemote, RemoteApi, RemoteError};
use fieldsync_engine::{
    CapturedPhoto, DeliveryCompletion, OrderUpdate, SamplePayload, StopState,
};
use serde_json::{json, Value};

/// Requests the mock API saw: (path, idempotency key, authorization).
#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<(String, Option<String>, Option<String>)>>>);

impl Seen {
    fn record(&self, path: String, headers: &HeaderMap) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        self.0
            .lock()
            .unwrap()
            .push((path, header("idempotency-key"), header("authorization")));
    }

    fn all(&self) -> Vec<(String, Option<String>, Option<String>)> {
        self.0.lock().unwrap().clone()
    }
}

async fn get_stop(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if id == "S1" {
        Ok(Json(json!({"stopId": "S1", "status": "completed", "completedAt": 5})))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn complete_stop(
    State(seen): State<Seen>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    seen.record(format!("/stops/{id}/complete"), &headers);
    assert_eq!(body["photoRefs"], json!(["photos/1"]));
    (
        StatusCode::CONFLICT,
        Json(json!({"stopId": id, "status": "completed", "completedAt": 5})),
    )
}

async fn patch_order(
    State(seen): State<Seen>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> StatusCode {
    seen.record(format!("/orders/{id}"), &headers);
    StatusCode::SERVICE_UNAVAILABLE
}

async fn ingest(State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    seen.record("/locations/batch".into(), &headers);
    assert_eq!(body["samples"].as_array().map(Vec::len), Some(1));
    StatusCode::NO_CONTENT
}

async fn upload(State(seen): State<Seen>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    seen.record("/photos".into(), &headers);
    Json(json!({"remoteRef": format!("photos/{}", body.len())}))
}

async fn spawn_api(seen: Seen) -> String {
    let router = Router::new()
        .route("/health", get(|| async { StatusCode::OK }))
        .route("/stops/{id}", get(get_stop))
        .route("/stops/{id}/complete", post(complete_stop))
        .route("/orders/{id}", patch(patch_order))
        .route("/locations/batch", post(ingest))
        .route("/photos", post(upload))
        .with_state(seen);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base: &str) -> HttpRemote {
    HttpRemote::new(base, Some("secret".into()), Duration::from_secs(5)).unwrap()
}

#[cfg(test)]
mod http_tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_and_health() {
        let base = spawn_api(Seen::default()).await;
        let remote = client(&base);

        remote.health().await.unwrap();

        let stop = remote.fetch_stop("S1").await.unwrap();
        assert_eq!(stop.status, StopState::Completed);
        assert_eq!(stop.completed_at, Some(5));

        assert!(matches!(
            remote.fetch_stop("S2").await,
            Err(RemoteError::Permanent(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_carry_idempotency_key() {
        let seen = Seen::default();
        let base = spawn_api(seen.clone()).await;
        let remote = client(&base);

        let completion = DeliveryCompletion {
            stop_id: "S9".into(),
            completed_at: 10,
            recipient: None,
            notes: None,
        };
        match remote
            .complete_stop("op-1", &completion, &["photos/1".to_string()])
            .await
        {
            Err(RemoteError::Conflict { remote, .. }) => {
                assert_eq!(remote.unwrap()["stopId"], "S9");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let update = OrderUpdate {
            order_id: "O1".into(),
            captured_at: 10,
            changes: serde_json::Map::new(),
        };
        let result = remote.update_order("op-2", &update).await;
        assert!(matches!(result, Err(RemoteError::Transient(_))));

        let sample = SamplePayload {
            id: "loc-1".into(),
            latitude: 52.5,
            longitude: 13.4,
            accuracy: 3.0,
            captured_at: 10,
        };
        remote
            .ingest_locations("locations:loc-1:loc-1:1", &[sample])
            .await
            .unwrap();

        let photo = CapturedPhoto::new("ph-1", "op-1", vec![1, 2, 3], "image/jpeg", 10);
        assert_eq!(remote.upload_photo(&photo).await.unwrap(), "photos/3");

        let bearer = Some("Bearer secret".to_string());
        assert_eq!(
            seen.all(),
            vec![
                ("/stops/S9/complete".to_string(), Some("op-1".to_string()), bearer.clone()),
                ("/orders/O1".to_string(), Some("op-2".to_string()), bearer.clone()),
                (
                    "/locations/batch".to_string(),
                    Some("locations:loc-1:loc-1:1".to_string()),
                    bearer.clone()
                ),
                ("/photos".to_string(), Some("ph-1".to_string()), bearer),
            ]
        );
    }

    #[tokio::test]
    async fn test_unreachable_api_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = client(&format!("http://{addr}"));
        assert!(remote.health().await.unwrap_err().is_transient());
    }
}
