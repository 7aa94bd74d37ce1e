//! HTTP client for the remote delivery API.

use std::time::Duration;

use async_trait::async_trait;
use fieldsync_engine::{
    payload::{DeliveryCompletion, OrderUpdate, RouteAction, RouteStatus, SamplePayload},
    CapturedPhoto, RemoteOrder, RemoteRoute, RemoteStop, Timestamp,
};
use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::{RemoteApi, RemoteError};

const IDEMPOTENCY_KEY: &str = "Idempotency-Key";

/// Body of a stop completion.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteStopRequest<'a> {
    completed_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
    photo_refs: &'a [String],
}

#[derive(Debug, Serialize)]
struct LocationBatchRequest<'a> {
    samples: &'a [SamplePayload],
}

#[derive(Debug, Serialize)]
struct RouteTransitionRequest {
    at: Timestamp,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderPatchRequest<'a> {
    captured_at: Timestamp,
    changes: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadResponse {
    remote_ref: String,
}

/// [`RemoteApi`] over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(
        base_url: &str,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| RemoteError::Permanent(format!("invalid API base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Permanent(format!(
                "API base URL cannot hold a path: {base_url}"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Permanent(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// Base URL with percent-encoded path segments appended.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Permanent(format!("bad base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, RemoteError> {
        let builder = self.client.request(method, self.endpoint(segments)?);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, RemoteError> {
        let response = self.request(Method::GET, segments)?.send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<(), RemoteError> {
        check(builder.send().await?).await?;
        Ok(())
    }
}

/// Pass successful responses through, classify the rest.
async fn check(response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify(status, &body))
}

/// Map an error status onto the retry taxonomy.
pub(crate) fn classify(status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::CONFLICT => RemoteError::Conflict {
            message: format!("remote rejected with {status}"),
            remote: serde_json::from_str(body).ok(),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            RemoteError::Transient(format!("remote answered {status}"))
        }
        s if s.is_server_error() => RemoteError::Transient(format!("remote answered {status}")),
        s => RemoteError::Permanent(format!("remote answered {s}: {}", truncate(body))),
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() || err.is_builder() {
            RemoteError::Permanent(err.to_string())
        } else {
            RemoteError::Transient(err.to_string())
        }
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn health(&self) -> Result<(), RemoteError> {
        self.send(self.request(Method::GET, &["health"])?).await
    }

    async fn fetch_stop(&self, stop_id: &str) -> Result<RemoteStop, RemoteError> {
        self.fetch(&["stops", stop_id]).await
    }

    async fn fetch_route(&self, route_id: &str) -> Result<RemoteRoute, RemoteError> {
        self.fetch(&["routes", route_id]).await
    }

    async fn fetch_order(&self, order_id: &str) -> Result<RemoteOrder, RemoteError> {
        self.fetch(&["orders", order_id]).await
    }

    async fn complete_stop(
        &self,
        idempotency_key: &str,
        completion: &DeliveryCompletion,
        photo_refs: &[String],
    ) -> Result<(), RemoteError> {
        let body = CompleteStopRequest {
            completed_at: completion.completed_at,
            recipient: completion.recipient.as_deref(),
            notes: completion.notes.as_deref(),
            photo_refs,
        };
        let builder = self
            .request(Method::POST, &["stops", completion.stop_id.as_str(), "complete"])?
            .header(IDEMPOTENCY_KEY, idempotency_key)
            .json(&body);
        self.send(builder).await
    }

    async fn ingest_locations(
        &self,
        idempotency_key: &str,
        samples: &[SamplePayload],
    ) -> Result<(), RemoteError> {
        let builder = self
            .request(Method::POST, &["locations", "batch"])?
            .header(IDEMPOTENCY_KEY, idempotency_key)
            .json(&LocationBatchRequest { samples });
        self.send(builder).await
    }

    async fn update_route(
        &self,
        idempotency_key: &str,
        status: &RouteStatus,
    ) -> Result<(), RemoteError> {
        let action = match status.action {
            RouteAction::Start => "start",
            RouteAction::Complete => "complete",
        };
        let builder = self
            .request(Method::POST, &["routes", status.route_id.as_str(), action])?
            .header(IDEMPOTENCY_KEY, idempotency_key)
            .json(&RouteTransitionRequest { at: status.at });
        self.send(builder).await
    }

    async fn update_order(
        &self,
        idempotency_key: &str,
        update: &OrderUpdate,
    ) -> Result<(), RemoteError> {
        let body = OrderPatchRequest {
            captured_at: update.captured_at,
            changes: &update.changes,
        };
        let builder = self
            .request(Method::PATCH, &["orders", update.order_id.as_str()])?
            .header(IDEMPOTENCY_KEY, idempotency_key)
            .json(&body);
        self.send(builder).await
    }

    async fn upload_photo(&self, photo: &CapturedPhoto) -> Result<String, RemoteError> {
        let response = self
            .request(Method::POST, &["photos"])?
            .header(IDEMPOTENCY_KEY, &photo.id)
            .header(CONTENT_TYPE, &photo.mime_type)
            .header("X-Operation-Id", &photo.operation_id)
            .header("X-Captured-At", photo.captured_at.to_string())
            .body(photo.blob.clone())
            .send()
            .await?;

        let uploaded: UploadResponse = check(response).await?.json().await?;
        Ok(uploaded.remote_ref)
    }
}
