//! HTTP client for the cow detection endpoint.
//!
//! Submits one JPEG payload per request as a multipart form (field name
//! `image`) and parses the JSON count response. The pipeline talks to the
//! [`DetectClient`] trait so tests can script responses without a server.

use crate::config::DetectorConfig;
use crate::encoder::ImagePayload;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Counts returned by the detection endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DetectionResult {
    /// Total cows detected in the frame
    #[serde(rename = "total_cows")]
    pub total: u32,

    /// Cows detected standing
    #[serde(rename = "standing_cows")]
    pub standing: u32,

    /// Cows detected laying
    #[serde(rename = "laying_cows")]
    pub laying: u32,
}

/// Errors that can occur while submitting a payload.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("Request failed: {0}")]
    Network(#[source] reqwest::Error),

    #[error("Detection endpoint returned status {status}")]
    Transport { status: StatusCode },

    #[error("Failed to decode detection response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// Statistics for the detection client.
#[derive(Debug, Default, Clone)]
pub struct ClientStats {
    pub submissions_sent: u64,
    pub submissions_accepted: u64,
    pub submissions_failed: u64,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
}

/// Asynchronous submission of image payloads for detection.
#[async_trait]
pub trait DetectClient: Send + Sync {
    /// Submit one payload and resolve with the detected counts.
    async fn submit(&self, payload: ImagePayload) -> Result<DetectionResult, DetectError>;
}

/// reqwest-backed client for the detection endpoint.
pub struct HttpDetectClient {
    endpoint_url: String,
    http: reqwest::Client,
    stats: RwLock<ClientStats>,
}

impl HttpDetectClient {
    /// Create a new client for the configured endpoint.
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(DetectError::Network)?;

        Ok(Self {
            endpoint_url: config.endpoint_url.clone(),
            http,
            stats: RwLock::new(ClientStats::default()),
        })
    }

    /// Get current submission statistics.
    pub fn stats(&self) -> ClientStats {
        self.stats.read().clone()
    }

    fn record_success(&self, latency_ms: u64) {
        let mut stats = self.stats.write();
        stats.submissions_accepted += 1;
        stats.total_latency_ms += latency_ms;
        stats.avg_latency_ms = stats.total_latency_ms as f64 / stats.submissions_accepted as f64;
    }

    fn record_failure(&self) {
        self.stats.write().submissions_failed += 1;
    }
}

#[async_trait]
impl DetectClient for HttpDetectClient {
    async fn submit(&self, payload: ImagePayload) -> Result<DetectionResult, DetectError> {
        let started = Instant::now();
        let size_bytes = payload.data.len();
        self.stats.write().submissions_sent += 1;

        let part = Part::bytes(payload.data.to_vec())
            .file_name(payload.file_name)
            .mime_str(payload.content_type)
            .map_err(DetectError::Network)?;
        let form = Form::new().part("image", part);

        debug!(
            endpoint = %self.endpoint_url,
            size_bytes = size_bytes,
            "Submitting frame for detection"
        );

        let response = self
            .http
            .post(&self.endpoint_url)
            .header(ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                self.record_failure();
                DetectError::Network(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            self.record_failure();
            warn!(endpoint = %self.endpoint_url, status = %status, "Detection request rejected");
            return Err(DetectError::Transport { status });
        }

        let result = response.json::<DetectionResult>().await.map_err(|e| {
            self.record_failure();
            DetectError::Decode(e)
        })?;

        let latency_ms = started.elapsed().as_millis() as u64;
        self.record_success(latency_ms);

        debug!(
            total = result.total,
            standing = result.standing,
            laying = result.laying,
            latency_ms = latency_ms,
            "Detection result received"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Multipart;
    use axum::http::StatusCode as AxumStatus;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use bytes::Bytes;
    use serde_json::json;

    fn test_payload() -> ImagePayload {
        ImagePayload {
            data: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10]),
            content_type: "image/jpeg",
            file_name: "frame.jpg",
            width: 640,
            height: 480,
        }
    }

    fn test_client(endpoint_url: String) -> HttpDetectClient {
        HttpDetectClient::new(&DetectorConfig {
            endpoint_url,
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}/detect_cows", addr)
    }

    async fn detect_ok(mut multipart: Multipart) -> Response {
        while let Ok(Some(field)) = multipart.next_field().await {
            if field.name() == Some("image") && field.file_name() == Some("frame.jpg") {
                let data = field.bytes().await.unwrap_or_default();
                if !data.is_empty() {
                    return Json(json!({
                        "total_cows": 5,
                        "standing_cows": 3,
                        "laying_cows": 2
                    }))
                    .into_response();
                }
            }
        }
        AxumStatus::BAD_REQUEST.into_response()
    }

    #[tokio::test]
    async fn test_successful_submission() {
        let url = spawn_stub(Router::new().route("/detect_cows", post(detect_ok))).await;
        let client = test_client(url);

        let result = client.submit(test_payload()).await.unwrap();
        assert_eq!(
            result,
            DetectionResult {
                total: 5,
                standing: 3,
                laying: 2
            }
        );

        let stats = client.stats();
        assert_eq!(stats.submissions_sent, 1);
        assert_eq!(stats.submissions_accepted, 1);
        assert_eq!(stats.submissions_failed, 0);
    }

    #[tokio::test]
    async fn test_server_error_maps_to_transport() {
        let router = Router::new().route(
            "/detect_cows",
            post(|| async { (AxumStatus::INTERNAL_SERVER_ERROR, "detector crashed") }),
        );
        let url = spawn_stub(router).await;
        let client = test_client(url);

        let err = client.submit(test_payload()).await.unwrap_err();
        assert!(matches!(
            err,
            DetectError::Transport { status } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(client.stats().submissions_failed, 1);
    }

    #[tokio::test]
    async fn test_garbage_body_maps_to_decode() {
        let router = Router::new().route("/detect_cows", post(|| async { "not json at all" }));
        let url = spawn_stub(router).await;
        let client = test_client(url);

        let err = client.submit(test_payload()).await.unwrap_err();
        assert!(matches!(err, DetectError::Decode(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_maps_to_network() {
        // Nothing listens on port 1
        let client = test_client("http://127.0.0.1:1/detect_cows".to_string());

        let err = client.submit(test_payload()).await.unwrap_err();
        assert!(matches!(err, DetectError::Network(_)));
        assert_eq!(client.stats().submissions_failed, 1);
    }

    #[test]
    fn test_result_deserialization() {
        let result: DetectionResult =
            serde_json::from_str(r#"{"total_cows": 7, "standing_cows": 4, "laying_cows": 3}"#)
                .unwrap();
        assert_eq!(result.total, 7);
        assert_eq!(result.standing, 4);
        assert_eq!(result.laying, 3);
    }
}
