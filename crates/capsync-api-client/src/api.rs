//! Domain methods for the capture API client.
//!
//! Also wires [`ApiClient`] into the queue engine's collaborator traits.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use capsync_core::{CaptureRecord, TransferError};
use capsync_worker::{
    CaptureModerator, CreateCaptureRequest, IntentCreator, ProgressReporter, TransitionRequest,
    UploadRequest, Uploader,
};
use futures::stream::{self, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::Deserialize;

use crate::ApiClient;

pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Upload bodies are streamed in chunks of this size; progress is reported per chunk.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// `POST /v1/captures` and admin transition responses wrap the record.
#[derive(Debug, Deserialize)]
pub struct CaptureEnvelope {
    pub capture: CaptureRecord,
}

fn capture_path(capture_id: &str, suffix: &str) -> String {
    format!("/v1/captures/{}{}", urlencoding::encode(capture_id), suffix)
}

impl ApiClient {
    /// Create the server-side capture a photo will be attached to.
    #[tracing::instrument(skip(self, request), fields(node_id = %request.node_id))]
    pub async fn create_capture(
        &self,
        request: &CreateCaptureRequest,
    ) -> Result<CaptureRecord, TransferError> {
        let envelope: CaptureEnvelope = self.post_json("/v1/captures", request).await?;
        tracing::debug!(capture_id = %envelope.capture.id, "Capture created");
        Ok(envelope.capture)
    }

    /// Attach the image to a capture, streaming the body so `progress`
    /// receives `(bytes_sent, Some(total))` as chunks go out.
    #[tracing::instrument(skip(self, request, progress), fields(capture_id = %request.capture_id, size_bytes = request.payload.len()))]
    pub async fn upload_image(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<CaptureRecord, TransferError> {
        let total = request.payload.len() as u64;
        let body = progress_body(request.payload, progress);

        let part = Part::stream_with_length(body, total)
            .file_name(request.file_name)
            .mime_str(&request.mime_type)
            .map_err(|e| TransferError::InvalidRequest(format!("Invalid content type: {}", e)))?;
        let form = Form::new().part("file", part);

        self.post_multipart(&capture_path(&request.capture_id, "/image"), form)
            .await
    }

    /// Move a capture to another moderation state.
    pub async fn transition_capture(
        &self,
        capture_id: &str,
        admin_token: &str,
        request: &TransitionRequest,
    ) -> Result<CaptureRecord, TransferError> {
        let url = self.build_url(&format!(
            "/v1/admin/captures/{}/transition",
            urlencoding::encode(capture_id)
        ));
        let builder = self
            .client()
            .post(url)
            .header(ADMIN_TOKEN_HEADER, admin_token)
            .json(request);
        let envelope: CaptureEnvelope = self.send(builder).await?;
        Ok(envelope.capture)
    }
}

/// Chunked request body that reports cumulative bytes as each chunk is pulled.
fn progress_body(payload: Bytes, progress: ProgressReporter) -> Body {
    let total = payload.len() as u64;
    let chunks: Vec<(u64, Bytes)> = (0..payload.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| {
            let end = (start + UPLOAD_CHUNK_SIZE).min(payload.len());
            (end as u64, payload.slice(start..end))
        })
        .collect();

    let stream = stream::iter(chunks).map(move |(sent, chunk)| {
        progress(sent, Some(total));
        Ok::<Bytes, io::Error>(chunk)
    });
    Body::wrap_stream(stream)
}

#[async_trait]
impl Uploader for ApiClient {
    async fn upload(
        &self,
        request: UploadRequest,
        progress: ProgressReporter,
    ) -> Result<CaptureRecord, TransferError> {
        self.upload_image(request, progress).await
    }
}

#[async_trait]
impl IntentCreator for ApiClient {
    async fn create_capture(
        &self,
        request: &CreateCaptureRequest,
    ) -> Result<CaptureRecord, TransferError> {
        ApiClient::create_capture(self, request).await
    }
}

#[async_trait]
impl CaptureModerator for ApiClient {
    async fn transition_capture(
        &self,
        capture_id: &str,
        admin_token: &str,
        request: &TransitionRequest,
    ) -> Result<(), TransferError> {
        ApiClient::transition_capture(self, capture_id, admin_token, request)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn client(url: &str) -> ApiClient {
        ApiClient::new(url, Duration::from_secs(5)).unwrap()
    }

    fn recording_progress() -> (ProgressReporter, Arc<Mutex<Vec<(u64, Option<u64>)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter: ProgressReporter =
            Arc::new(move |loaded, total| sink.lock().unwrap().push((loaded, total)));
        (reporter, seen)
    }

    #[tokio::test]
    async fn test_create_capture_unwraps_envelope() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/captures")
            .match_body(Matcher::Json(json!({
                "node_id": "node_7",
                "checkin_token": "tok_123"
            })))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"capture":{"id":"cap_42","node_id":"node_7","state":"pending_upload"}}"#)
            .create_async()
            .await;

        let record = client(&server.url())
            .create_capture(&CreateCaptureRequest {
                node_id: "node_7".into(),
                checkin_token: "tok_123".into(),
            })
            .await
            .unwrap();

        assert_eq!(record.id, "cap_42");
        assert_eq!(record.state.as_deref(), Some("pending_upload"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_envelope_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/captures")
            .with_status(403)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"code":"checkin_expired","message":"Check-in expired","details":{}}}"#)
            .create_async()
            .await;

        let err = client(&server.url())
            .create_capture(&CreateCaptureRequest {
                node_id: "n".into(),
                checkin_token: "t".into(),
            })
            .await
            .unwrap_err();

        assert_eq!(
            err,
            TransferError::Http {
                status: 403,
                code: Some("checkin_expired".into()),
                message: "Check-in expired".into(),
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_plain_error_body_falls_back_to_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/captures/cap_1/image")
            .with_status(502)
            .with_body("<html>bad gateway</html>")
            .create_async()
            .await;

        let (progress, _) = recording_progress();
        let err = client(&server.url())
            .upload_image(
                UploadRequest {
                    capture_id: "cap_1".into(),
                    payload: Bytes::from_static(b"jpeg"),
                    file_name: "a.jpg".into(),
                    mime_type: "image/jpeg".into(),
                },
                progress,
            )
            .await
            .unwrap_err();

        assert_eq!(err, TransferError::http_status(502));
        assert_eq!(err.to_last_error().message, "HTTP 502");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_upload_streams_multipart_and_reports_progress() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/captures/cap_1/image")
            .match_header(
                "content-type",
                Matcher::Regex("^multipart/form-data; boundary=".into()),
            )
            .match_body(Matcher::Regex(
                r#"name="file"; filename="IMG_1.jpg""#.into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"cap_1","state":"pending_verification","visibility":"hidden"}"#)
            .create_async()
            .await;

        let payload = Bytes::from(vec![7u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let total = payload.len() as u64;
        let (progress, seen) = recording_progress();
        let record = client(&server.url())
            .upload_image(
                UploadRequest {
                    capture_id: "cap_1".into(),
                    payload,
                    file_name: "IMG_1.jpg".into(),
                    mime_type: "image/jpeg".into(),
                },
                progress,
            )
            .await
            .unwrap();

        assert_eq!(record.state.as_deref(), Some("pending_verification"));
        mock.assert_async().await;

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (UPLOAD_CHUNK_SIZE as u64, Some(total)),
                (UPLOAD_CHUNK_SIZE as u64 * 2, Some(total)),
                (total, Some(total)),
            ]
        );
    }

    #[tokio::test]
    async fn test_unparsable_mime_type_is_terminal() {
        let server = mockito::Server::new_async().await;
        let (progress, _) = recording_progress();
        let err = client(&server.url())
            .upload_image(
                UploadRequest {
                    capture_id: "cap_1".into(),
                    payload: Bytes::from_static(b"jpeg"),
                    file_name: "a.jpg".into(),
                    mime_type: "not a mime type".into(),
                },
                progress,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::InvalidRequest(_)));
        assert!(!err.is_retryable());
        assert_eq!(err.code(), Some("invalid_request"));
    }

    #[tokio::test]
    async fn test_success_with_undecodable_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/captures")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let err = client(&server.url())
            .create_capture(&CreateCaptureRequest {
                node_id: "n".into(),
                checkin_token: "t".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::MalformedResponse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_retryable_transport_error() {
        let err = client("http://127.0.0.1:9")
            .create_capture(&CreateCaptureRequest {
                node_id: "n".into(),
                checkin_token: "t".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Transport(_)));
        assert!(err.is_retryable());
        assert_eq!(err.code(), Some("network_error"));
    }

    #[tokio::test]
    async fn test_transition_sends_admin_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/admin/captures/cap_1/transition")
            .match_header("x-admin-token", "secret")
            .match_body(Matcher::Json(json!({
                "target_state": "verified",
                "details": {"demo_auto_verify": true}
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"capture":{"id":"cap_1","state":"verified"}}"#)
            .create_async()
            .await;

        let moderator: Arc<dyn CaptureModerator> = Arc::new(client(&server.url()));
        moderator
            .transition_capture(
                "cap_1",
                "secret",
                &TransitionRequest {
                    target_state: "verified".into(),
                    reason_code: None,
                    details: json!({"demo_auto_verify": true}),
                },
            )
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_capture_ids_are_path_encoded() {
        assert_eq!(capture_path("cap 1/x", "/image"), "/v1/captures/cap%201%2Fx/image");
    }
}
