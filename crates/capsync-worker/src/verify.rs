//! Demo-mode auto-verification of freshly uploaded captures.

use std::sync::Arc;

use capsync_core::{CaptureEvent, EventBus};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::context::{CaptureModerator, TransitionRequest};

pub const VERIFIED_STATE: &str = "verified";

/// Moves every uploaded capture to `verified` and announces it.
///
/// Failures are logged and swallowed: verification is a demo convenience and
/// never affects the upload that triggered it.
pub struct AutoVerifier {
    moderator: Arc<dyn CaptureModerator>,
    events: EventBus,
    admin_token: String,
}

impl AutoVerifier {
    pub fn new(
        moderator: Arc<dyn CaptureModerator>,
        events: EventBus,
        admin_token: impl Into<String>,
    ) -> Self {
        Self {
            moderator,
            events,
            admin_token: admin_token.into(),
        }
    }

    /// Subscribe to the event bus and react to `uploaded` events until the
    /// returned task is aborted.
    ///
    /// The subscription is taken before this returns, so no event published
    /// afterwards is missed.
    pub fn spawn(self) -> JoinHandle<()> {
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            tracing::info!("Auto-verifier started");
            loop {
                match rx.recv().await {
                    Ok(CaptureEvent::Uploaded { capture_id }) => {
                        self.verify(&capture_id).await;
                    }
                    Ok(CaptureEvent::Verified { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Auto-verifier lagged behind capture events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("Auto-verifier stopped");
        })
    }

    /// Transition one capture; returns whether it was verified.
    pub async fn verify(&self, capture_id: &str) -> bool {
        let request = TransitionRequest {
            target_state: VERIFIED_STATE.to_string(),
            reason_code: None,
            details: json!({ "demo_auto_verify": true }),
        };

        match self
            .moderator
            .transition_capture(capture_id, &self.admin_token, &request)
            .await
        {
            Ok(()) => {
                tracing::info!(capture_id, "Capture auto-verified");
                self.events.publish(CaptureEvent::Verified {
                    capture_id: capture_id.to_string(),
                });
                true
            }
            Err(e) => {
                tracing::warn!(capture_id, error = %e, "Auto-verification failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use capsync_core::TransferError;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingModerator {
        calls: Mutex<Vec<(String, String, serde_json::Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl CaptureModerator for RecordingModerator {
        async fn transition_capture(
            &self,
            capture_id: &str,
            admin_token: &str,
            request: &TransitionRequest,
        ) -> Result<(), TransferError> {
            self.calls.lock().unwrap().push((
                capture_id.to_string(),
                admin_token.to_string(),
                request.details.clone(),
            ));
            if self.fail {
                Err(TransferError::http_status(403))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn uploaded_event_leads_to_verified_event() {
        let events = EventBus::new();
        let moderator = Arc::new(RecordingModerator::default());
        let mut rx = events.subscribe();
        let _task = AutoVerifier::new(moderator.clone(), events.clone(), "admin-secret").spawn();

        events.publish(CaptureEvent::Uploaded {
            capture_id: "cap_1".into(),
        });

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(event);
        }
        assert_eq!(
            seen[1],
            CaptureEvent::Verified {
                capture_id: "cap_1".into()
            }
        );

        let calls = moderator.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "cap_1");
        assert_eq!(calls[0].1, "admin-secret");
        assert_eq!(calls[0].2, json!({ "demo_auto_verify": true }));
    }

    #[tokio::test]
    async fn failed_transition_is_swallowed() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let moderator = Arc::new(RecordingModerator {
            fail: true,
            ..Default::default()
        });
        let verifier = AutoVerifier::new(moderator, events.clone(), "t");

        assert!(!verifier.verify("cap_2").await);
        assert!(rx.try_recv().is_err());
    }
}
