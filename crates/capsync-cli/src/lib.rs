//! Shared pieces of the `capsync` command-line host.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use capsync_api_client::ApiClient;
use capsync_core::{CaptureEvent, Config, EventBus, QueueSnapshot, UploadStatus};
use capsync_processing::calculations::mime_type_from_name;
use capsync_processing::SourceImage;
use capsync_storage::{create_draft_store, create_store, DraftStore};
use capsync_worker::{AutoVerifier, CaptureSubmitter, Connectivity, UploadQueue};
use tokio::sync::broadcast;

/// Initialize tracing for the CLI.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Read an image file; the declared type is guessed from its extension.
pub fn read_source_image(path: &Path) -> Result<SourceImage> {
    let data = std::fs::read(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("capture.jpg")
        .to_string();

    Ok(SourceImage {
        mime_type: mime_type_from_name(&file_name).map(str::to_string),
        data: Bytes::from(data),
        file_name,
    })
}

/// Where `prepare` writes its output: the explicit path, or next to the input.
pub fn output_path(input: &Path, explicit: Option<PathBuf>, file_name: &str) -> PathBuf {
    explicit.unwrap_or_else(|| {
        let mut candidate = input.with_file_name(file_name);
        if candidate == input {
            candidate = input.with_file_name(format!("prepared-{}", file_name));
        }
        candidate
    })
}

/// Nothing left for the scheduler: every intent is uploaded or parked.
pub fn is_drained(snapshot: &QueueSnapshot) -> bool {
    snapshot.count_with_status(UploadStatus::Pending) == 0
        && snapshot.count_with_status(UploadStatus::Uploading) == 0
}

/// Engine, collaborators and stores wired from configuration.
///
/// The queue starts offline so nothing is uploaded before the caller has
/// subscribed to events; [`Host::go_online`] lets the scheduler run.
pub struct Host {
    pub config: Config,
    pub client: Arc<ApiClient>,
    pub events: EventBus,
    pub queue: UploadQueue,
    pub drafts: Arc<dyn DraftStore>,
    pub connectivity: Connectivity,
}

impl Host {
    pub async fn start(config: Config) -> Result<Self> {
        let store = create_store(&config)
            .await
            .context("Failed to open intent store")?;
        let drafts = create_draft_store(&config)
            .await
            .context("Failed to open draft store")?;
        let client = Arc::new(ApiClient::from_config(&config)?);
        let events = EventBus::new();
        let connectivity = Connectivity::new(false);

        let queue = UploadQueue::start(
            store,
            client.clone(),
            events.clone(),
            config.queue.clone(),
            connectivity.subscribe(),
        )
        .await;

        Ok(Self {
            config,
            client,
            events,
            queue,
            drafts,
            connectivity,
        })
    }

    pub fn submitter(&self) -> CaptureSubmitter {
        CaptureSubmitter::new(self.drafts.clone(), self.client.clone(), self.queue.clone())
    }

    /// Auto-verifier for demo deployments, when enabled and an admin token is set.
    pub fn auto_verifier(&self) -> Option<AutoVerifier> {
        self.config
            .auto_verify_token()
            .map(|token| AutoVerifier::new(self.client.clone(), self.events.clone(), token))
    }

    pub fn go_online(&self) {
        self.connectivity.set_online(true);
    }

    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

/// Tally of capture events seen while the queue runs.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EventTally {
    pub uploaded: usize,
    pub verified: usize,
}

impl EventTally {
    pub fn record(&mut self, event: &CaptureEvent) {
        match event {
            CaptureEvent::Uploaded { .. } => self.uploaded += 1,
            CaptureEvent::Verified { .. } => self.verified += 1,
        }
    }

    /// Drain whatever is already buffered without waiting.
    pub fn absorb(&mut self, rx: &mut broadcast::Receiver<CaptureEvent>) {
        while let Ok(event) = rx.try_recv() {
            self.record(&event);
        }
    }

    /// Wait until every upload has a matching verification, or `grace` runs out.
    pub async fn settle_verifications(
        &mut self,
        rx: &mut broadcast::Receiver<CaptureEvent>,
        grace: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        self.absorb(rx);
        while self.verified < self.uploaded {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(event)) => self.record(&event),
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return false,
            }
        }
        true
    }
}
