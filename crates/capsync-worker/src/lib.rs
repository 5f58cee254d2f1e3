//! Upload queue engine and capture workflow.
//!
//! - [`UploadQueue`]: durable, single-flight transfer of upload intents with
//!   exponential backoff, crash recovery and live progress.
//! - [`SnapshotBridge`]: fans queue snapshots out to listeners in revision order.
//! - [`AutoVerifier`]: demo-mode collaborator reacting to `uploaded` events.
//! - [`CaptureSubmitter`]: draft staging and submission into the queue.
//!
//! Network collaborators are injected through the traits in [`context`].

pub mod bridge;
pub mod connectivity;
pub mod context;
pub mod error;
pub mod queue;
pub mod retry;
pub mod submit;
pub mod verify;

pub use bridge::{SnapshotBridge, Subscription};
pub use connectivity::Connectivity;
pub use context::{
    CaptureModerator, CreateCaptureRequest, IntentCreator, ProgressReporter, TransitionRequest,
    UploadRequest, Uploader,
};
pub use error::{QueueError, SubmitError};
pub use queue::{EnqueueOutcome, UploadQueue};
pub use retry::{compute_backoff_delay_ms, plan_failure, FailurePlan};
pub use submit::{CaptureSubmitter, SubmittedCapture};
pub use verify::AutoVerifier;
