// ABOUTME: Pipeline orchestration using the type state pattern.
// ABOUTME: Exports run states, the run record, retry helpers and the orchestrator.

mod error;
mod lock;
mod orchestrator;
mod record;
mod retry;
mod run;
mod state;

pub use error::{FailureKind, StageError};
pub use lock::{LockInfo, TargetLock};
pub use orchestrator::{Components, Pipeline, PipelineSettings};
pub use record::{Outcome, PipelineRun, Stage, StageResult, StageStatus};
pub use retry::{Classify, Retried, with_retry};
pub use run::{Run, StageFailure, TransitionResult, Workload};
pub use state::{Built, Converged, Deployed, Provisioned, Published, Triggered, Verified};
