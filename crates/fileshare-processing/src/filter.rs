//! Stage contract for the processing pipeline.

use async_trait::async_trait;
use fileshare_core::ProcessingContext;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Which part of a run a stage belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// Runs only while the context has no errors.
    Content,
    /// Runs after the content stages, even when they failed.
    Finalizer,
}

/// Marker error a stage returns when it stopped because of a shutdown request.
#[derive(Debug, Error)]
#[error("Processing cancelled")]
pub struct Cancelled;

/// A stage fault: an unexpected failure that escaped the stage.
///
/// The context travels back with the error so the executor keeps ownership
/// of the run after the fault.
#[derive(Debug)]
pub struct StageFault {
    pub context: Box<ProcessingContext>,
    pub error: anyhow::Error,
}

impl StageFault {
    pub fn new(context: ProcessingContext, error: impl Into<anyhow::Error>) -> Self {
        Self {
            context: Box::new(context),
            error: error.into(),
        }
    }

    pub fn cancelled(context: ProcessingContext) -> Self {
        Self::new(context, Cancelled)
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is::<Cancelled>()
    }
}

pub type StageResult = Result<ProcessingContext, StageFault>;

/// One pipeline stage.
///
/// Expected failures (missing file, upload error) are recorded on the
/// context with [`ProcessingContext::add_error`] and the context is returned
/// normally. `Err` is reserved for faults and cancellation.
#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Sort key; stages run in ascending order.
    fn order(&self) -> u32;

    fn phase(&self) -> FilterPhase {
        FilterPhase::Content
    }

    async fn process(&self, ctx: ProcessingContext, cancel: &CancellationToken) -> StageResult;
}
