//! Pipeline assembly and execution.

use std::sync::Arc;
use std::time::Instant;

use fileshare_core::{HybridEncryptionService, ProcessingContext};
use fileshare_db::MetadataRepository;
use fileshare_storage::ObjectStorage;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::filter::{Filter, FilterPhase};
use crate::filters::{
    CleanupFilter, DecryptValidationFilter, EncryptionFilter, HashFilter, MetadataFilter,
    MetadataPersistenceFilter, ObjectStorageUploadFilter,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Filters '{first}' and '{second}' share order key {order}")]
    DuplicateOrder {
        order: u32,
        first: &'static str,
        second: &'static str,
    },

    #[error("Pipeline has no filters")]
    Empty,
}

/// Collects filters and sorts them once by order key.
#[derive(Default)]
pub struct PipelineBuilder {
    filters: Vec<Arc<dyn Filter>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter<F: Filter + 'static>(self, filter: F) -> Self {
        self.shared(Arc::new(filter))
    }

    pub fn shared(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(mut self) -> Result<Pipeline, PipelineError> {
        if self.filters.is_empty() {
            return Err(PipelineError::Empty);
        }

        self.filters.sort_by_key(|f| f.order());
        for pair in self.filters.windows(2) {
            if pair[0].order() == pair[1].order() {
                return Err(PipelineError::DuplicateOrder {
                    order: pair[0].order(),
                    first: pair[0].name(),
                    second: pair[1].name(),
                });
            }
        }

        Ok(Pipeline {
            filters: self.filters,
        })
    }
}

/// Dependencies of the standard stage list.
#[derive(Clone)]
pub struct PipelineServices {
    pub encryption: HybridEncryptionService,
    pub storage: Arc<dyn ObjectStorage>,
    pub repository: Arc<dyn MetadataRepository>,
    pub original_bucket: String,
    pub encrypted_bucket: String,
}

/// The standard stage list: hash, metadata, encrypt, decrypt-validate,
/// upload, then the persist and cleanup finalizers.
pub fn default_pipeline(services: PipelineServices) -> Result<Pipeline, PipelineError> {
    PipelineBuilder::new()
        .filter(HashFilter::new())
        .filter(MetadataFilter::new())
        .filter(EncryptionFilter::new(services.encryption.clone()))
        .filter(DecryptValidationFilter::new(services.encryption))
        .filter(ObjectStorageUploadFilter::new(
            services.storage,
            services.original_bucket,
            services.encrypted_bucket,
        ))
        .filter(MetadataPersistenceFilter::new(services.repository))
        .filter(CleanupFilter::new())
        .build()
}

pub struct Pipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl Pipeline {
    /// Filter names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    /// Run every stage over `ctx` and return it.
    ///
    /// The outcome is read from the returned context: `has_errors()`,
    /// `errors()` and `interrupted`.
    pub async fn execute(
        &self,
        mut ctx: ProcessingContext,
        cancel: &CancellationToken,
    ) -> ProcessingContext {
        let start = Instant::now();
        tracing::info!(
            file_id = %ctx.file_id,
            correlation_id = %ctx.correlation_id,
            file_name = %ctx.file_name,
            stages = self.filters.len(),
            "Pipeline started"
        );

        let content = self
            .filters
            .iter()
            .filter(|f| f.phase() == FilterPhase::Content);
        for filter in content {
            if ctx.has_errors() {
                tracing::debug!(
                    file_id = %ctx.file_id,
                    skipped_from = filter.name(),
                    "Skipping remaining content stages after error"
                );
                break;
            }
            if cancel.is_cancelled() {
                ctx.interrupted = true;
                break;
            }
            ctx = run_stage(filter.as_ref(), ctx, cancel).await;
            if ctx.interrupted {
                break;
            }
        }

        if ctx.interrupted {
            tracing::warn!(
                file_id = %ctx.file_id,
                processed = ?ctx.processed_filters(),
                "Pipeline interrupted by shutdown; finalizers skipped"
            );
        } else {
            let finalizers = self
                .filters
                .iter()
                .filter(|f| f.phase() == FilterPhase::Finalizer);
            for filter in finalizers {
                ctx = run_stage(filter.as_ref(), ctx, cancel).await;
            }
        }

        ctx.complete();
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        if ctx.has_errors() {
            tracing::warn!(
                file_id = %ctx.file_id,
                correlation_id = %ctx.correlation_id,
                duration_ms = %duration_ms,
                errors = ?ctx.errors(),
                processed = ?ctx.processed_filters(),
                "Pipeline finished with errors"
            );
        } else {
            tracing::info!(
                file_id = %ctx.file_id,
                correlation_id = %ctx.correlation_id,
                duration_ms = %duration_ms,
                interrupted = ctx.interrupted,
                processed = ?ctx.processed_filters(),
                "Pipeline finished"
            );
        }

        ctx
    }
}

async fn run_stage(
    filter: &dyn Filter,
    ctx: ProcessingContext,
    cancel: &CancellationToken,
) -> ProcessingContext {
    let start = Instant::now();
    tracing::debug!(file_id = %ctx.file_id, filter = filter.name(), "Running stage");

    match filter.process(ctx, cancel).await {
        Ok(mut ctx) => {
            ctx.record_processed(filter.name());
            tracing::debug!(
                file_id = %ctx.file_id,
                filter = filter.name(),
                duration_ms = %(start.elapsed().as_secs_f64() * 1000.0),
                "Stage completed"
            );
            ctx
        }
        Err(fault) => {
            let interrupted = fault.is_cancelled()
                || (cancel.is_cancelled() && filter.phase() == FilterPhase::Content);
            let error = fault.error;
            let mut ctx = *fault.context;

            if interrupted {
                ctx.interrupted = true;
                tracing::warn!(
                    file_id = %ctx.file_id,
                    filter = filter.name(),
                    "Stage stopped by shutdown request"
                );
            } else {
                tracing::error!(
                    file_id = %ctx.file_id,
                    filter = filter.name(),
                    error = %error,
                    "Stage faulted"
                );
                ctx.add_error(format!("Filter '{}' failed: {:#}", filter.name(), error));
            }
            ctx
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{StageFault, StageResult};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct Step {
        name: &'static str,
        order: u32,
        phase: FilterPhase,
        outcome: Outcome,
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Pass,
        RecordError,
        Fault,
        CancelToken,
    }

    #[async_trait]
    impl Filter for Step {
        fn name(&self) -> &'static str {
            self.name
        }

        fn order(&self) -> u32 {
            self.order
        }

        fn phase(&self) -> FilterPhase {
            self.phase
        }

        async fn process(&self, mut ctx: ProcessingContext, cancel: &CancellationToken) -> StageResult {
            match self.outcome {
                Outcome::Pass => Ok(ctx),
                Outcome::RecordError => {
                    ctx.add_error(format!("{} went wrong", self.name));
                    Ok(ctx)
                }
                Outcome::Fault => Err(StageFault::new(ctx, anyhow::anyhow!("boom"))),
                Outcome::CancelToken => {
                    cancel.cancel();
                    Ok(ctx)
                }
            }
        }
    }

    fn step(name: &'static str, order: u32, outcome: Outcome) -> Step {
        Step {
            name,
            order,
            phase: FilterPhase::Content,
            outcome,
        }
    }

    fn finalizer(name: &'static str, order: u32) -> Step {
        Step {
            name,
            order,
            phase: FilterPhase::Finalizer,
            outcome: Outcome::Pass,
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(Uuid::new_v4(), Uuid::new_v4(), "a.txt", "/tmp/a.txt")
    }

    #[test]
    fn test_build_sorts_by_order() {
        let pipeline = PipelineBuilder::new()
            .filter(step("c", 30, Outcome::Pass))
            .filter(step("a", 10, Outcome::Pass))
            .filter(step("b", 20, Outcome::Pass))
            .build()
            .unwrap();
        assert_eq!(pipeline.stage_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_build_rejects_duplicate_order() {
        let err = PipelineBuilder::new()
            .filter(step("a", 10, Outcome::Pass))
            .filter(step("b", 10, Outcome::Pass))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, PipelineError::DuplicateOrder { order: 10, .. }));
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(matches!(
            PipelineBuilder::new().build().err(),
            Some(PipelineError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_recorded_error_stops_content_but_runs_finalizers() {
        let pipeline = PipelineBuilder::new()
            .filter(step("first", 10, Outcome::RecordError))
            .filter(step("second", 20, Outcome::Pass))
            .filter(finalizer("persist", 900))
            .filter(finalizer("cleanup", 1000))
            .build()
            .unwrap();

        let ctx = pipeline.execute(ctx(), &CancellationToken::new()).await;

        assert!(ctx.has_errors());
        assert_eq!(ctx.processed_filters(), ["first", "persist", "cleanup"]);
        assert!(ctx.completed_at().is_some());
    }

    #[tokio::test]
    async fn test_fault_is_recorded_with_filter_name() {
        let pipeline = PipelineBuilder::new()
            .filter(step("explode", 10, Outcome::Fault))
            .filter(step("after", 20, Outcome::Pass))
            .filter(finalizer("cleanup", 1000))
            .build()
            .unwrap();

        let ctx = pipeline.execute(ctx(), &CancellationToken::new()).await;

        assert_eq!(ctx.errors(), ["Filter 'explode' failed: boom"]);
        assert_eq!(ctx.processed_filters(), ["cleanup"]);
    }

    #[tokio::test]
    async fn test_cancellation_skips_finalizers() {
        let pipeline = PipelineBuilder::new()
            .filter(step("first", 10, Outcome::CancelToken))
            .filter(step("second", 20, Outcome::Pass))
            .filter(finalizer("cleanup", 1000))
            .build()
            .unwrap();

        let ctx = pipeline.execute(ctx(), &CancellationToken::new()).await;

        assert!(ctx.interrupted);
        assert!(!ctx.has_errors());
        assert_eq!(ctx.processed_filters(), ["first"]);
        assert!(ctx.completed_at().is_some());
    }

    #[tokio::test]
    async fn test_finalizer_fault_does_not_stop_other_finalizers() {
        let pipeline = PipelineBuilder::new()
            .filter(step("content", 10, Outcome::Pass))
            .filter(Step {
                name: "persist",
                order: 900,
                phase: FilterPhase::Finalizer,
                outcome: Outcome::Fault,
            })
            .filter(finalizer("cleanup", 1000))
            .build()
            .unwrap();

        let ctx = pipeline.execute(ctx(), &CancellationToken::new()).await;

        assert_eq!(ctx.errors(), ["Filter 'persist' failed: boom"]);
        assert_eq!(ctx.processed_filters(), ["content", "cleanup"]);
    }
}
