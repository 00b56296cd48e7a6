//! File processing pipeline
//!
//! A [`Pipeline`] runs an ordered list of [`Filter`] stages over a
//! [`ProcessingContext`](fileshare_core::ProcessingContext). Content stages
//! (hash, metadata, encrypt, decrypt-validate, upload) stop at the first
//! recorded error; finalizer stages (persist, cleanup) always run unless the
//! run was interrupted by shutdown.

pub mod filter;
pub mod filters;
pub mod pipeline;

pub use filter::{Cancelled, Filter, FilterPhase, StageFault, StageResult};
pub use filters::{
    CleanupFilter, DecryptValidationFilter, EncryptionFilter, HashFilter, MetadataFilter,
    MetadataPersistenceFilter, ObjectStorageUploadFilter,
};
pub use pipeline::{default_pipeline, Pipeline, PipelineBuilder, PipelineError, PipelineServices};
