pub mod context;
pub mod events;
pub mod metadata;

pub use context::ProcessingContext;
pub use events::{FileProcessedEvent, FileUploadedEvent, FILE_PROCESSED_EVENT_TYPE};
pub use metadata::{FileMetadataDocument, FileProcessingStatus};
