//! Metadata store for processed files.
//!
//! [`MetadataRepository`] is the seam the persistence stage writes through.
//! [`PgMetadataRepository`] backs it with the `file_metadata` table and
//! [`InMemoryMetadataRepository`] keeps documents in memory for tests and
//! local runs.

pub mod memory;
pub mod postgres;
pub mod repository;

pub use memory::InMemoryMetadataRepository;
pub use postgres::{setup_database, PgMetadataRepository};
pub use repository::{MetadataRepository, RepositoryError, RepositoryResult, UpsertOutcome};
