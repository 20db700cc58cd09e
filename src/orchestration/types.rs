//! # Collaborator Interfaces
//!
//! Capability traits for everything the collector drives but does not own:
//! per-source workers, the inventory store and the expected-coverage model.
//! The orchestration core depends only on these traits, never on a concrete
//! source, database or object store.

use super::errors::WorkerError;
use crate::error::Result;
use crate::models::{
    ArtifactDescriptor, ExpectedCoverageEntry, InventorySnapshot, SourceId, TaskScope,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fetches one scope from one external source.
///
/// Implementations must stop promptly once `cancel` fires and must not retry
/// internally: retry policy belongs to the execution supervisor, which also
/// enforces `deadline` with a hard timeout.
#[async_trait]
pub trait Worker: Send + Sync {
    fn source_id(&self) -> &SourceId;

    async fn execute(
        &self,
        scope: &TaskScope,
        deadline: Instant,
        cancel: CancellationToken,
    ) -> std::result::Result<ArtifactDescriptor, WorkerError>;
}

/// Durable record of what has been collected.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Failures should map to [`CollectorError::InventoryUnavailable`](crate::error::CollectorError::InventoryUnavailable)
    async fn snapshot(&self) -> Result<InventorySnapshot>;

    /// Record a collection. Repeating an upsert for the same
    /// `(source_id, scope)` must not create a duplicate entry.
    async fn upsert(
        &self,
        source_id: &SourceId,
        scope: &TaskScope,
        collected_at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Source of truth for what should exist in the inventory.
#[async_trait]
pub trait CoverageProvider: Send + Sync {
    /// An empty list means nothing is expected. An unreachable provider should
    /// return [`CollectorError::CoverageUnavailable`](crate::error::CollectorError::CoverageUnavailable).
    async fn coverage(&self) -> Result<Vec<ExpectedCoverageEntry>>;
}
