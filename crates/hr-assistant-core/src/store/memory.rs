//! In-memory [`VectorIndex`] for tests and ephemeral use.
//!
//! Brute-force cosine similarity over every entry. Contents are lost when
//! the index is dropped.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{DocumentSummary, IndexEntry};

use super::{IndexBinding, IndexSnapshot, IndexStats, ScoredEntry, SnapshotCell, VectorIndex};

pub struct InMemoryIndex {
    cell: SnapshotCell,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            cell: SnapshotCell::new(IndexSnapshot::default()),
        }
    }

    /// An index pre-bound to a model, rejecting vectors from any other.
    pub fn with_binding(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            cell: SnapshotCell::new(IndexSnapshot::new(Some(IndexBinding {
                model_id: model_id.into(),
                dims,
            }))),
        }
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let _guard = self.cell.lock_writer().await;
        let mut next = self.cell.draft();
        next.apply_upsert(entries)?;
        self.cell.publish(next);
        Ok(())
    }

    async fn replace_document(
        &self,
        document: DocumentSummary,
        entries: Vec<IndexEntry>,
    ) -> Result<()> {
        let _guard = self.cell.lock_writer().await;
        let mut next = self.cell.draft();
        next.apply_replace(document, entries)?;
        self.cell.publish(next);
        Ok(())
    }

    async fn query(&self, vector: &[f32], model_id: &str, k: usize) -> Result<Vec<ScoredEntry>> {
        self.cell.load().search(vector, model_id, k)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let _guard = self.cell.lock_writer().await;
        let mut next = self.cell.draft();
        let removed = next.apply_delete(document_id);
        self.cell.publish(next);
        Ok(removed)
    }

    async fn document_hash(&self, document_id: &str) -> Result<Option<String>> {
        Ok(self.cell.load().document_hash(document_id))
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        Ok(self.cell.load().documents())
    }

    async fn stats(&self) -> Result<IndexStats> {
        Ok(self.cell.load().stats())
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.cell.load().is_empty())
    }

    async fn binding(&self) -> Result<Option<IndexBinding>> {
        Ok(self.cell.load().binding().cloned())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.cell.lock_writer().await;
        self.cell.publish(IndexSnapshot::default());
        Ok(())
    }
}
