//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait defines every storage operation the ingestion
//! and query paths need, enabling pluggable backends (in-memory here,
//! SQLite in the app crate).
//!
//! Both backends share [`IndexSnapshot`] for the in-process view of the
//! index and [`SnapshotCell`] for publication: readers clone an `Arc` to the
//! current snapshot and never block, writers hold the write lock, build a new
//! snapshot from a copy of the current one, persist it (if the backend
//! persists), and only then swap it in. A reader therefore sees either all
//! of a document's new entries or none of them. Entries are shared between
//! snapshots behind `Arc`, so a copy duplicates pointers, not vectors.

pub mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::embedding::cosine_similarity;
use crate::error::{Error, Result};
use crate::models::{DocumentSummary, IndexEntry};

/// An index entry together with its similarity to the query vector.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: IndexEntry,
    pub score: f32,
}

/// The embedding model and vector length an index holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexBinding {
    pub model_id: String,
    pub dims: usize,
}

impl IndexBinding {
    /// Fail unless vectors of `dims` components from `model_id` belong in
    /// this index. The model is compared first.
    pub fn check(&self, model_id: &str, dims: usize) -> Result<()> {
        if self.model_id != model_id {
            return Err(Error::ModelMismatch {
                expected: self.model_id.clone(),
                actual: model_id.to_string(),
            });
        }
        if self.dims != dims {
            return Err(Error::DimensionMismatch {
                expected: self.dims,
                actual: dims,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexStats {
    pub documents: usize,
    pub entries: usize,
    pub binding: Option<IndexBinding>,
}

/// Storage backend for embedded chunks.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace entries by chunk id |
/// | [`replace_document`](VectorIndex::replace_document) | Atomically swap all entries of one document |
/// | [`query`](VectorIndex::query) | Top-k cosine similarity search |
/// | [`delete_document`](VectorIndex::delete_document) | Remove one document's entries |
/// | [`document_hash`](VectorIndex::document_hash) | Content hash of an indexed document |
/// | [`documents`](VectorIndex::documents) | List indexed documents |
/// | [`stats`](VectorIndex::stats) | Counts and binding |
/// | [`is_empty`](VectorIndex::is_empty) | Whether any entry is stored |
/// | [`binding`](VectorIndex::binding) | Model and dimension the index holds |
/// | [`clear`](VectorIndex::clear) | Remove everything and unbind |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace entries by chunk id.
    ///
    /// # Errors
    ///
    /// [`Error::DimensionMismatch`] or [`Error::ModelMismatch`] if any entry
    /// disagrees with the index binding (or with the other entries when the
    /// index is unbound). Nothing is written in that case.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Remove every entry of `document.id` and insert `entries` as one unit.
    async fn replace_document(
        &self,
        document: DocumentSummary,
        entries: Vec<IndexEntry>,
    ) -> Result<()>;

    /// The `min(k, len)` entries most similar to `vector`, by descending
    /// cosine similarity with ties broken by ascending chunk id.
    async fn query(&self, vector: &[f32], model_id: &str, k: usize) -> Result<Vec<ScoredEntry>>;

    /// Remove a document and its entries, returning how many entries were removed.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn document_hash(&self, document_id: &str) -> Result<Option<String>>;

    async fn documents(&self) -> Result<Vec<DocumentSummary>>;

    async fn stats(&self) -> Result<IndexStats>;

    async fn is_empty(&self) -> Result<bool>;

    /// `None` until the first write binds the index.
    async fn binding(&self) -> Result<Option<IndexBinding>>;

    async fn clear(&self) -> Result<()>;
}

/// Immutable view of an index's contents.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    binding: Option<IndexBinding>,
    entries: BTreeMap<String, Arc<IndexEntry>>,
    documents: BTreeMap<String, DocumentSummary>,
}

impl IndexSnapshot {
    pub fn new(binding: Option<IndexBinding>) -> Self {
        Self {
            binding,
            ..Default::default()
        }
    }

    /// Rebuild a snapshot from persisted rows.
    pub fn from_parts(
        binding: Option<IndexBinding>,
        entries: Vec<IndexEntry>,
        documents: Vec<DocumentSummary>,
    ) -> Self {
        Self {
            binding,
            entries: entries
                .into_iter()
                .map(|e| (e.chunk.id.clone(), Arc::new(e)))
                .collect(),
            documents: documents.into_iter().map(|d| (d.id.clone(), d)).collect(),
        }
    }

    pub fn binding(&self) -> Option<&IndexBinding> {
        self.binding.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values().map(Arc::as_ref)
    }

    /// Validate `entries` against the binding, binding the index to the
    /// first entry if it is unbound.
    fn bind(&mut self, entries: &[IndexEntry]) -> Result<()> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let binding = match &self.binding {
            Some(b) => b.clone(),
            None => IndexBinding {
                model_id: first.embedding.model_id.clone(),
                dims: first.embedding.dims(),
            },
        };
        for entry in entries {
            binding.check(&entry.embedding.model_id, entry.embedding.dims())?;
        }
        self.binding = Some(binding);
        Ok(())
    }

    pub fn apply_upsert(&mut self, entries: Vec<IndexEntry>) -> Result<()> {
        self.bind(&entries)?;
        for entry in entries {
            if let Some(doc) = self.documents.get_mut(&entry.chunk.document_id) {
                if !self.entries.contains_key(&entry.chunk.id) {
                    doc.chunk_count += 1;
                }
            }
            self.entries.insert(entry.chunk.id.clone(), Arc::new(entry));
        }
        Ok(())
    }

    pub fn apply_replace(
        &mut self,
        mut document: DocumentSummary,
        entries: Vec<IndexEntry>,
    ) -> Result<()> {
        if let Some(stray) = entries.iter().find(|e| e.chunk.document_id != document.id) {
            return Err(Error::storage(format!(
                "chunk {} does not belong to document {}",
                stray.chunk.id, document.id
            )));
        }
        self.bind(&entries)?;
        self.remove_entries_of(&document.id);
        document.chunk_count = entries.len();
        for entry in entries {
            self.entries.insert(entry.chunk.id.clone(), Arc::new(entry));
        }
        self.documents.insert(document.id.clone(), document);
        Ok(())
    }

    pub fn apply_delete(&mut self, document_id: &str) -> usize {
        self.documents.remove(document_id);
        self.remove_entries_of(document_id)
    }

    fn remove_entries_of(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.chunk.document_id != document_id);
        before - self.entries.len()
    }

    pub fn search(&self, vector: &[f32], model_id: &str, k: usize) -> Result<Vec<ScoredEntry>> {
        let Some(binding) = &self.binding else {
            return Ok(Vec::new());
        };
        binding.check(model_id, vector.len())?;
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        // Entries iterate in chunk id order, so a stable sort keeps id ties ascending.
        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .values()
            .map(|entry| (cosine_similarity(vector, &entry.embedding.values), entry.as_ref()))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(score, entry)| ScoredEntry {
                entry: entry.clone(),
                score,
            })
            .collect())
    }

    pub fn document_hash(&self, document_id: &str) -> Option<String> {
        self.documents
            .get(document_id)
            .map(|d| d.content_hash.clone())
    }

    pub fn documents(&self) -> Vec<DocumentSummary> {
        self.documents.values().cloned().collect()
    }

    pub fn stats(&self) -> IndexStats {
        let document_ids: BTreeSet<&str> = self
            .entries
            .values()
            .map(|e| e.chunk.document_id.as_str())
            .collect();
        IndexStats {
            documents: document_ids.len(),
            entries: self.entries.len(),
            binding: self.binding.clone(),
        }
    }
}

/// Publishes [`IndexSnapshot`]s to concurrent readers.
pub struct SnapshotCell {
    current: RwLock<Arc<IndexSnapshot>>,
    writer: Mutex<()>,
}

impl SnapshotCell {
    pub fn new(snapshot: IndexSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    /// The snapshot visible right now.
    pub fn load(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Serialize writers. Hold the guard from copying the snapshot until
    /// [`publish`](Self::publish) returns.
    pub async fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Copy of the current snapshot for a writer to modify. Entries are
    /// shared with the published snapshot until the writer replaces them.
    pub fn draft(&self) -> IndexSnapshot {
        (*self.load()).clone()
    }

    pub fn publish(&self, snapshot: IndexSnapshot) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(snapshot);
    }
}
