//! Ingestion pipeline orchestration.
//!
//! Drives each source document through extraction → chunking → embedding →
//! index replacement. Documents are independent: a failure is recorded in
//! that document's [`IngestOutcome`] and the batch continues.
//!
//! A document whose content hash matches the indexed version is skipped
//! without calling the embedding API, unless `force` is set.
//!
//! An index bound to a different embedding model is the exception: the
//! mismatch is checked before anything is embedded, and once it is seen the
//! remaining documents fail without calling the gateway.
//!
//! Text extraction runs on a blocking thread. A parser panic on a malformed
//! PDF fails that document only.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use hr_assistant_core::chunk::{chunk_document, ChunkingOptions};
use hr_assistant_core::embedding::EmbeddingGateway;
use hr_assistant_core::models::{Document, DocumentKind, DocumentSummary, IndexEntry};
use hr_assistant_core::retry::{CallKind, RetryPolicy};
use hr_assistant_core::store::VectorIndex;
use hr_assistant_core::{Error, Result};

use crate::extract::extract_text;

/// Raw bytes of one document and the path it was read from.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Everything ingestion needs, constructed once and shared.
#[derive(Clone)]
pub struct IngestContext {
    pub index: Arc<dyn VectorIndex>,
    pub gateway: Arc<dyn EmbeddingGateway>,
    pub retry: RetryPolicy,
    pub chunking: ChunkingOptions,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Re-embed even when the content hash is unchanged.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestStatus {
    Ingested { chunks: usize },
    Unchanged { chunks: usize },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub source: String,
    pub document_id: String,
    #[serde(flatten)]
    pub status: IngestStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub outcomes: Vec<IngestOutcome>,
}

impl IngestReport {
    pub fn ingested(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Ingested { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Unchanged { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, IngestStatus::Failed { .. }))
    }

    /// Chunks written by this run.
    pub fn chunks_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o.status {
                IngestStatus::Ingested { chunks } => chunks,
                _ => 0,
            })
            .sum()
    }

    fn count(&self, pred: impl Fn(&IngestStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// Ingest every source, in order, isolating failures per document.
pub async fn ingest_sources(ctx: &IngestContext, sources: Vec<SourceDocument>) -> IngestReport {
    let mut report = IngestReport::default();
    let total = sources.len();

    let mut halted = match check_binding(ctx).await {
        Ok(()) => None,
        Err(e) if e.is_index_mismatch() => {
            error!(error = %e, "index was built with a different embedding model");
            Some(e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "could not read index binding");
            None
        }
    };

    for (i, source) in sources.into_iter().enumerate() {
        let SourceDocument { path, bytes } = source;
        let document_id = hr_assistant_core::models::document_id_for(&path);
        let status = if let Some(reason) = &halted {
            IngestStatus::Failed {
                error: reason.clone(),
            }
        } else {
            match ingest_one(ctx, &path, bytes).await {
                Ok(status) => status,
                Err(e) => {
                    if e.is_index_mismatch() {
                        error!(source = %path, error = %e, "index was built with a different embedding model");
                        halted = Some(e.to_string());
                    } else {
                        warn!(source = %path, error = %e, "failed to ingest document");
                    }
                    IngestStatus::Failed {
                        error: e.to_string(),
                    }
                }
            }
        };
        info!(
            progress = %format!("{}/{}", i + 1, total),
            source = %path,
            status = ?status,
            "ingested"
        );
        report.outcomes.push(IngestOutcome {
            source: path,
            document_id,
            status,
        });
    }

    info!(
        ingested = report.ingested(),
        unchanged = report.unchanged(),
        failed = report.failed(),
        chunks = report.chunks_written(),
        "ingestion finished"
    );
    report
}

/// Vectors from the configured gateway must fit the index before any
/// document is embedded.
async fn check_binding(ctx: &IngestContext) -> Result<()> {
    match ctx.index.binding().await? {
        Some(binding) => binding.check(ctx.gateway.model_id(), ctx.gateway.dims()),
        None => Ok(()),
    }
}

async fn ingest_one(ctx: &IngestContext, source_path: &str, bytes: Vec<u8>) -> Result<IngestStatus> {
    let path = Path::new(source_path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source_path.to_string());
    let kind = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(DocumentKind::from_extension)
        .ok_or_else(|| Error::ingestion(source_path, "unsupported file type"))?;

    let text = tokio::task::spawn_blocking(move || extract_text(kind, &bytes))
        .await
        .map_err(|e| {
            let reason = match (kind, e.is_panic()) {
                (DocumentKind::Pdf, true) => "PDF extraction panicked",
                (_, true) => "text extraction panicked",
                (_, false) => "text extraction was cancelled",
            };
            Error::ingestion(source_path, reason)
        })?
        .map_err(|e| Error::ingestion(source_path, e.to_string()))?;
    let document = Document::new(source_path, &name, kind, text);

    if !ctx.force {
        if let Some(existing) = ctx.index.document_hash(&document.id).await? {
            if existing == document.content_hash {
                let chunks = ctx
                    .index
                    .documents()
                    .await?
                    .into_iter()
                    .find(|d| d.id == document.id)
                    .map(|d| d.chunk_count)
                    .unwrap_or(0);
                return Ok(IngestStatus::Unchanged { chunks });
            }
        }
    }

    let chunks = chunk_document(&document, &ctx.chunking)?;
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(ctx.batch_size.max(1)) {
        let gateway = &ctx.gateway;
        let vectors = ctx
            .retry
            .run(CallKind::Embedding, || gateway.embed(batch))
            .await?;
        if vectors.len() != batch.len() {
            return Err(Error::gateway_fatal(format!(
                "expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }
        embeddings.extend(vectors);
    }

    let entries: Vec<IndexEntry> = chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| IndexEntry {
            chunk,
            document_name: document.name.clone(),
            embedding,
        })
        .collect();
    let count = entries.len();

    ctx.index
        .replace_document(DocumentSummary::from_document(&document, count), entries)
        .await?;
    Ok(IngestStatus::Ingested { chunks: count })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use hr_assistant_core::models::Embedding;
    use hr_assistant_core::store::memory::InMemoryIndex;

    use super::*;

    struct LengthGateway {
        calls: AtomicUsize,
        /// Dimension reported by `dims()`; embeddings always have two.
        claimed_dims: usize,
    }

    fn length_gateway() -> Arc<LengthGateway> {
        Arc::new(LengthGateway {
            calls: AtomicUsize::new(0),
            claimed_dims: 2,
        })
    }

    #[async_trait]
    impl EmbeddingGateway for LengthGateway {
        fn model_id(&self) -> &str {
            "len"
        }
        fn dims(&self) -> usize {
            self.claimed_dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| Embedding::new("len", vec![t.len() as f32, 1.0]))
                .collect())
        }
    }

    fn context(index: Arc<InMemoryIndex>, gateway: Arc<LengthGateway>) -> IngestContext {
        IngestContext {
            index,
            gateway,
            retry: RetryPolicy::no_retry(Duration::from_secs(5)),
            chunking: ChunkingOptions::new(20, 5),
            batch_size: 2,
            force: false,
        }
    }

    fn source(path: &str, text: &str) -> SourceDocument {
        SourceDocument {
            path: path.to_string(),
            bytes: text.as_bytes().to_vec(),
        }
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let index = Arc::new(InMemoryIndex::new());
        let gateway = length_gateway();
        let ctx = context(index.clone(), gateway.clone());

        let report = ingest_sources(
            &ctx,
            vec![
                source("/hr/leave.txt", "Employees accrue 15 days of vacation annually."),
                source("/hr/handbook.docx", "binary"),
                source("/hr/empty.md", "   \n"),
                source("/hr/conduct.md", "Be respectful."),
            ],
        )
        .await;

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.ingested(), 2);
        assert_eq!(report.failed(), 2);
        assert!(matches!(
            &report.outcomes[1].status,
            IngestStatus::Failed { error } if error.contains("unsupported")
        ));
        assert_eq!(index.stats().await.unwrap().documents, 2);
        // 46 chars at 20/5 -> 3 chunks in batches of 2, plus one batch for conduct.
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unchanged_document_is_skipped() {
        let index = Arc::new(InMemoryIndex::new());
        let gateway = length_gateway();
        let ctx = context(index.clone(), gateway.clone());
        let doc = || vec![source("/hr/leave.txt", "Vacation accrues monthly at 1.25 days.")];

        let first = ingest_sources(&ctx, doc()).await;
        let chunks = first.chunks_written();
        assert!(chunks > 0);
        let calls = gateway.calls.load(Ordering::SeqCst);

        let second = ingest_sources(&ctx, doc()).await;
        assert_eq!(second.outcomes[0].status, IngestStatus::Unchanged { chunks });
        assert_eq!(gateway.calls.load(Ordering::SeqCst), calls);

        let forced = IngestContext {
            force: true,
            ..ctx.clone()
        };
        let third = ingest_sources(&forced, doc()).await;
        assert_eq!(third.ingested(), 1);
        assert!(gateway.calls.load(Ordering::SeqCst) > calls);
    }

    #[tokio::test]
    async fn test_changed_document_replaces_old_chunks() {
        let index = Arc::new(InMemoryIndex::new());
        let gateway = length_gateway();
        let ctx = context(index.clone(), gateway);

        ingest_sources(&ctx, vec![source("/hr/leave.txt", &"long policy text ".repeat(10))]).await;
        let before = index.stats().await.unwrap().entries;
        ingest_sources(&ctx, vec![source("/hr/leave.txt", "short")]).await;

        let stats = index.stats().await.unwrap();
        assert!(before > 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.documents, 1);
    }

    /// Single-page PDF whose page object has `/Contents` but no `/MediaBox`.
    fn pdf_without_media_box() -> Vec<u8> {
        let stream = "BT /F1 12 Tf 100 700 Td (Leave policy) Tj ET";
        let mut out = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        let objects = [
            "1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n".to_string(),
            "2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n".to_string(),
            "3 0 obj << /Type /Page /Parent 2 0 R /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n".to_string(),
            format!("4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n", stream.len(), stream),
            "5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n".to_string(),
        ];
        for object in &objects {
            offsets.push(out.len());
            out.extend_from_slice(object.as_bytes());
        }
        let xref_start = out.len();
        out.extend_from_slice(b"xref\n0 6\n0000000000 65535 f \n");
        for offset in offsets {
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(
            format!("trailer << /Size 6 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n", xref_start).as_bytes(),
        );
        out
    }

    #[tokio::test]
    async fn test_malformed_pdf_does_not_abort_batch() {
        let index = Arc::new(InMemoryIndex::new());
        let gateway = length_gateway();
        let ctx = context(index.clone(), gateway);

        let report = ingest_sources(
            &ctx,
            vec![
                SourceDocument {
                    path: "/hr/a_bad.pdf".to_string(),
                    bytes: pdf_without_media_box(),
                },
                source("/hr/b_good.txt", "Remote work requires manager approval."),
            ],
        )
        .await;

        assert_eq!(report.outcomes.len(), 2);
        assert!(matches!(
            &report.outcomes[0].status,
            IngestStatus::Failed { error } if error.contains("PDF extraction")
        ));
        assert!(matches!(report.outcomes[1].status, IngestStatus::Ingested { .. }));
        assert_eq!(index.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_model_mismatch_fails_batch_without_embedding() {
        let index = Arc::new(InMemoryIndex::with_binding("other-model", 2));
        let gateway = length_gateway();
        let ctx = context(index.clone(), gateway.clone());
        let sources = (0..5)
            .map(|i| source(&format!("/hr/policy{}.txt", i), "Some policy text to embed."))
            .collect();

        let report = ingest_sources(&ctx, sources).await;

        assert_eq!(report.failed(), 5);
        assert!(report.outcomes.iter().all(|o| matches!(
            &o.status,
            IngestStatus::Failed { error } if error.contains("model mismatch")
        )));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert_eq!(index.stats().await.unwrap().entries, 0);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_stops_remaining_documents() {
        // The gateway claims three dimensions, so the up-front check passes,
        // but the first document's two-dimensional vectors are rejected.
        let index = Arc::new(InMemoryIndex::with_binding("len", 3));
        let gateway = Arc::new(LengthGateway {
            calls: AtomicUsize::new(0),
            claimed_dims: 3,
        });
        let ctx = context(index.clone(), gateway.clone());
        let sources = (0..4)
            .map(|i| source(&format!("/hr/policy{}.txt", i), "Short text."))
            .collect();

        let report = ingest_sources(&ctx, sources).await;

        assert_eq!(report.failed(), 4);
        assert!(report.outcomes.iter().all(|o| matches!(
            &o.status,
            IngestStatus::Failed { error } if error.contains("dimension mismatch")
        )));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);
    }
}
