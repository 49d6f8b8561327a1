//! Query-time retrieval: embed the question, rank index entries.

use std::sync::Arc;

use tracing::debug;

use crate::embedding::EmbeddingGateway;
use crate::error::{Error, Result};
use crate::models::RetrievedChunk;
use crate::retry::{CallKind, RetryPolicy};
use crate::store::VectorIndex;

pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    gateway: Arc<dyn EmbeddingGateway>,
    retry: RetryPolicy,
    top_k: usize,
}

impl Retriever {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        gateway: Arc<dyn EmbeddingGateway>,
        retry: RetryPolicy,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            gateway,
            retry,
            top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The `k` chunks most similar to `query` (default: configured `top_k`).
    ///
    /// A blank query or an empty index yields no chunks and makes no
    /// external call.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] if `k` is zero; gateway errors once retries are
    /// exhausted; [`Error::DimensionMismatch`] / [`Error::ModelMismatch`] if
    /// the index was built with a different embedding model.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievedChunk>> {
        let k = k.unwrap_or(self.top_k);
        if k == 0 {
            return Err(Error::config("k must be >= 1"));
        }
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        if self.index.is_empty().await? {
            debug!("index is empty, skipping retrieval");
            return Ok(Vec::new());
        }

        let input = vec![query.to_string()];
        let gateway = &self.gateway;
        let mut vectors = self
            .retry
            .run(CallKind::Embedding, || gateway.embed(&input))
            .await?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| Error::gateway_fatal("embedding response was empty"))?;

        let hits = self
            .index
            .query(&embedding.values, self.gateway.model_id(), k)
            .await?;
        debug!(k, hits = hits.len(), "retrieved chunks");

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                citation: hit.entry.citation(),
                chunk: hit.entry.chunk,
                score: hit.score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::models::Embedding;
    use crate::store::memory::InMemoryIndex;
    use crate::store::test_support::entry;

    struct CountingGateway {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl EmbeddingGateway for CountingGateway {
        fn model_id(&self) -> &str {
            "m"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::RateLimited("quota".into()));
            }
            Ok(texts.iter().map(|_| Embedding::new("m", vec![1.0, 0.0])).collect())
        }
    }

    fn retriever(index: Arc<InMemoryIndex>, fail: bool) -> (Retriever, Arc<CountingGateway>) {
        let gateway = Arc::new(CountingGateway {
            calls: AtomicUsize::new(0),
            fail,
        });
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter: false,
            timeout: Duration::from_secs(1),
        };
        (Retriever::new(index, gateway.clone(), policy, 2), gateway)
    }

    #[tokio::test]
    async fn test_empty_index_skips_gateway() {
        let (r, gw) = retriever(Arc::new(InMemoryIndex::new()), false);
        assert!(r.retrieve("vacation policy", None).await.unwrap().is_empty());
        assert_eq!(gw.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_blank_query_skips_gateway() {
        let index = Arc::new(InMemoryIndex::new());
        index.upsert(vec![entry("a", 0, "m", vec![1.0, 0.0])]).await.unwrap();
        let (r, gw) = retriever(index, false);
        assert!(r.retrieve("   ", None).await.unwrap().is_empty());
        assert_eq!(gw.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_zero_k_is_config_error() {
        let (r, _) = retriever(Arc::new(InMemoryIndex::new()), false);
        let err = r.retrieve("q", Some(0)).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn test_default_k_and_citations() {
        let index = Arc::new(InMemoryIndex::new());
        index
            .upsert(vec![
                entry("a", 0, "m", vec![1.0, 0.0]),
                entry("a", 1, "m", vec![0.7, 0.7]),
                entry("b", 0, "m", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        let (r, _) = retriever(index, false);
        let hits = r.retrieve("anything", None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, "a:00000");
        assert_eq!(hits[0].citation.document_name, "a.txt");
        assert_eq!(hits[0].citation.chunk_id, hits[0].chunk.id);
        assert!(hits[0].score > hits[1].score);

        let all = r.retrieve("anything", Some(10)).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_gateway_failure_retried_then_surfaced() {
        let index = Arc::new(InMemoryIndex::new());
        index.upsert(vec![entry("a", 0, "m", vec![1.0, 0.0])]).await.unwrap();
        let (r, gw) = retriever(index, true);
        let err = r.retrieve("q", None).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
    }
}
