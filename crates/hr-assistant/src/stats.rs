use anyhow::Result;
use serde::Serialize;

use hr_assistant_core::models::DocumentSummary;
use hr_assistant_core::store::VectorIndex;

use crate::config::Config;

/// Knowledge-base overview reported by `hra stats` and `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeBaseInfo {
    pub index_path: String,
    pub index_bytes: u64,
    pub documents: usize,
    pub entries: usize,
    /// Model the stored vectors came from, if anything is indexed.
    pub indexed_model: Option<String>,
    pub indexed_dims: Option<usize>,
    pub embedding_model: String,
    pub generation_model: String,
    pub temperature: f32,
    pub max_answer_tokens: u32,
    pub top_k: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub document_list: Vec<DocumentSummary>,
}

impl KnowledgeBaseInfo {
    pub async fn gather(config: &Config, index: &dyn VectorIndex) -> Result<Self> {
        let stats = index.stats().await?;
        let mut document_list = index.documents().await?;
        document_list.sort_by(|a, b| a.name.cmp(&b.name));
        let index_bytes = std::fs::metadata(&config.index.path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(Self {
            index_path: config.index.path.display().to_string(),
            index_bytes,
            documents: stats.documents,
            entries: stats.entries,
            indexed_model: stats.binding.as_ref().map(|b| b.model_id.clone()),
            indexed_dims: stats.binding.as_ref().map(|b| b.dims),
            embedding_model: config.embedding.model.clone(),
            generation_model: config.generation.model.clone(),
            temperature: config.generation.temperature,
            max_answer_tokens: config.generation.max_answer_tokens,
            top_k: config.retrieval.top_k,
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            document_list,
        })
    }

    /// Whether the index holds vectors from a model other than the configured one.
    pub fn model_mismatch(&self) -> bool {
        matches!(&self.indexed_model, Some(m) if *m != self.embedding_model)
    }
}

pub fn print_stats(info: &KnowledgeBaseInfo) {
    println!("HR Assistant Knowledge Base");
    println!("===========================");
    println!();
    println!("  Index:       {}", info.index_path);
    println!("  Size:        {}", format_bytes(info.index_bytes));
    println!("  Documents:   {}", info.documents);
    println!("  Chunks:      {}", info.entries);
    match (&info.indexed_model, info.indexed_dims) {
        (Some(model), Some(dims)) => println!("  Vectors:     {} ({} dims)", model, dims),
        _ => println!("  Vectors:     (empty)"),
    }
    println!();
    println!("  Embedding:   {}", info.embedding_model);
    println!(
        "  Generation:  {} (temperature {}, max {} tokens)",
        info.generation_model, info.temperature, info.max_answer_tokens
    );
    println!(
        "  Retrieval:   top {} of {}-char chunks ({} overlap)",
        info.top_k, info.chunk_size, info.chunk_overlap
    );
    if info.model_mismatch() {
        println!();
        println!("  WARNING: the index was built with a different embedding model.");
        println!("           Run `hra reset` and re-ingest.");
    }

    if !info.document_list.is_empty() {
        println!();
        println!("  {:<18} {:<36} {:>6}  {}", "ID", "NAME", "CHUNKS", "INGESTED");
        println!("  {}", "-".repeat(80));
        for d in &info.document_list {
            println!(
                "  {:<18} {:<36} {:>6}  {}",
                d.id,
                d.name,
                d.chunk_count,
                d.ingested_at.format("%Y-%m-%d %H:%M")
            );
        }
    }
    println!();
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
