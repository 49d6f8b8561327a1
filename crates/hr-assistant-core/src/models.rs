//! Core data models used throughout the assistant.
//!
//! These types represent the documents, chunks, embeddings, and conversation
//! turns that flow through the ingestion and question-answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Source format of a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Pdf,
    PlainText,
    Markdown,
}

impl DocumentKind {
    /// Infer the kind from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "txt" | "text" => Some(DocumentKind::PlainText),
            "md" | "markdown" => Some(DocumentKind::Markdown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::PlainText => "plain_text",
            DocumentKind::Markdown => "markdown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf" => Some(DocumentKind::Pdf),
            "plain_text" => Some(DocumentKind::PlainText),
            "markdown" => Some(DocumentKind::Markdown),
            _ => None,
        }
    }
}

/// An ingested document. Re-ingestion replaces it as a whole.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// File name shown in citations.
    pub name: String,
    pub source_path: String,
    pub kind: DocumentKind,
    pub text: String,
    /// SHA-256 of `text`, used to skip re-embedding unchanged documents.
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    /// Build a document whose id is derived from its source path, so the
    /// same file always maps to the same document id.
    pub fn new(source_path: &str, name: &str, kind: DocumentKind, text: String) -> Self {
        Self {
            id: document_id_for(source_path),
            name: name.to_string(),
            source_path: source_path.to_string(),
            kind,
            content_hash: hash_text(&text),
            text,
            ingested_at: Utc::now(),
        }
    }

    /// Length of the text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Lightweight document metadata stored alongside index entries.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: String,
    pub name: String,
    pub source_path: String,
    pub kind: DocumentKind,
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
    pub chunk_count: usize,
}

impl DocumentSummary {
    pub fn from_document(doc: &Document, chunk_count: usize) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.name.clone(),
            source_path: doc.source_path.clone(),
            kind: doc.kind,
            content_hash: doc.content_hash.clone(),
            ingested_at: doc.ingested_at,
            chunk_count,
        }
    }
}

/// A contiguous span of a document's text. Offsets are character positions,
/// half-open: `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub ordinal: usize,
    pub text: String,
    pub start: usize,
    pub end: usize,
}

/// A fixed-length vector together with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub model_id: String,
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(model_id: impl Into<String>, values: Vec<f32>) -> Self {
        Self {
            model_id: model_id.into(),
            values,
        }
    }

    pub fn dims(&self) -> usize {
        self.values.len()
    }
}

/// A chunk paired with its embedding and retrievable metadata.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub document_name: String,
    pub embedding: Embedding,
}

impl IndexEntry {
    pub fn citation(&self) -> Citation {
        Citation {
            chunk_id: self.chunk.id.clone(),
            document_id: self.chunk.document_id.clone(),
            document_name: self.document_name.clone(),
            start: self.chunk.start,
            end: self.chunk.end,
        }
    }
}

/// Pointer from an answer back to the chunk that supports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub document_name: String,
    pub start: usize,
    pub end: usize,
}

/// A chunk returned by the retriever, with its similarity score.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub citation: Citation,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
            citations: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
            citations,
        }
    }
}

/// SHA-256 hex digest of a string.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic document id for a source path (first 16 hex chars of its SHA-256).
pub fn document_id_for(source_path: &str) -> String {
    let full = hash_text(source_path);
    full[..16].to_string()
}
