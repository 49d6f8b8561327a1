//! # HR Assistant Core
//!
//! Runtime-agnostic logic for the HR policy assistant: data models,
//! chunking, the embedding and generation traits, the vector index
//! abstraction with an in-memory backend, retrieval, grounded answer
//! synthesis, and conversation history.
//!
//! This crate performs no filesystem, network, or database I/O. External
//! services are reached through the [`EmbeddingGateway`](embedding::EmbeddingGateway)
//! and [`Generator`](answer::Generator) traits, implemented in the
//! `hr-assistant` app crate.

pub mod answer;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod retrieve;
pub mod retry;
pub mod session;
pub mod store;

pub use error::{Error, Result};
