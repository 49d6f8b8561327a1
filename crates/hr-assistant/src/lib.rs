//! # HR Assistant
//!
//! A retrieval-augmented question-answering assistant over HR policy
//! documents.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Documents  │──▶│   Pipeline   │──▶│  SQLite  │
//! │ PDF/TXT/MD  │   │ Chunk+Embed  │   │  Vectors │
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │
//!                       ┌───────────────────┤
//!                       ▼                   ▼
//!                  ┌──────────┐       ┌──────────┐
//!                  │   CLI    │       │   HTTP   │
//!                  │  (hra)   │       │   JSON   │
//!                  └──────────┘       └──────────┘
//! ```
//!
//! The domain logic (chunking, vector index, retrieval, answer synthesis,
//! sessions) lives in `hr-assistant-core`; this crate adds the OpenAI
//! clients, SQLite persistence, document discovery, and the two front ends.
//!
//! ## Quick Start
//!
//! ```bash
//! hra init                          # create the index
//! hra ingest                        # ingest [documents] root
//! hra ask "How many vacation days do I get?"
//! hra chat                          # interactive session
//! hra serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`connector_fs`] | Policy document discovery |
//! | [`extract`] | PDF and text extraction |
//! | [`ingest`] | Ingestion pipeline |
//! | [`embedding`] | OpenAI embeddings client |
//! | [`generation`] | OpenAI chat client |
//! | [`sqlite_store`] | Persistent vector index |
//! | [`assistant`] | Query entry point and sessions |
//! | [`server`] | HTTP JSON API |
//! | [`stats`] | Knowledge-base info |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod assistant;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
mod openai;
pub mod server;
pub mod sqlite_store;
pub mod stats;
