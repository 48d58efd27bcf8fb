//! # RGPD Harness
//!
//! Retrieval-augmented question answering over the French text of the
//! RGPD (GDPR) and the sanctions pronounced by the CNIL.
//!
//! The harness scrapes cnil.fr into typed records (recitals, article
//! paragraphs, sanctions), stores them in SQLite with FTS5 and embedding
//! vectors, and answers questions with a streamed chat completion grounded
//! in the best-matching records.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────┐
//! │   Scrape    │──▶│  Pipeline   │──▶│  SQLite  │
//! │  cnil.fr    │   │ Chunk+Embed │   │ FTS5+Vec │
//! └─────────────┘   └─────────────┘   └────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │  (rgpd)  │       │ /query   │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! rgpd init                     # create database
//! rgpd sync all                 # scrape recitals, articles, sanctions
//! rgpd embed pending            # generate embeddings
//! rgpd search "consentement" --mode hybrid
//! rgpd serve                    # POST /query on 0.0.0.0:8000
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Records and their normalization |
//! | [`scrape`] | Page fetching and parsing |
//! | [`ingest`] | Sync pipeline |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`search`] | Keyword, semantic, and hybrid search |
//! | [`llm`] | Streaming chat completions |
//! | [`answer`] | Context assembly and answer streaming |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod export;
pub mod get;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod scrape;
pub mod search;
pub mod server;
pub mod sources;
pub mod stats;
