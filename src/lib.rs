//! # vector-rebuild
//!
//! Disaster recovery for a RAG vector store: regenerate every embedding from
//! the durable chunk backup, and follow the run live from a client.
//!
//! ## Architecture
//!
//! A rebuild run moves through fixed phases, each mapped to a progress value:
//!
//! ```text
//!   ┌──────────┐   ┌──────────────┐   ┌──────────┐   ┌─────────────────┐
//!   │ starting │──▶│ initializing │──▶│ counting │──▶│   processing    │
//!   │    0%    │   │  clear scope │   │ read     │   │ embed + upsert  │
//!   └──────────┘   │      5%      │   │ backup   │   │ 10% + 80%·p/t   │
//!                  └──────────────┘   │   10%    │   └────────┬────────┘
//!                                     └──────────┘            │
//!                                                             ▼
//!                        ┌───────────┐   ┌────────────┐  ┌─────────┐
//!                        │  failed   │   │ completed  │◀─│finalize │
//!                        │ (keeps %) │   │    100%    │  │   95%   │
//!                        └───────────┘   └────────────┘  └─────────┘
//! ```
//!
//! The server streams these as SSE frames; the client turns the frames back
//! into an async stream of [`models::RebuildProgressEvent`]s.
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration for the server and the client
//! - [`models`] - Wire types: progress events, filters, outcomes, backup records
//! - [`error`] - Client error taxonomy
//! - [`store::backup`] - Durable document/chunk backup and its statistics
//! - [`store::vector`] - Vector store with per-user and per-document deletion and disk persistence
//! - [`llm::embeddings`] - Batch embedding generation via Ollama or OpenAI-compatible APIs
//! - [`rebuild`] - The rebuild engine, progress accounting, and progress streaming
//! - [`api`] - Axum admin handlers and bearer-token authentication
//! - [`client`] - HTTP client that follows a streamed rebuild
//! - [`state`] - Shared application state

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod rebuild;
pub mod state;
pub mod store;

pub use client::RebuildClient;
pub use error::{Error, Result};
