//! Verba is a RAG orchestration service: it ingests documents through
//! pluggable reader, chunker and embedder components, persists them in
//! a hybrid keyword + vector store, and answers queries by retrieving
//! context and streaming generated tokens back over a websocket.
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`reader`], [`chunker`], [`embedder`] | ingestion components |
//! | [`retriever`], [`generator`] | query components |
//! | [`registry`], [`schema`] | component registration and config schemas |
//! | [`ingest`], [`query`] | the two pipelines |
//! | [`store`] | storage abstraction and persistence contract |
//! | [`reassemble`] | chunked upload reassembly |
//! | [`cache`] | semantic answer cache |
//! | [`server`] | HTTP + websocket API |
//! | [`config`] | service settings |

pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod generator;
pub mod ingest;
pub mod models;
pub mod query;
pub mod reader;
pub mod reassemble;
pub mod registry;
pub mod retriever;
pub mod schema;
pub mod server;
pub mod store;
