#![deny(missing_docs)]

//! Core library for the finfunc document question-answering service.

/// HTTP routing and request handlers.
pub mod api;
/// Audit trail for answered questions.
pub mod audit;
/// Environment-driven configuration management.
pub mod config;
/// Spreadsheet-to-PDF conversion client.
pub mod conversion;
/// PDF loading into per-page documents.
pub mod documents;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Chunking, embedding and storage of uploaded documents.
pub mod indexing;
/// Chat-completion client used to answer questions.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Qdrant vector store integration.
pub mod qdrant;
/// Retrieval-augmented question answering.
pub mod query;
/// Upload and query orchestration.
pub mod service;
/// Upload session registry.
pub mod sessions;
