//! Vector index construction.
//!
//! Every call to [`IndexBuilder::build`] creates its own Qdrant collection, named by a fresh
//! UUID, so two uploads never share a vector space. Embedding requests are issued in batches of
//! [`EMBEDDING_BATCH_SIZE`] chunks.

mod chunking;

pub use chunking::ChunkingError;

use crate::{
    config::Config,
    documents::Document,
    embedding::{EmbeddingClient, EmbeddingClientError},
    qdrant::{PointInsert, QdrantError, QdrantService},
};
use chunking::{TokenCounter, build_token_counter, chunk_text};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Number of chunks sent to the embedding provider per request.
pub const EMBEDDING_BATCH_SIZE: usize = 20;

/// Errors raised while building an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Chunking rejected the configured budget.
    #[error("Failed to chunk document: {0}")]
    Chunking(#[from] ChunkingError),
    /// Embedding provider failed.
    #[error("{0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Embedding provider returned the wrong number of vectors for a batch.
    #[error("Embedding batch size mismatch: sent {sent}, received {received}")]
    BatchMismatch {
        /// Chunks sent in the batch.
        sent: usize,
        /// Vectors returned for the batch.
        received: usize,
    },
    /// Vector store rejected a request.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
}

/// Chunking parameters applied before embedding.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Dimensionality of vectors stored in new collections.
    pub vector_size: u64,
    /// Token budget for each chunk.
    pub chunk_size: usize,
    /// Token overlap between adjacent chunks.
    pub chunk_overlap: usize,
    /// Model name used to select a tokenizer.
    pub tokenizer_model: String,
}

impl IndexSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            vector_size: config.embedding_dimension as u64,
            chunk_size: config.text_splitter_chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap,
            tokenizer_model: config.embedding_model.clone(),
        }
    }
}

/// Handle to a built index: the collection holding its vectors plus bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorIndex {
    /// Qdrant collection bound to this index.
    pub collection: String,
    /// Number of source documents (pages) indexed.
    pub document_count: usize,
    /// Number of chunks embedded and stored.
    pub chunk_count: usize,
}

/// Embeds documents and writes them to Qdrant.
pub struct IndexBuilder {
    embedding_client: Arc<dyn EmbeddingClient>,
    qdrant: QdrantService,
    settings: IndexSettings,
    token_counter: TokenCounter,
}

struct PreparedChunk {
    text: String,
    file_name: String,
    page_label: String,
}

impl IndexBuilder {
    /// Assemble a builder from its collaborators.
    pub fn new(
        embedding_client: Arc<dyn EmbeddingClient>,
        qdrant: QdrantService,
        settings: IndexSettings,
    ) -> Self {
        let token_counter = build_token_counter(&settings.tokenizer_model);
        Self {
            embedding_client,
            qdrant,
            settings,
            token_counter,
        }
    }

    /// Build an index over `documents` in a brand-new, uniquely named collection.
    pub async fn build(&self, documents: Vec<Document>) -> Result<VectorIndex, IndexError> {
        let collection = Uuid::new_v4().to_string();
        self.qdrant
            .create_collection(&collection, self.settings.vector_size)
            .await?;
        self.insert(collection, documents).await
    }

    /// Add `documents` to a named collection, creating it when absent.
    pub async fn build_in_collection(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<VectorIndex, IndexError> {
        self.qdrant
            .create_collection_if_not_exists(collection, self.settings.vector_size)
            .await?;
        self.insert(collection.to_string(), documents).await
    }

    async fn insert(
        &self,
        collection: String,
        documents: Vec<Document>,
    ) -> Result<VectorIndex, IndexError> {
        let document_count = documents.len();
        let chunks = self.prepare_chunks(documents)?;
        let mut chunk_count = 0;

        for batch in chunks.chunks(EMBEDDING_BATCH_SIZE) {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let vectors = self.embedding_client.generate_embeddings(texts).await?;
            if vectors.len() != batch.len() {
                return Err(IndexError::BatchMismatch {
                    sent: batch.len(),
                    received: vectors.len(),
                });
            }

            let points = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| PointInsert {
                    vector,
                    payload: chunk_payload(chunk),
                })
                .collect();
            chunk_count += self.qdrant.upsert_points(&collection, points).await?;
        }

        tracing::info!(
            collection = %collection,
            documents = document_count,
            chunks = chunk_count,
            "Index built"
        );

        Ok(VectorIndex {
            collection,
            document_count,
            chunk_count,
        })
    }

    fn prepare_chunks(&self, documents: Vec<Document>) -> Result<Vec<PreparedChunk>, IndexError> {
        let mut prepared = Vec::new();
        for document in documents {
            let pieces = chunk_text(
                &document.text,
                self.settings.chunk_size,
                self.settings.chunk_overlap,
                &self.token_counter,
            )?;
            prepared.extend(pieces.into_iter().map(|text| PreparedChunk {
                text,
                file_name: document.metadata.file_name.clone(),
                page_label: document.metadata.page_label.clone(),
            }));
        }
        Ok(prepared)
    }
}

fn chunk_payload(chunk: &PreparedChunk) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("text".into(), Value::String(chunk.text.clone()));
    payload.insert("file_name".into(), Value::String(chunk.file_name.clone()));
    payload.insert("page_label".into(), Value::String(chunk.page_label.clone()));
    payload
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::DocumentMetadata;
    use async_trait::async_trait;
    use httpmock::{
        Method::{GET, PUT},
        MockServer,
    };
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl EmbeddingClient for RecordingEmbedder {
        async fn generate_embeddings(
            &self,
            texts: Vec<String>,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            self.batches.lock().push(texts.len());
            Ok(texts.iter().map(|_| vec![0.5, 0.5]).collect())
        }
    }

    fn settings() -> IndexSettings {
        IndexSettings {
            vector_size: 2,
            chunk_size: 4,
            chunk_overlap: 0,
            tokenizer_model: "bge-base-en-v1.5".into(),
        }
    }

    fn pages(count: usize) -> Vec<Document> {
        (1..=count)
            .map(|page| Document {
                text: format!("page {page}"),
                metadata: DocumentMetadata {
                    file_name: "report.pdf".into(),
                    page_label: page.to_string(),
                },
            })
            .collect()
    }

    #[tokio::test]
    async fn build_creates_isolated_collection_and_batches_by_twenty() {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path_matches(regex::Regex::new(r"^/collections/[0-9a-f-]{36}$").unwrap());
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT).path_matches(
                    regex::Regex::new(r"^/collections/[0-9a-f-]{36}/points$").unwrap(),
                );
                then.status(200).json_body(json!({ "result": { "status": "completed" } }));
            })
            .await;

        let embedder = Arc::new(RecordingEmbedder::default());
        let builder = IndexBuilder::new(
            embedder.clone(),
            QdrantService::with_base_url(&server.base_url(), None).expect("client"),
            settings(),
        );

        let first = builder.build(pages(45)).await.expect("first index");
        let second = builder.build(pages(1)).await.expect("second index");

        create.assert_hits(2);
        upsert.assert_hits(4);
        assert_eq!(first.document_count, 45);
        assert_eq!(first.chunk_count, 45);
        assert_ne!(first.collection, second.collection);
        assert_eq!(*embedder.batches.lock(), vec![20, 20, 5, 1]);
    }

    #[tokio::test]
    async fn build_with_no_text_creates_empty_collection() {
        let server = MockServer::start_async().await;
        let create = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path_matches(regex::Regex::new(r"^/collections/[0-9a-f-]{36}$").unwrap());
                then.status(200).json_body(json!({ "result": true }));
            })
            .await;

        let embedder = Arc::new(RecordingEmbedder::default());
        let builder = IndexBuilder::new(
            embedder.clone(),
            QdrantService::with_base_url(&server.base_url(), None).expect("client"),
            settings(),
        );

        let blank = vec![Document {
            text: "   ".into(),
            metadata: DocumentMetadata {
                file_name: "scan.pdf".into(),
                page_label: "1".into(),
            },
        }];
        let index = builder.build(blank).await.expect("empty index");

        create.assert();
        assert_eq!(index.document_count, 1);
        assert_eq!(index.chunk_count, 0);
        assert!(embedder.batches.lock().is_empty());
    }

    #[tokio::test]
    async fn build_in_collection_reuses_existing_collection() {
        let server = MockServer::start_async().await;
        let exists = server
            .mock_async(|when, then| {
                when.method(GET).path("/collections/quickstart");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;
        let upsert = server
            .mock_async(|when, then| {
                when.method(PUT)
                    .path("/collections/quickstart/points")
                    .body_contains("\"page_label\":\"1\"")
                    .body_contains("\"file_name\":\"report.pdf\"");
                then.status(200).json_body(json!({ "result": {} }));
            })
            .await;

        let builder = IndexBuilder::new(
            Arc::new(RecordingEmbedder::default()),
            QdrantService::with_base_url(&server.base_url(), None).expect("client"),
            settings(),
        );
        let index = builder
            .build_in_collection("quickstart", pages(1))
            .await
            .expect("bulk index");

        exists.assert();
        upsert.assert();
        assert_eq!(index.collection, "quickstart");
    }
}
