//! Retrieval-augmented answering over a session's index.

use crate::{
    embedding::{EmbeddingClient, EmbeddingClientError},
    llm::{LlmClient, LlmClientError},
    qdrant::{QdrantError, QdrantService},
    sessions::{SessionError, SessionStore},
};
use std::sync::Arc;
use thiserror::Error;

/// Substrings that mark a query as asking for a long-form answer.
pub const LONG_FORM_KEYWORDS: [&str; 3] = ["summary", "explain", "detail"];

/// Suffix appended to long-form queries.
pub const LONG_FORM_SUFFIX: &str = " in 250 to 750 words";

const CONTEXT_SEPARATOR: &str = "\n\n";

/// Errors raised while answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The session id has no index.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// Query embedding failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Embedding provider returned nothing for the query.
    #[error("Embedding provider returned no vector for the query")]
    EmptyEmbedding,
    /// Similarity search failed.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
    /// The language model call failed.
    #[error(transparent)]
    Llm(#[from] LlmClientError),
}

/// Append [`LONG_FORM_SUFFIX`] when the lowercased query contains a long-form keyword.
pub fn rewrite_query(query: &str) -> String {
    let lowered = query.to_lowercase();
    if LONG_FORM_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        format!("{query}{LONG_FORM_SUFFIX}")
    } else {
        query.to_string()
    }
}

/// Fill the question-answering prompt with retrieved context.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {query}\n\
         Answer: "
    )
}

/// Answers natural-language questions against indexed uploads.
pub struct QueryEngine {
    sessions: Arc<dyn SessionStore>,
    embedding_client: Arc<dyn EmbeddingClient>,
    qdrant: QdrantService,
    llm: Box<dyn LlmClient>,
    top_k: usize,
}

impl QueryEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        embedding_client: Arc<dyn EmbeddingClient>,
        qdrant: QdrantService,
        llm: Box<dyn LlmClient>,
        top_k: usize,
    ) -> Self {
        Self {
            sessions,
            embedding_client,
            qdrant,
            llm,
            top_k: top_k.max(1),
        }
    }

    /// Answer `query` using the index registered under `session_id`.
    pub async fn answer(&self, query: &str, session_id: usize) -> Result<String, QueryError> {
        let result = self.answer_inner(query, session_id).await;
        if let Err(error) = &result {
            tracing::error!(session_id, error = %error, "Error while processing query");
        }
        result
    }

    async fn answer_inner(&self, query: &str, session_id: usize) -> Result<String, QueryError> {
        let index = self.sessions.get(session_id)?;
        tracing::debug!(session_id, collection = %index.collection, "Querying PDF index");

        let query = rewrite_query(query);
        let vector = self
            .embedding_client
            .generate_embeddings(vec![query.clone()])
            .await?
            .pop()
            .ok_or(QueryError::EmptyEmbedding)?;

        let hits = self
            .qdrant
            .search_points(&index.collection, vector, self.top_k)
            .await?;
        let context = hits
            .iter()
            .filter_map(|hit| hit.text())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR);
        tracing::debug!(session_id, retrieved = hits.len(), "Retrieved context");

        let answer = self.llm.complete(&build_prompt(&context, &query)).await?;
        Ok(answer)
    }
}
