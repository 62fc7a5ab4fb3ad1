//! Request and response shapes for the Qdrant REST API.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors returned while talking to Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL could not be parsed.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// Transport failure or undecodable body.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant answered with a non-success status.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// Status returned by Qdrant.
        status: StatusCode,
        /// Response body, as returned.
        body: String,
    },
}

/// Vector plus payload awaiting upsert. The client assigns the point id.
#[derive(Debug, Clone)]
pub struct PointInsert {
    /// Embedding of the chunk.
    pub vector: Vec<f32>,
    /// Payload stored next to the vector (`text`, `file_name`, `page_label`).
    pub payload: Map<String, Value>,
}

/// One similarity-search hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    /// Point id rendered as text.
    pub id: String,
    /// Cosine similarity reported by Qdrant.
    pub score: f32,
    /// Stored payload, when requested.
    pub payload: Option<Map<String, Value>>,
}

impl ScoredPoint {
    /// Chunk text stored in the payload, if any.
    pub fn text(&self) -> Option<&str> {
        self.payload
            .as_ref()
            .and_then(|payload| payload.get("text"))
            .and_then(Value::as_str)
    }
}

/// Envelope of `POST /collections/{name}/points/query`.
///
/// Older servers return the hit list directly under `result`; newer ones nest it in
/// `result.points`.
#[derive(Deserialize)]
pub(crate) struct SearchEnvelope {
    result: SearchResult,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SearchResult {
    Bare(Vec<RawHit>),
    Nested {
        #[serde(default)]
        points: Vec<RawHit>,
    },
}

#[derive(Deserialize)]
struct RawHit {
    id: Value,
    score: f32,
    #[serde(default)]
    payload: Option<Map<String, Value>>,
}

impl SearchEnvelope {
    /// Flatten the envelope into scored hits, preserving Qdrant's ranking.
    pub(crate) fn into_hits(self) -> Vec<ScoredPoint> {
        let hits = match self.result {
            SearchResult::Bare(hits) | SearchResult::Nested { points: hits } => hits,
        };
        hits.into_iter().map(ScoredPoint::from).collect()
    }
}

impl From<RawHit> for ScoredPoint {
    fn from(hit: RawHit) -> Self {
        let id = match hit.id {
            Value::String(text) => text,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        Self {
            id,
            score: hit.score,
            payload: hit.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_accepts_bare_and_nested_results() {
        let bare: SearchEnvelope = serde_json::from_value(json!({
            "result": [{ "id": 7, "score": 0.5, "payload": { "text": "bare" } }]
        }))
        .expect("bare envelope");
        let nested: SearchEnvelope = serde_json::from_value(json!({
            "result": { "points": [{ "id": "p-1", "score": 0.9 }] }
        }))
        .expect("nested envelope");

        let bare = bare.into_hits();
        assert_eq!(bare[0].id, "7");
        assert_eq!(bare[0].text(), Some("bare"));

        let nested = nested.into_hits();
        assert_eq!(nested[0].id, "p-1");
        assert_eq!(nested[0].text(), None);
    }
}
