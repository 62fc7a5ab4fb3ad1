//! REST client for the Qdrant collections and points APIs.
//!
//! Only the calls this service needs are wrapped: collection creation (cosine distance), upsert
//! with `wait=true`, and the universal `points/query` search endpoint.

use crate::config::Config;
use crate::qdrant::types::{PointInsert, QdrantError, ScoredPoint, SearchEnvelope};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde_json::json;
use uuid::Uuid;

/// Cloneable handle to one Qdrant deployment.
#[derive(Clone)]
pub struct QdrantService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl QdrantService {
    /// Construct a client from the loaded configuration.
    pub fn new(config: &Config) -> Result<Self, QdrantError> {
        let service = Self::with_base_url(&config.qdrant_url, config.qdrant_api_key.clone())?;
        tracing::debug!(
            url = %service.base_url,
            has_api_key = service.api_key.is_some(),
            "Initialized Qdrant HTTP client"
        );
        Ok(service)
    }

    /// Construct a client against an explicit base URL.
    pub fn with_base_url(base_url: &str, api_key: Option<String>) -> Result<Self, QdrantError> {
        let mut parsed =
            Url::parse(base_url).map_err(|error| QdrantError::InvalidUrl(error.to_string()))?;
        let trimmed = parsed.path().trim_end_matches('/').to_string();
        parsed.set_path(&trimmed);

        Ok(Self {
            client: Client::builder().user_agent("finfunc/qdrant").build()?,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    /// Create `collection_name` unless it already exists.
    pub async fn create_collection_if_not_exists(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        if self.collection_exists(collection_name).await? {
            tracing::debug!(collection = collection_name, "Collection already present");
            return Ok(());
        }
        self.create_collection(collection_name, vector_size).await
    }

    /// Create a collection of `vector_size`-dimensional vectors compared by cosine distance.
    pub async fn create_collection(
        &self,
        collection_name: &str,
        vector_size: u64,
    ) -> Result<(), QdrantError> {
        let body = json!({ "vectors": { "size": vector_size, "distance": "Cosine" } });
        self.send(
            self.request(Method::PUT, &format!("collections/{collection_name}"))
                .json(&body),
        )
        .await?;
        tracing::debug!(collection = collection_name, vector_size, "Collection created");
        Ok(())
    }

    /// Upsert `points`, giving each a fresh UUID. Returns how many were written.
    pub async fn upsert_points(
        &self,
        collection_name: &str,
        points: Vec<PointInsert>,
    ) -> Result<usize, QdrantError> {
        if points.is_empty() {
            return Ok(0);
        }

        let count = points.len();
        let points: Vec<_> = points
            .into_iter()
            .map(|point| {
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "vector": point.vector,
                    "payload": point.payload,
                })
            })
            .collect();

        self.send(
            self.request(Method::PUT, &format!("collections/{collection_name}/points"))
                .query(&[("wait", true)])
                .json(&json!({ "points": points })),
        )
        .await?;
        tracing::debug!(collection = collection_name, points = count, "Points upserted");
        Ok(count)
    }

    /// Return the `limit` nearest points to `vector`, payloads included.
    pub async fn search_points(
        &self,
        collection_name: &str,
        vector: Vec<f32>,
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, QdrantError> {
        let body = json!({ "query": vector, "limit": limit, "with_payload": true });
        let response = self
            .send(
                self.request(
                    Method::POST,
                    &format!("collections/{collection_name}/points/query"),
                )
                .json(&body),
            )
            .await?;

        let envelope: SearchEnvelope = response.json().await?;
        Ok(envelope.into_hits())
    }

    async fn collection_exists(&self, collection_name: &str) -> Result<bool, QdrantError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection_name}"))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        into_success(response).await.map(|_| true)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self
            .client
            .request(method, format!("{}/{path}", self.base_url));
        match &self.api_key {
            Some(api_key) => request.header("api-key", api_key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, QdrantError> {
        into_success(request.send().await?).await
    }
}

async fn into_success(response: Response) -> Result<Response, QdrantError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let error = QdrantError::UnexpectedStatus { status, body };
    tracing::error!(error = %error, "Qdrant request failed");
    Err(error)
}
