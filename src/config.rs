use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_CONVERSION_API_URL: &str = "https://api.pspdfkit.com/build";
const DEFAULT_BULK_COLLECTION: &str = "quickstart";
const DEFAULT_CHUNK_SIZE: usize = 1024;
const DEFAULT_CHUNK_OVERLAP: usize = 20;
const DEFAULT_SIMILARITY_TOP_K: usize = 2;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the finfunc server.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Azure OpenAI resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub azure_openai_endpoint: String,
    /// Key sent in the `api-key` header to Azure OpenAI.
    pub azure_openai_api_key: String,
    /// Chat deployment that answers queries.
    pub azure_openai_deployment: String,
    /// Model identifier reported alongside the deployment.
    pub azure_openai_model: String,
    /// Value of the `api-version` query parameter.
    pub azure_openai_api_version: String,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Persistent collection used by the bulk indexing path.
    pub qdrant_bulk_collection: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model (or Azure deployment) identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Token budget for each chunk.
    pub text_splitter_chunk_size: usize,
    /// Token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: usize,
    /// Number of chunks retrieved per query.
    pub similarity_top_k: usize,
    /// Endpoint of the document conversion service.
    pub conversion_api_url: String,
    /// Bearer token for the document conversion service.
    pub conversion_api_key: String,
    /// Directory receiving Excel uploads and converted PDFs.
    pub upload_dir: PathBuf,
    /// SQLite database holding the `finfunc_record` table.
    pub audit_database_path: PathBuf,
    /// Maximum accepted multipart body size in bytes.
    pub max_upload_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends for the indexing pipeline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Azure OpenAI embeddings deployment.
    Azure,
    /// Deterministic byte hashing, for offline use.
    Hash,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            azure_openai_endpoint: load_env("AZURE_OPENAI_ENDPOINT")?,
            azure_openai_api_key: load_env("AZURE_OPENAI_API_KEY")?,
            azure_openai_deployment: load_env("AZURE_OPENAI_DEPLOYMENT")?,
            azure_openai_model: load_env("AZURE_OPENAI_MODEL")?,
            azure_openai_api_version: load_env("AZURE_OPENAI_API_VERSION")?,
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            qdrant_bulk_collection: load_env_optional("QDRANT_BULK_COLLECTION")
                .unwrap_or_else(|| DEFAULT_BULK_COLLECTION.to_string()),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            text_splitter_chunk_size: parse_optional("TEXT_SPLITTER_CHUNK_SIZE")?
                .unwrap_or(DEFAULT_CHUNK_SIZE),
            text_splitter_chunk_overlap: parse_optional("TEXT_SPLITTER_CHUNK_OVERLAP")?
                .unwrap_or(DEFAULT_CHUNK_OVERLAP),
            similarity_top_k: parse_optional("SIMILARITY_TOP_K")?
                .unwrap_or(DEFAULT_SIMILARITY_TOP_K),
            conversion_api_url: load_env_optional("CONVERSION_API_URL")
                .unwrap_or_else(|| DEFAULT_CONVERSION_API_URL.to_string()),
            conversion_api_key: load_env("PSPDFKIT_API_KEY")?,
            upload_dir: load_env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            audit_database_path: load_env("AUDIT_DATABASE_PATH").map(PathBuf::from)?,
            max_upload_bytes: parse_optional("MAX_UPLOAD_BYTES")?
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "azure" | "openai" => Ok(Self::Azure),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        deployment = %config.azure_openai_deployment,
        model = %config.azure_openai_model,
        embedding_provider = ?config.embedding_provider,
        upload_dir = %config.upload_dir.display(),
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
