//! Orchestration of upload → convert → index → query.

use crate::{
    audit::{AuditError, AuditSink, QueryLogEntry, SqliteAuditSink},
    config::Config,
    conversion::{ConversionClient, ConversionError},
    documents::{self, DocumentError},
    embedding::get_embedding_client,
    indexing::{IndexBuilder, IndexError, IndexSettings},
    llm::get_llm_client,
    qdrant::{QdrantError, QdrantService},
    query::{QueryEngine, QueryError},
    sessions::{InMemorySessionStore, SessionStore, filename_stem},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by the orchestration layer.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Upload could not be written to disk.
    #[error("Failed to store upload {path}: {source}")]
    Storage {
        /// Destination path.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// Document conversion failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// PDF parsing failed.
    #[error(transparent)]
    Document(#[from] DocumentError),
    /// Index construction failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Query answering failed.
    #[error(transparent)]
    Query(#[from] QueryError),
    /// Audit insert failed.
    #[error(transparent)]
    Audit(#[from] AuditError),
    /// Vector store client could not be constructed.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Background parsing task failed.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ServiceError {
    /// Whether the error should bring the process down.
    ///
    /// Only an explicit rejection from the conversion service qualifies.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Conversion(ConversionError::Rejected { .. }))
    }
}

/// Outcome of an Excel upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelUpload {
    /// Name of the uploaded file.
    pub filename: String,
    /// Where the upload was written before conversion.
    pub file_location: PathBuf,
    /// Filename stem recorded as the table name.
    pub table_name: String,
    /// Base64 of the converted PDF, when it could be read back.
    pub pdf_base64: Option<String>,
}

/// Operations exposed to the HTTP surface.
#[async_trait]
pub trait FinfuncApi: Send + Sync {
    /// Store an Excel upload, record its table name and convert it to PDF.
    async fn upload_excel(&self, filename: String, bytes: Vec<u8>)
    -> Result<ExcelUpload, ServiceError>;

    /// Table-name stems of every Excel upload, in upload order.
    fn excel_names(&self) -> Vec<String>;

    /// Index an uploaded PDF and return its session id.
    async fn upload_pdf(&self, filename: String, bytes: Vec<u8>) -> Result<usize, ServiceError>;

    /// Answer `query` against session `session_id` and audit the question.
    async fn query(&self, session_id: usize, query: String) -> Result<String, ServiceError>;

    /// Visible PDF filenames and Excel names.
    fn list_filenames(&self) -> Vec<String>;
}

/// Production implementation of [`FinfuncApi`].
pub struct FinfuncService {
    sessions: Arc<dyn SessionStore>,
    converter: ConversionClient,
    builder: IndexBuilder,
    engine: QueryEngine,
    audit: Arc<dyn AuditSink>,
    upload_dir: PathBuf,
}

impl FinfuncService {
    /// Build the service and its collaborators from configuration.
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let qdrant = QdrantService::new(config)?;
        let embedding_client = get_embedding_client(config);
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let builder = IndexBuilder::new(
            embedding_client.clone(),
            qdrant.clone(),
            IndexSettings::from_config(config),
        );
        let engine = QueryEngine::new(
            sessions.clone(),
            embedding_client,
            qdrant,
            get_llm_client(config),
            config.similarity_top_k,
        );
        let audit = Arc::new(SqliteAuditSink::open(&config.audit_database_path)?);
        tracing::info!(
            audit_database = %config.audit_database_path.display(),
            "Finfunc service initialized"
        );

        Ok(Self::from_parts(
            sessions,
            ConversionClient::from_config(config),
            builder,
            engine,
            audit,
            config.upload_dir.clone(),
        ))
    }

    /// Assemble the service from explicit collaborators.
    pub fn from_parts(
        sessions: Arc<dyn SessionStore>,
        converter: ConversionClient,
        builder: IndexBuilder,
        engine: QueryEngine,
        audit: Arc<dyn AuditSink>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            sessions,
            converter,
            builder,
            engine,
            audit,
            upload_dir,
        }
    }
}

#[async_trait]
impl FinfuncApi for FinfuncService {
    async fn upload_excel(
        &self,
        filename: String,
        bytes: Vec<u8>,
    ) -> Result<ExcelUpload, ServiceError> {
        let file_location = self.upload_dir.join(base_name(&filename));
        tokio::fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(|source| storage_error(&self.upload_dir, source))?;
        tokio::fs::write(&file_location, &bytes)
            .await
            .map_err(|source| storage_error(&file_location, source))?;

        let table_name = filename_stem(&filename).to_string();
        self.sessions.record_excel(table_name.clone());
        tracing::info!(filename = %filename, table_name = %table_name, "Excel upload stored");

        let pdf_path = self.converter.convert_to_pdf(&file_location).await?;
        let pdf_base64 = match tokio::fs::read(&pdf_path).await {
            Ok(pdf) => Some(STANDARD.encode(pdf)),
            Err(error) => {
                tracing::error!(path = %pdf_path.display(), error = %error, "Error converting PDF to base64");
                None
            }
        };
        if let Err(error) = tokio::fs::remove_file(&pdf_path).await {
            tracing::warn!(path = %pdf_path.display(), error = %error, "Failed to remove converted PDF");
        }

        Ok(ExcelUpload {
            filename,
            file_location,
            table_name,
            pdf_base64,
        })
    }

    fn excel_names(&self) -> Vec<String> {
        self.sessions
            .excel_names()
            .into_iter()
            .map(|name| filename_stem(&name).to_string())
            .collect()
    }

    async fn upload_pdf(&self, filename: String, bytes: Vec<u8>) -> Result<usize, ServiceError> {
        let parse_name = filename.clone();
        let documents =
            tokio::task::spawn_blocking(move || documents::load_bytes(&bytes, &parse_name))
                .await??;
        tracing::debug!(filename = %filename, documents = documents.len(), "Initializing query engine");

        let index = self.builder.build(documents).await?;
        let session_id = self.sessions.put(filename.clone(), index);
        tracing::info!(session_id, filename = %filename, "PDF indexed");
        Ok(session_id)
    }

    async fn query(&self, session_id: usize, query: String) -> Result<String, ServiceError> {
        let answer = self.engine.answer(&query, session_id).await?;
        self.audit.record(QueryLogEntry::new(query)).await?;
        Ok(answer)
    }

    fn list_filenames(&self) -> Vec<String> {
        let filenames = self.sessions.list_filenames();
        tracing::debug!(?filenames, "Filtered files found");
        filenames
    }
}

fn base_name(filename: &str) -> &str {
    Path::new(filename)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(filename)
}

fn storage_error(path: &Path, source: std::io::Error) -> ServiceError {
    ServiceError::Storage {
        path: path.display().to_string(),
        source,
    }
}
