//! Query audit trail.
//!
//! Each answered question becomes one row in `finfunc_record(MessageID, UserQuestion, Timestamp)`.
//! The table is provisioned outside this service; rows are written and never read back.

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

const INSERT_RECORD: &str =
    "INSERT INTO finfunc_record (MessageID, UserQuestion, Timestamp) VALUES (?1, ?2, ?3)";

/// Errors raised while writing audit rows.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Database open or insert failed.
    #[error("Audit database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Timestamp could not be rendered.
    #[error("Failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    /// Blocking insert task was cancelled or panicked.
    #[error("Audit task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One audited question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryLogEntry {
    /// Fresh identifier for the row.
    pub message_id: Uuid,
    /// Question as submitted by the caller.
    pub question: String,
    /// When the question was recorded.
    pub timestamp: OffsetDateTime,
}

impl QueryLogEntry {
    /// Stamp `question` with a new id and the current time.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            question: question.into(),
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Destination for audit rows.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one entry.
    async fn record(&self, entry: QueryLogEntry) -> Result<(), AuditError>;
}

/// SQLite-backed sink sharing a single connection across requests.
#[derive(Clone)]
pub struct SqliteAuditSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAuditSink {
    /// Open (or create) the database file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AuditError> {
        let conn = Connection::open(path)?;
        Ok(Self::from_connection(conn))
    }

    /// Wrap an already opened connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, entry: QueryLogEntry) -> Result<(), AuditError> {
        let conn = self.conn.clone();
        let message_id = entry.message_id;
        tokio::task::spawn_blocking(move || -> Result<(), AuditError> {
            let timestamp = entry.timestamp.format(&Rfc3339)?;
            conn.lock().execute(
                INSERT_RECORD,
                params![entry.message_id.to_string(), entry.question, timestamp],
            )?;
            Ok(())
        })
        .await??;
        tracing::debug!(message_id = %message_id, "User query recorded");
        Ok(())
    }
}
