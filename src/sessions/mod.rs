//! Upload session bookkeeping.
//!
//! Sessions map an integer id to the index built for one uploaded PDF. Ids start at 0, grow by
//! one per successful upload and are never reused while the process lives. Nothing is evicted.

use crate::indexing::VectorIndex;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Filenames containing this marker are hidden from [`SessionStore::list_filenames`].
pub const HIDDEN_FILENAME_MARKER: &str = "ABC";

/// Errors returned by session lookups.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No index was registered under the requested id.
    #[error("Index {0} not initialized")]
    NotInitialized(usize),
}

/// Registered upload: original filename plus the index built from it.
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Identifier handed back to the uploader.
    pub session_id: usize,
    /// Name of the uploaded file.
    pub filename: String,
    /// Index built from the upload.
    pub index: Arc<VectorIndex>,
}

/// Storage for upload sessions and Excel upload records.
pub trait SessionStore: Send + Sync {
    /// Register a freshly built index and return its session id.
    fn put(&self, filename: String, index: VectorIndex) -> usize;

    /// Fetch the index registered under `session_id`.
    fn get(&self, session_id: usize) -> Result<Arc<VectorIndex>, SessionError>;

    /// Record the table-name stem of an Excel upload.
    fn record_excel(&self, table_name: String);

    /// Excel table-name stems in upload order, duplicates included.
    fn excel_names(&self) -> Vec<String>;

    /// PDF filenames followed by Excel names, deduplicated in first-seen order, with
    /// names containing [`HIDDEN_FILENAME_MARKER`] removed.
    fn list_filenames(&self) -> Vec<String>;
}

/// Process-memory session store.
#[derive(Default)]
pub struct InMemorySessionStore {
    next_id: AtomicUsize,
    sessions: RwLock<HashMap<usize, UploadSession>>,
    excels: RwLock<Vec<String>>,
}

impl InMemorySessionStore {
    /// Create an empty store whose first session id is 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn put(&self, filename: String, index: VectorIndex) -> usize {
        let session_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session_id, filename = %filename, collection = %index.collection, "Registering session");
        self.sessions.write().insert(
            session_id,
            UploadSession {
                session_id,
                filename,
                index: Arc::new(index),
            },
        );
        session_id
    }

    fn get(&self, session_id: usize) -> Result<Arc<VectorIndex>, SessionError> {
        self.sessions
            .read()
            .get(&session_id)
            .map(|session| session.index.clone())
            .ok_or(SessionError::NotInitialized(session_id))
    }

    fn record_excel(&self, table_name: String) {
        self.excels.write().push(table_name);
    }

    fn excel_names(&self) -> Vec<String> {
        self.excels.read().clone()
    }

    fn list_filenames(&self) -> Vec<String> {
        let mut pdfs: Vec<(usize, String)> = self
            .sessions
            .read()
            .values()
            .map(|session| (session.session_id, session.filename.clone()))
            .collect();
        pdfs.sort_by_key(|(session_id, _)| *session_id);

        let excels = self.excels.read().clone();
        let mut seen = HashSet::new();
        pdfs.into_iter()
            .map(|(_, filename)| filename)
            .chain(excels)
            .filter(|name| !name.contains(HIDDEN_FILENAME_MARKER))
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }
}

/// Text before the first `.` of a filename.
pub fn filename_stem(filename: &str) -> &str {
    filename.split('.').next().unwrap_or(filename)
}
