use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Parser;
use finfunc::{
    config::Config,
    documents::{self, Document},
    embedding::get_embedding_client,
    indexing::{IndexBuilder, IndexSettings},
    logging,
    qdrant::QdrantService,
};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "bulk-index",
    about = "Index every PDF under a directory into the persistent collection"
)]
struct Cli {
    /// Directory scanned recursively for `*.pdf` files.
    #[arg(long)]
    dir: PathBuf,
    /// Target collection; defaults to `QDRANT_BULK_COLLECTION`.
    #[arg(long)]
    collection: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = Config::from_env().context("failed to load configuration")?;
    let collection = cli
        .collection
        .unwrap_or_else(|| config.qdrant_bulk_collection.clone());

    let pdfs = collect_pdfs(&cli.dir)?;
    if pdfs.is_empty() {
        bail!("no PDF files found under {}", cli.dir.display());
    }

    let mut documents: Vec<Document> = Vec::new();
    for path in &pdfs {
        let loaded = documents::load_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        tracing::info!(path = %path.display(), pages = loaded.len(), "Loaded PDF");
        documents.extend(loaded);
    }

    let builder = IndexBuilder::new(
        get_embedding_client(&config),
        QdrantService::new(&config).context("invalid Qdrant configuration")?,
        IndexSettings::from_config(&config),
    );
    let index = builder
        .build_in_collection(&collection, documents)
        .await
        .with_context(|| format!("failed to index into collection {collection}"))?;

    tracing::info!(
        collection = %index.collection,
        files = pdfs.len(),
        documents = index.document_count,
        chunks = index.chunk_count,
        "Bulk indexing complete"
    );
    Ok(())
}

fn collect_pdfs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            pdfs.push(entry.into_path());
        }
    }
    pdfs.sort();
    Ok(pdfs)
}
