// ETL job
// Builds the vector collection once from the raw FAQ question/answer mapping


use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, IsTerminal};
use std::path::Path;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use crate::config::{DocumentConfig, Settings};
use crate::database::{FaqRecord, VectorStore};
use crate::documents::{FaqDocument, LengthStats, filter_outliers};
use crate::embeddings::{ChunkingConfig, DocumentChunk, Embedder, chunk_documents};
use crate::{FaqError, Result};

/// Raw FAQ data: question text mapped to answer text
pub type RawFaqData = BTreeMap<String, String>;

/// What an ETL run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtlOutcome {
    /// The collection already existed; nothing was written
    Skipped,
    Loaded { documents: usize, chunks: usize },
}

impl std::fmt::Display for EtlOutcome {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped (collection already exists)"),
            Self::Loaded { documents, chunks } => {
                write!(f, "loaded {} documents as {} chunks", documents, chunks)
            }
        }
    }
}

/// Logs a step's start and elapsed time at debug level
struct StepTimer {
    step: &'static str,
    start: Instant,
}

impl StepTimer {
    fn start(step: &'static str) -> Self {
        debug!("Starting {}", step);
        Self {
            step,
            start: Instant::now(),
        }
    }

    fn finish(self) {
        debug!(
            "Finished {} in {:.2} seconds",
            self.step,
            self.start.elapsed().as_secs_f64()
        );
    }
}

/// A vector database path counts as populated when it is a non-empty directory
#[inline]
pub fn collection_exists(db_path: &Path) -> bool {
    std::fs::read_dir(db_path).is_ok_and(|mut entries| entries.next().is_some())
}

/// Run the whole ETL unless the collection is already populated
#[inline]
pub async fn extract_transform_load(
    settings: &Settings,
    embedder: &dyn Embedder,
) -> Result<EtlOutcome> {
    let db_path = settings.vector_db_path();
    if collection_exists(&db_path) {
        debug!("Already existing database from {}", db_path.display());
        debug!("Skip saving the database");
        return Ok(EtlOutcome::Skipped);
    }

    let raw_data = load_raw_data(&settings.raw_data_path())?;
    let documents = preprocess_raw_data(&raw_data);
    let chunks = save_db(settings, &documents, embedder).await?;

    let outcome = EtlOutcome::Loaded {
        documents: documents.len(),
        chunks,
    };
    info!("ETL finished: {}", outcome);
    Ok(outcome)
}

/// Load the raw mapping from a pickle or JSON file
#[inline]
pub fn load_raw_data(path: &Path) -> Result<RawFaqData> {
    let timer = StepTimer::start("load_raw_data");

    if !path.is_file() {
        return Err(FaqError::RawDataNotFound(path.to_path_buf()));
    }

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let reader = BufReader::new(File::open(path)?);

    let raw_data: RawFaqData = match extension.as_deref() {
        Some("pkl" | "pickle") => serde_pickle::from_reader(reader, serde_pickle::DeOptions::new())
            .map_err(|e| {
                FaqError::Serialization(format!("Failed to read pickle {}: {}", path.display(), e))
            })?,
        Some("json") => serde_json::from_reader(reader).map_err(|e| {
            FaqError::Serialization(format!("Failed to read JSON {}: {}", path.display(), e))
        })?,
        _ => return Err(FaqError::UnsupportedFormat(path.to_path_buf())),
    };

    debug!("Loaded {} raw FAQ entries from {}", raw_data.len(), path.display());
    timer.finish();
    Ok(raw_data)
}

/// Clean and parse every pair, then drop length outliers
#[inline]
pub fn preprocess_raw_data(raw_data: &RawFaqData) -> Vec<FaqDocument> {
    let timer = StepTimer::start("preprocess_raw_data");

    let documents: Vec<FaqDocument> = raw_data
        .iter()
        .map(|(question, answer)| FaqDocument::from_raw(question, answer))
        .collect();

    let report = filter_outliers(documents);
    debug!("The number of too short docs: {}", report.too_short.len());
    debug!("The number of too long docs: {}", report.too_long.len());
    debug!("The number of docs remaining: {}", report.kept.len());

    if let Some(stats) = LengthStats::from_documents(&report.kept) {
        debug!("Minimum length: {}", stats.min);
        debug!("Maximum length: {}", stats.max);
        debug!("Mean length: {}", stats.mean);
    }

    timer.finish();
    report.kept
}

fn progress_bar(len: usize) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let style = ProgressStyle::with_template("{bar:40} [{pos}/{len}] Embedding chunks {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    ProgressBar::new(len as u64).with_style(style)
}

/// Chunk, embed and store documents; returns the number of stored chunks
async fn save_db(
    settings: &Settings,
    documents: &[FaqDocument],
    embedder: &dyn Embedder,
) -> Result<usize> {
    let timer = StepTimer::start("save_db");

    let chunks = chunk_documents(
        documents,
        &ChunkingConfig::from(&settings.retrieval),
        &settings.document,
    );
    if chunks.is_empty() {
        warn!("No documents survived preprocessing, nothing to store");
        timer.finish();
        return Ok(0);
    }

    let records = embed_chunks(
        &chunks,
        embedder,
        &settings.document,
        settings.openai.batch_size.max(1) as usize,
    )
    .await?;

    let store =
        VectorStore::create(settings.vector_db_path(), &settings.data.collection_name).await?;
    store.store_records(&records).await?;

    info!(
        "Stored {} chunks in collection '{}' at {}",
        records.len(),
        store.collection_name(),
        store.path().display()
    );
    timer.finish();
    Ok(records.len())
}

async fn embed_chunks(
    chunks: &[DocumentChunk],
    embedder: &dyn Embedder,
    document_config: &DocumentConfig,
    batch_size: usize,
) -> Result<Vec<FaqRecord>> {
    let bar = progress_bar(chunks.len());
    let mut records = Vec::with_capacity(chunks.len());

    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch
            .iter()
            .map(|chunk| chunk.embed_content(document_config))
            .collect();
        let vectors = embedder.embed_documents(&texts).await?;

        if vectors.len() != batch.len() {
            bar.abandon();
            return Err(FaqError::Embedding(format!(
                "Expected {} embeddings, got {}",
                batch.len(),
                vectors.len()
            )));
        }

        records.extend(
            batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| FaqRecord::from_chunk(chunk, vector)),
        );
        bar.inc(batch.len() as u64);
    }

    bar.finish_and_clear();
    Ok(records)
}
