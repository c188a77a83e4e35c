
use super::FaqRecord;
use crate::embeddings::DocumentChunk;
use crate::{FaqError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Vector database store using LanceDB for similarity search
pub struct VectorStore {
    connection: Connection,
    path: PathBuf,
    table_name: String,
}

/// Search result from vector similarity search
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub chunk: DocumentChunk,
    /// Cosine similarity, higher is better
    pub similarity_score: f32,
    pub distance: f32,
}

impl std::fmt::Debug for VectorStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("path", &self.path)
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Open the collection for writing, creating the database directory if needed
    #[inline]
    pub async fn create<P: AsRef<Path>>(path: P, collection: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&path).map_err(|e| {
            FaqError::Database(format!("Failed to create vector database directory: {}", e))
        })?;
        Self::connect(path, collection).await
    }

    /// Open an existing vector database
    ///
    /// A database directory that exists but lacks the collection opens fine and
    /// behaves as an empty collection.
    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P, collection: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_dir() {
            return Err(FaqError::CollectionNotFound(path));
        }
        Self::connect(path, collection).await
    }

    async fn connect(path: PathBuf, collection: &str) -> Result<Self> {
        debug!("Connecting to LanceDB at path: {}", path.display());

        let uri = path.to_string_lossy().into_owned();
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to connect to LanceDB: {}", e)))?;

        Ok(Self {
            connection,
            path,
            table_name: collection.to_string(),
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn collection_name(&self) -> &str {
        &self.table_name
    }

    /// Whether the collection table has been created
    #[inline]
    pub async fn collection_exists(&self) -> Result<bool> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to list tables: {}", e)))?;

        Ok(table_names.contains(&self.table_name))
    }

    async fn open_existing_table(&self) -> Result<Option<Table>> {
        if !self.collection_exists().await? {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to open table: {}", e)))?;

        Ok(Some(table))
    }

    /// Read the vector dimension from the table schema
    async fn existing_vector_dimension(table: &Table) -> Result<usize> {
        let schema = table
            .schema()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to get table schema: {}", e)))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                FaqError::Database("Could not find vector column or determine dimension".to_string())
            })
    }

    /// Create schema with the specified vector dimension
    fn create_schema(vector_dim: usize) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, false)),
                    vector_dim as i32,
                ),
                false,
            ),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::UInt32, false),
            Field::new("content", DataType::Utf8, false),
            Field::new("question", DataType::Utf8, false),
            Field::new("answer", DataType::Utf8, false),
            Field::new("categories", DataType::Utf8, false),
            Field::new("token_count", DataType::UInt32, false),
            Field::new("created_at", DataType::Utf8, false),
        ]))
    }

    /// Store embedded chunks, creating the collection on first insert
    #[inline]
    pub async fn store_records(&self, records: &[FaqRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No records to store");
            return Ok(());
        };

        let vector_dim = first.vector.len();
        if vector_dim == 0 {
            return Err(FaqError::Database("Cannot store empty vectors".to_string()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != vector_dim) {
            return Err(FaqError::Database(format!(
                "Record {} has {} dimensions, expected {}",
                bad.id,
                bad.vector.len(),
                vector_dim
            )));
        }

        debug!("Storing batch of {} records", records.len());

        let table = match self.open_existing_table().await? {
            Some(table) => {
                let existing_dim = Self::existing_vector_dimension(&table).await?;
                if existing_dim != vector_dim {
                    return Err(FaqError::Database(format!(
                        "Collection '{}' stores {} dimensional vectors, got {}",
                        self.table_name, existing_dim, vector_dim
                    )));
                }
                table
            }
            None => {
                info!(
                    "Creating collection '{}' with {} dimensions",
                    self.table_name, vector_dim
                );
                self.connection
                    .create_empty_table(&self.table_name, Self::create_schema(vector_dim))
                    .execute()
                    .await
                    .map_err(|e| FaqError::Database(format!("Failed to create table: {}", e)))?
            }
        };

        let record_batch = Self::create_record_batch(records, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to insert records: {}", e)))?;

        debug!("Stored {} records", records.len());
        Ok(())
    }

    /// Create a RecordBatch from FAQ records
    fn create_record_batch(records: &[FaqRecord], vector_dim: usize) -> Result<RecordBatch> {
        let len = records.len();

        let mut ids = Vec::with_capacity(len);
        let mut flat_values = Vec::with_capacity(len * vector_dim);
        let mut document_ids = Vec::with_capacity(len);
        let mut chunk_indices = Vec::with_capacity(len);
        let mut contents = Vec::with_capacity(len);
        let mut questions = Vec::with_capacity(len);
        let mut answers = Vec::with_capacity(len);
        let mut categories = Vec::with_capacity(len);
        let mut token_counts = Vec::with_capacity(len);
        let mut created_ats = Vec::with_capacity(len);

        for record in records {
            ids.push(record.id.as_str());
            flat_values.extend_from_slice(&record.vector);
            document_ids.push(record.document_id.as_str());
            chunk_indices.push(record.chunk_index);
            contents.push(record.content.as_str());
            questions.push(record.question.as_str());
            answers.push(record.answer.as_str());
            categories.push(record.categories.as_str());
            token_counts.push(record.token_count);
            created_ats.push(record.created_at.as_str());
        }

        let values_array = Float32Array::from(flat_values);
        let field = Arc::new(Field::new("item", DataType::Float32, false));
        let vector_array =
            FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
                .map_err(|e| {
                    FaqError::Database(format!("Failed to create vector array: {}", e))
                })?;

        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(vector_array),
            Arc::new(StringArray::from(document_ids)),
            Arc::new(UInt32Array::from(chunk_indices)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(questions)),
            Arc::new(StringArray::from(answers)),
            Arc::new(StringArray::from(categories)),
            Arc::new(UInt32Array::from(token_counts)),
            Arc::new(StringArray::from(created_ats)),
        ];

        RecordBatch::try_new(Self::create_schema(vector_dim), arrays)
            .map_err(|e| FaqError::Database(format!("Failed to create record batch: {}", e)))
    }

    /// Find the `limit` chunks closest to the query vector, best first
    ///
    /// A collection that was never created yields no results.
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let Some(table) = self.open_existing_table().await? else {
            warn!(
                "Collection '{}' does not exist at {}, returning no results",
                self.table_name,
                self.path.display()
            );
            return Ok(Vec::new());
        };

        let results = table
            .vector_search(query_vector)
            .map_err(|e| FaqError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to execute search: {}", e)))?;

        let mut search_results = Self::parse_search_results_stream(results).await?;
        search_results.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(search_results)
    }

    /// Parse search results from LanceDB stream into SearchResult structs
    async fn parse_search_results_stream(
        mut results: lancedb::arrow::SendableRecordBatchStream,
    ) -> Result<Vec<SearchResult>> {
        let mut search_results = Vec::new();

        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| FaqError::Database(format!("Failed to read result stream: {}", e)))?
        {
            search_results.extend(Self::parse_search_batch(&batch)?);
        }

        debug!("Parsed {} search results from stream", search_results.len());
        Ok(search_results)
    }

    /// Parse a single record batch from search results
    fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchResult>> {
        let document_ids = string_column(batch, "document_id")?;
        let chunk_indices = u32_column(batch, "chunk_index")?;
        let contents = string_column(batch, "content")?;
        let questions = string_column(batch, "question")?;
        let answers = string_column(batch, "answer")?;
        let categories = string_column(batch, "categories")?;
        let token_counts = u32_column(batch, "token_count")?;

        let distances = batch
            .column_by_name("_distance")
            .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

        let results = (0..batch.num_rows())
            .map(|row| {
                let distance = distances
                    .map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

                SearchResult {
                    chunk: DocumentChunk {
                        document_id: document_ids.value(row).to_string(),
                        chunk_index: chunk_indices.value(row) as usize,
                        text: contents.value(row).to_string(),
                        metadata: crate::documents::DocumentMetadata {
                            question: questions.value(row).to_string(),
                            answer: answers.value(row).to_string(),
                            categories: categories.value(row).to_string(),
                        },
                        token_count: token_counts.value(row) as usize,
                    },
                    similarity_score: 1.0 - distance,
                    distance,
                }
            })
            .collect();

        Ok(results)
    }

    /// Number of records in the collection, zero when it was never created
    #[inline]
    pub async fn count_records(&self) -> Result<u64> {
        let Some(table) = self.open_existing_table().await? else {
            return Ok(0);
        };

        let count = table
            .count_rows(None)
            .await
            .map_err(|e| FaqError::Database(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| FaqError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| FaqError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| FaqError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| FaqError::Database(format!("Invalid {} column type", name)))
}
