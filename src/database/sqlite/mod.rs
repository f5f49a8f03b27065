use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::database::sqlite::models::{
    CandidateFilter, DecodedRecord, DeletedVectors, DocumentStatistics, DocumentType,
    EmbeddingFormat, NewVectorRecord, StoreStatistics, VectorRow,
};
use crate::database::sqlite::queries::VectorQueries;


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Vector record store backed by SQLite
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
    embedding_format: EmbeddingFormat,
}

impl Database {
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self {
            pool,
            embedding_format: EmbeddingFormat::default(),
        };
        database.run_migrations().await?;

        Ok(database)
    }

    pub async fn initialize_in_dir(dir: &Path, file_name: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;

        Self::new(dir.join(file_name)).await
    }

    /// Choose how new embeddings are written
    pub fn with_embedding_format(mut self, format: EmbeddingFormat) -> Self {
        self.embedding_format = format;
        self
    }

    pub fn embedding_format(&self) -> EmbeddingFormat {
        self.embedding_format
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    pub async fn upsert(&self, record: &NewVectorRecord) -> Result<DecodedRecord> {
        let row = VectorQueries::upsert(&self.pool, record, self.embedding_format).await?;
        Ok(row.decode())
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<DecodedRecord>> {
        Ok(VectorQueries::get_by_id(&self.pool, id)
            .await?
            .map(VectorRow::decode))
    }

    pub async fn update_embedding(&self, id: &str, embedding: Option<&[f32]>) -> Result<bool> {
        VectorQueries::update_embedding(&self.pool, id, embedding, self.embedding_format).await
    }

    pub async fn fetch_by_document(
        &self,
        document_id: &str,
        document_type: DocumentType,
    ) -> Result<Vec<DecodedRecord>> {
        let rows = VectorQueries::list_by_document(&self.pool, document_id, Some(document_type))
            .await?;
        Ok(decode_all(rows))
    }

    /// Candidate pool for similarity search
    pub async fn fetch_all_embedded(&self, filter: &CandidateFilter) -> Result<Vec<DecodedRecord>> {
        let rows = VectorQueries::list_embedded(&self.pool, filter).await?;
        Ok(decode_all(rows))
    }

    pub async fn fetch_pending(&self) -> Result<Vec<DecodedRecord>> {
        let rows = VectorQueries::list_pending(&self.pool).await?;
        Ok(decode_all(rows))
    }

    /// Idempotent: deleting an already deleted document reports zero rows
    pub async fn soft_delete(
        &self,
        document_id: &str,
        document_type: DocumentType,
    ) -> Result<DeletedVectors> {
        let deleted = VectorQueries::soft_delete(&self.pool, document_id, document_type).await?;
        info!(
            "Soft deleted {} vectors for {} {}",
            deleted.count(),
            document_type,
            document_id
        );
        Ok(deleted)
    }

    /// Soft delete the document's vectors whose type is no longer produced
    pub async fn retire_stale_vectors(
        &self,
        document_id: &str,
        document_type: DocumentType,
        current_types: &[String],
    ) -> Result<DeletedVectors> {
        let retired =
            VectorQueries::soft_delete_except(&self.pool, document_id, document_type, current_types)
                .await?;
        if retired.count() > 0 {
            info!(
                "Retired stale vectors {:?} for {} {}",
                retired.vector_types, document_type, document_id
            );
        }
        Ok(retired)
    }

    pub async fn document_statistics(
        &self,
        document_id: &str,
        document_type: Option<DocumentType>,
    ) -> Result<DocumentStatistics> {
        let rows = VectorQueries::list_by_document(&self.pool, document_id, document_type).await?;
        Ok(DocumentStatistics::from_rows(&rows))
    }

    pub async fn store_statistics(&self) -> Result<StoreStatistics> {
        let by_type = VectorQueries::count_by_type(&self.pool).await?;
        Ok(StoreStatistics {
            total_vectors: by_type.iter().map(|c| c.total).sum(),
            embedded_vectors: by_type.iter().map(|c| c.embedded).sum(),
            by_type,
        })
    }

    pub async fn vector_support(&self) -> bool {
        VectorQueries::probe_embedding_column(&self.pool).await
    }
}

fn decode_all(rows: Vec<VectorRow>) -> Vec<DecodedRecord> {
    rows.into_iter()
        .map(|row| {
            let decoded = row.decode();
            if let Err(malformed) = &decoded {
                warn!(
                    "Vector {} has an unreadable embedding: {}",
                    malformed.record.id, malformed.error
                );
            }
            decoded
        })
        .collect()
}
