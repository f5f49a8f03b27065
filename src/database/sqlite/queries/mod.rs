#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

const SELECT_VECTOR_ROW: &str = r#"
    SELECT id,
           document_id,
           document_type,
           vector_type,
           content,
           typeof(embedding) AS embedding_kind,
           CASE WHEN typeof(embedding) = 'text' THEN embedding END AS embedding_text,
           CASE WHEN typeof(embedding) = 'blob' THEN embedding END AS embedding_blob,
           metadata,
           is_deleted,
           created_at,
           updated_at
    FROM vector_records
"#;

pub struct VectorQueries;

impl VectorQueries {
    /// Insert or replace the active record for `(document_id, document_type, vector_type)`.
    ///
    /// Soft-deleted rows never match the conflict target, so a write after a
    /// delete creates a fresh record. Writing unchanged content without an
    /// embedding keeps the stored one; changed content always replaces it.
    #[inline]
    pub async fn upsert(
        pool: &SqlitePool,
        record: &NewVectorRecord,
        format: EmbeddingFormat,
    ) -> Result<VectorRow> {
        let now = Utc::now();
        let new_id = Uuid::new_v4().to_string();
        let metadata =
            serde_json::to_string(&record.metadata).context("Failed to serialize metadata")?;

        let query = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO vector_records
                (id, document_id, document_type, vector_type, content, embedding, metadata, is_deleted, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            ON CONFLICT (document_id, document_type, vector_type) WHERE is_deleted = 0
            DO UPDATE SET content = excluded.content,
                          embedding = CASE
                              WHEN excluded.embedding IS NULL AND excluded.content = vector_records.content
                              THEN vector_records.embedding
                              ELSE excluded.embedding
                          END,
                          metadata = excluded.metadata,
                          updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(new_id)
        .bind(&record.document_id)
        .bind(record.document_type)
        .bind(&record.vector_type)
        .bind(&record.content);

        let query = match record
            .embedding
            .as_deref()
            .filter(|embedding| !embedding.is_empty())
            .map(|embedding| StoredEmbedding::encode(format, embedding))
        {
            Some(StoredEmbedding::Serialized(text)) => query.bind(text),
            Some(StoredEmbedding::Native(bytes)) => query.bind(bytes),
            None => query.bind(None::<Vec<u8>>),
        };

        let id = query
            .bind(metadata)
            .bind(now)
            .bind(now)
            .fetch_one(pool)
            .await
            .context("Failed to upsert vector record")?;

        debug!(
            "Upserted vector {} for {} {} ({})",
            id, record.document_type, record.document_id, record.vector_type
        );

        Self::get_by_id(pool, &id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve upserted vector record"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: &str) -> Result<Option<VectorRow>> {
        let sql = format!("{SELECT_VECTOR_ROW} WHERE id = ? AND is_deleted = 0");
        let row = sqlx::query_as::<_, VectorRow>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get vector record by id")?;

        Ok(row)
    }

    /// Replace only the embedding of a record and bump `updated_at`
    #[inline]
    pub async fn update_embedding(
        pool: &SqlitePool,
        id: &str,
        embedding: Option<&[f32]>,
        format: EmbeddingFormat,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = match embedding
            .filter(|embedding| !embedding.is_empty())
            .map(|embedding| StoredEmbedding::encode(format, embedding))
        {
            Some(StoredEmbedding::Serialized(text)) => {
                sqlx::query(
                    "UPDATE vector_records SET embedding = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
                )
                .bind(text)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await
            }
            Some(StoredEmbedding::Native(bytes)) => {
                sqlx::query(
                    "UPDATE vector_records SET embedding = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
                )
                .bind(bytes)
                .bind(now)
                .bind(id)
                .execute(pool)
                .await
            }
            // Nothing to store, but the record was still touched
            None => {
                sqlx::query(
                    "UPDATE vector_records SET updated_at = ? WHERE id = ? AND is_deleted = 0",
                )
                .bind(now)
                .bind(id)
                .execute(pool)
                .await
            }
        }
        .context("Failed to update vector embedding")?;

        Ok(result.rows_affected() > 0)
    }

    /// Active records of one document in insertion order
    #[inline]
    pub async fn list_by_document(
        pool: &SqlitePool,
        document_id: &str,
        document_type: Option<DocumentType>,
    ) -> Result<Vec<VectorRow>> {
        let rows = match document_type {
            Some(document_type) => {
                let sql = format!(
                    "{SELECT_VECTOR_ROW} WHERE document_id = ? AND document_type = ? AND is_deleted = 0 ORDER BY rowid"
                );
                sqlx::query_as::<_, VectorRow>(&sql)
                    .bind(document_id)
                    .bind(document_type)
                    .fetch_all(pool)
                    .await
            }
            None => {
                let sql = format!(
                    "{SELECT_VECTOR_ROW} WHERE document_id = ? AND is_deleted = 0 ORDER BY rowid"
                );
                sqlx::query_as::<_, VectorRow>(&sql)
                    .bind(document_id)
                    .fetch_all(pool)
                    .await
            }
        }
        .context("Failed to list vectors for document")?;

        Ok(rows)
    }

    /// Active records that carry an embedding, narrowed by `filter`
    #[inline]
    pub async fn list_embedded(
        pool: &SqlitePool,
        filter: &CandidateFilter,
    ) -> Result<Vec<VectorRow>> {
        let mut conditions = vec!["is_deleted = 0", "embedding IS NOT NULL"];
        let mut values = Vec::new();

        if let Some(document_type) = filter.document_type {
            conditions.push("document_type = ?");
            values.push(document_type.as_str().to_string());
        }

        if let Some(vector_type) = &filter.vector_type {
            conditions.push("vector_type = ?");
            values.push(vector_type.clone());
        }

        if let Some(include) = &filter.include_document_id {
            conditions.push("document_id = ?");
            values.push(include.clone());
        } else if let Some(exclude) = &filter.exclude_document_id {
            conditions.push("document_id != ?");
            values.push(exclude.clone());
        }

        let sql = format!(
            "{SELECT_VECTOR_ROW} WHERE {} ORDER BY rowid",
            conditions.join(" AND ")
        );

        let mut query = sqlx::query_as::<_, VectorRow>(&sql);
        for value in values {
            query = query.bind(value);
        }

        let rows = query
            .fetch_all(pool)
            .await
            .context("Failed to list embedded vectors")?;

        debug!("Fetched {} embedded candidate vectors", rows.len());
        Ok(rows)
    }

    /// Active records still waiting for an embedding
    #[inline]
    pub async fn list_pending(pool: &SqlitePool) -> Result<Vec<VectorRow>> {
        let sql = format!("{SELECT_VECTOR_ROW} WHERE is_deleted = 0 AND embedding IS NULL ORDER BY rowid");
        let rows = sqlx::query_as::<_, VectorRow>(&sql)
            .fetch_all(pool)
            .await
            .context("Failed to list pending vectors")?;

        Ok(rows)
    }

    /// Mark every active record of a document as deleted
    #[inline]
    pub async fn soft_delete(
        pool: &SqlitePool,
        document_id: &str,
        document_type: DocumentType,
    ) -> Result<DeletedVectors> {
        let now = Utc::now();
        let deleted: Vec<(String, String)> = sqlx::query_as(
            r#"
            UPDATE vector_records
            SET is_deleted = 1, updated_at = ?
            WHERE document_id = ? AND document_type = ? AND is_deleted = 0
            RETURNING id, vector_type
            "#,
        )
        .bind(now)
        .bind(document_id)
        .bind(document_type)
        .fetch_all(pool)
        .await
        .context("Failed to soft delete vectors")?;

        let (ids, vector_types) = deleted.into_iter().unzip();
        Ok(DeletedVectors { ids, vector_types })
    }

    /// Soft delete a document's active vectors whose type is not in `keep`
    #[inline]
    pub async fn soft_delete_except(
        pool: &SqlitePool,
        document_id: &str,
        document_type: DocumentType,
        keep: &[String],
    ) -> Result<DeletedVectors> {
        let keep_filter = if keep.is_empty() {
            String::new()
        } else {
            format!(" AND vector_type NOT IN ({})", vec!["?"; keep.len()].join(", "))
        };
        let sql = format!(
            "UPDATE vector_records SET is_deleted = 1, updated_at = ? \
             WHERE document_id = ? AND document_type = ? AND is_deleted = 0{keep_filter} \
             RETURNING id, vector_type"
        );

        let mut query = sqlx::query_as::<_, (String, String)>(&sql)
            .bind(Utc::now())
            .bind(document_id)
            .bind(document_type);
        for vector_type in keep {
            query = query.bind(vector_type.as_str());
        }

        let retired = query
            .fetch_all(pool)
            .await
            .context("Failed to retire stale vectors")?;

        let (ids, vector_types) = retired.into_iter().unzip();
        Ok(DeletedVectors { ids, vector_types })
    }

    #[inline]
    pub async fn count_by_type(pool: &SqlitePool) -> Result<Vec<TypeCount>> {
        let counts = sqlx::query_as::<_, TypeCount>(
            r#"
            SELECT document_type,
                   COUNT(*) AS total,
                   COALESCE(SUM(embedding IS NOT NULL), 0) AS embedded
            FROM vector_records
            WHERE is_deleted = 0
            GROUP BY document_type
            ORDER BY document_type
            "#,
        )
        .fetch_all(pool)
        .await
        .context("Failed to count vectors by type")?;

        Ok(counts)
    }

    /// Whether the embedding column can be read at all
    #[inline]
    pub async fn probe_embedding_column(pool: &SqlitePool) -> bool {
        sqlx::query("SELECT embedding FROM vector_records LIMIT 1")
            .fetch_optional(pool)
            .await
            .is_ok()
    }
}
