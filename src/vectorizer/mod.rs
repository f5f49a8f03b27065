// Vectorizer module
// Writes document vectors and (re-)embeds them one provider call at a time


use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    DecodedRecord, DeletedVectors, DocumentType, NewVectorRecord, VectorRecord,
};
use crate::documents::{self, CONTENT_VECTOR};
use crate::embeddings::EmbeddingProvider;
use crate::retrieval::ActiveConfig;
use crate::{Result, RetrievalError};

/// A single document vector to store
#[derive(Debug, Clone, PartialEq)]
pub struct StoreDocumentInput {
    pub document_id: String,
    pub document_type: DocumentType,
    pub vector_type: String,
    pub content: String,
    pub metadata: Value,
}

impl StoreDocumentInput {
    #[inline]
    pub fn new(document_id: &str, document_type: DocumentType, content: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            document_type,
            vector_type: CONTENT_VECTOR.to_string(),
            content: content.to_string(),
            metadata: Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredDocument {
    pub record_id: String,
    pub has_embedding: bool,
    pub vector_support: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub item: String,
    pub error: String,
}

/// Outcome of a sequential batch. One failed item never stops the rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
    pub total: usize,
}

impl BatchReport {
    #[inline]
    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    #[inline]
    pub fn error_messages(&self) -> Vec<String> {
        self.failed
            .iter()
            .map(|failure| format!("Vector {}: {}", failure.item, failure.error))
            .collect()
    }

    fn fail(&mut self, item: &str, error: impl ToString) {
        self.failed.push(BatchFailure {
            item: item.to_string(),
            error: error.to_string(),
        });
    }
}

/// Batch writer. The pause between provider calls comes from
/// `chat_processing.embedding_delay_ms` of the active config, read per batch.
#[derive(Clone)]
pub struct Vectorizer {
    database: Database,
    embedder: Arc<dyn EmbeddingProvider>,
    config: ActiveConfig,
}

impl Vectorizer {
    #[inline]
    pub fn new(
        database: Database,
        embedder: Arc<dyn EmbeddingProvider>,
        config: ActiveConfig,
    ) -> Self {
        Self {
            database,
            embedder,
            config,
        }
    }

    /// Embed and upsert one vector. Embedding problems degrade to text-only storage.
    #[inline]
    pub async fn store_document(&self, input: &StoreDocumentInput) -> Result<StoredDocument> {
        if input.document_id.trim().is_empty() {
            return Err(RetrievalError::Validation("documentId is required".to_string()));
        }
        if input.content.trim().is_empty() {
            return Err(RetrievalError::Validation("content is required".to_string()));
        }

        let embedding = match self.embedder.embed(&input.content).await {
            Ok(embedding) if !embedding.is_empty() => Some(embedding),
            Ok(_) => {
                debug!("No embedding available, storing text only");
                None
            }
            Err(e) => {
                warn!(
                    "Embedding failed for {} {}, storing text only: {}",
                    input.document_type, input.document_id, e
                );
                None
            }
        };

        let stored = self
            .database
            .upsert(&NewVectorRecord {
                document_id: input.document_id.clone(),
                document_type: input.document_type,
                vector_type: input.vector_type.clone(),
                content: input.content.clone(),
                embedding,
                metadata: input.metadata.clone(),
            })
            .await
            .map_err(RetrievalError::database)?
            .map_err(|malformed| RetrievalError::DataFormat(malformed.error.to_string()))?;

        let vector_support = self.database.vector_support().await;
        info!(
            "Stored vector for {} {} (embedding: {})",
            input.document_type,
            input.document_id,
            stored.has_embedding()
        );

        Ok(StoredDocument {
            has_embedding: stored.has_embedding(),
            record_id: stored.id,
            vector_support,
        })
    }

    /// Rewrite a document's vectors from `data` (when given) and re-embed all of them
    #[inline]
    pub async fn refresh_document(
        &self,
        document_id: &str,
        document_type: DocumentType,
        data: Option<&Value>,
    ) -> Result<BatchReport> {
        if document_id.trim().is_empty() {
            return Err(RetrievalError::Validation("documentId is required".to_string()));
        }

        if let Some(data) = data {
            let composed = documents::compose(document_type, data)
                .map_err(|e| RetrievalError::Validation(e.to_string()))?;
            let current_types: Vec<String> =
                composed.iter().map(|v| v.vector_type.clone()).collect();
            for vector in composed {
                self.database
                    .upsert(&NewVectorRecord {
                        document_id: document_id.to_string(),
                        document_type,
                        vector_type: vector.vector_type,
                        content: vector.content,
                        embedding: None,
                        metadata: vector.metadata,
                    })
                    .await
                    .map_err(RetrievalError::database)?
                    .map_err(|malformed| RetrievalError::DataFormat(malformed.error.to_string()))?;
            }

            self.database
                .retire_stale_vectors(document_id, document_type, &current_types)
                .await
                .map_err(RetrievalError::database)?;
        }

        let records = self
            .database
            .fetch_by_document(document_id, document_type)
            .await
            .map_err(RetrievalError::database)?;
        if records.is_empty() {
            return Err(RetrievalError::NotFound(format!(
                "No vectors found for {} {}",
                document_type, document_id
            )));
        }

        let report = self.embed_records(records).await;
        info!(
            "Refreshed {}/{} vectors for {} {}",
            report.succeeded_count(),
            report.total,
            document_type,
            document_id
        );
        Ok(report)
    }

    /// Embed every active record still missing an embedding
    #[inline]
    pub async fn vectorize_pending(&self) -> Result<BatchReport> {
        let records = self
            .database
            .fetch_pending()
            .await
            .map_err(RetrievalError::database)?;

        let report = self.embed_records(records).await;
        info!(
            "Vectorized {}/{} pending records",
            report.succeeded_count(),
            report.total
        );
        Ok(report)
    }

    /// Soft delete. Deleting an absent document reports zero vectors.
    #[inline]
    pub async fn delete_document(
        &self,
        document_id: &str,
        document_type: DocumentType,
    ) -> Result<DeletedVectors> {
        if document_id.trim().is_empty() {
            return Err(RetrievalError::Validation("documentId is required".to_string()));
        }

        self.database
            .soft_delete(document_id, document_type)
            .await
            .map_err(RetrievalError::database)
    }

    async fn embed_records(&self, records: Vec<DecodedRecord>) -> BatchReport {
        let delay = Duration::from_millis(self.config.get().chat_processing.embedding_delay_ms);
        let mut report = BatchReport {
            total: records.len(),
            ..BatchReport::default()
        };

        for (index, record) in records.into_iter().enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            // A malformed stored embedding is replaced, its content is still good
            let record = match record {
                Ok(record) => record,
                Err(malformed) => VectorRecord {
                    embedding: None,
                    ..malformed.record
                },
            };
            if let Err(error) = self.embed_record(&record).await {
                warn!("Failed to embed vector {}: {}", record.id, error);
                report.fail(&record.id, error);
            } else {
                report.succeeded.push(record.id);
            }
        }

        report
    }

    /// Re-embed one record. Without a new embedding, a record that still
    /// holds one for its content is touched; one that holds none fails.
    async fn embed_record(&self, record: &VectorRecord) -> Result<()> {
        let embedding = self
            .embedder
            .embed(&record.content)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if embedding.is_empty() && !record.has_embedding() {
            return Err(RetrievalError::Embedding(
                "no embedding available from provider".to_string(),
            ));
        }

        let stored = (!embedding.is_empty()).then_some(embedding.as_slice());
        let updated = self
            .database
            .update_embedding(&record.id, stored)
            .await
            .map_err(RetrievalError::database)?;

        if updated {
            Ok(())
        } else {
            Err(RetrievalError::NotFound(format!(
                "vector {} no longer exists",
                record.id
            )))
        }
    }
}
