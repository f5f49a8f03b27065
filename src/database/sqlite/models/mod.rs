
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Type};
use thiserror::Error;

use crate::retrieval::KnowledgeCategory;

/// Kinds of source entities that can be vectorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Abbreviation,
    Script,
    Personality,
    Document,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Abbreviation,
        DocumentType::Script,
        DocumentType::Personality,
        DocumentType::Document,
    ];

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Abbreviation => "abbreviation",
            DocumentType::Script => "script",
            DocumentType::Personality => "personality",
            DocumentType::Document => "document",
        }
    }

    /// Knowledge category whose thresholds apply to this document type
    #[inline]
    pub fn category(self) -> KnowledgeCategory {
        match self {
            DocumentType::Abbreviation => KnowledgeCategory::AbbreviationRecognition,
            DocumentType::Script => KnowledgeCategory::ScriptLibrary,
            DocumentType::Personality => KnowledgeCategory::PersonalityMatching,
            DocumentType::Document => KnowledgeCategory::GeneralKnowledge,
        }
    }
}

impl fmt::Display for DocumentType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid document type: {0} (must be one of abbreviation, script, personality, document)")]
pub struct InvalidDocumentType(pub String);

impl FromStr for DocumentType {
    type Err = InvalidDocumentType;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abbreviation" => Ok(DocumentType::Abbreviation),
            "script" => Ok(DocumentType::Script),
            "personality" => Ok(DocumentType::Personality),
            "document" => Ok(DocumentType::Document),
            _ => Err(InvalidDocumentType(s.to_string())),
        }
    }
}

/// How new embeddings are written to the embedding column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingFormat {
    /// Bracketed, comma-joined text: `[0.1,0.2]`
    #[default]
    Serialized,
    /// Little-endian `f32` blob
    Native,
}

/// Stored embedding problems. The affected record is skipped, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataFormatError {
    #[error("Embedding text is not a numeric array: {0}")]
    UnparseableText(String),
    #[error("Native embedding has {0} bytes, which is not a whole number of f32 values")]
    TruncatedBlob(usize),
    #[error("Embedding stored with unsupported SQL type '{0}'")]
    UnsupportedType(String),
}

/// Embedding value as it sits in the store
#[derive(Debug, Clone, PartialEq)]
pub enum StoredEmbedding {
    Serialized(String),
    Native(Vec<u8>),
}

impl StoredEmbedding {
    #[inline]
    pub fn encode(format: EmbeddingFormat, embedding: &[f32]) -> Self {
        match format {
            EmbeddingFormat::Serialized => {
                let joined = embedding
                    .iter()
                    .map(f32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                StoredEmbedding::Serialized(format!("[{}]", joined))
            }
            EmbeddingFormat::Native => StoredEmbedding::Native(
                embedding.iter().flat_map(|value| value.to_le_bytes()).collect(),
            ),
        }
    }

    /// Normalize either representation to an in-memory vector
    #[inline]
    pub fn decode(&self) -> Result<Vec<f32>, DataFormatError> {
        match self {
            StoredEmbedding::Serialized(text) => serde_json::from_str::<Vec<f32>>(text.trim())
                .map_err(|_| DataFormatError::UnparseableText(preview(text))),
            StoredEmbedding::Native(bytes) => {
                if bytes.len() % 4 != 0 {
                    return Err(DataFormatError::TruncatedBlob(bytes.len()));
                }
                Ok(bytes
                    .chunks_exact(4)
                    .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                    .collect())
            }
        }
    }
}

fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 40;
    if text.chars().count() > MAX_CHARS {
        format!("{}...", text.chars().take(MAX_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// A vector record exactly as read from the store
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRow {
    pub id: String,
    pub document_id: String,
    pub document_type: DocumentType,
    pub vector_type: String,
    pub content: String,
    pub embedding: Result<Option<StoredEmbedding>, DataFormatError>,
    pub metadata: Value,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for VectorRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("embedding_kind")?;
        let embedding = match kind.as_str() {
            "null" => Ok(None),
            "text" => Ok(row
                .try_get::<Option<String>, _>("embedding_text")?
                .map(StoredEmbedding::Serialized)),
            "blob" => Ok(row
                .try_get::<Option<Vec<u8>>, _>("embedding_blob")?
                .map(StoredEmbedding::Native)),
            other => Err(DataFormatError::UnsupportedType(other.to_string())),
        };

        let metadata: String = row.try_get("metadata")?;
        let metadata =
            serde_json::from_str(&metadata).map_err(|e| sqlx::Error::ColumnDecode {
                index: "metadata".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            document_type: row.try_get("document_type")?,
            vector_type: row.try_get("vector_type")?,
            content: row.try_get("content")?,
            embedding,
            metadata,
            is_deleted: row.try_get("is_deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl VectorRow {
    /// Decode the stored embedding into a [`VectorRecord`]
    #[inline]
    pub fn decode(self) -> Result<VectorRecord, MalformedRecord> {
        let embedding = match self.embedding.as_ref() {
            Ok(Some(stored)) => stored.decode().map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e.clone()),
        };

        let mut record = VectorRecord {
            id: self.id,
            document_id: self.document_id,
            document_type: self.document_type,
            vector_type: self.vector_type,
            content: self.content,
            embedding: None,
            metadata: self.metadata,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };

        match embedding {
            Ok(embedding) => {
                record.embedding = embedding;
                Ok(record)
            }
            Err(error) => Err(MalformedRecord { record, error }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub document_id: String,
    pub document_type: DocumentType,
    pub vector_type: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Value,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VectorRecord {
    #[inline]
    pub fn has_embedding(&self) -> bool {
        self.embedding.as_ref().is_some_and(|e| !e.is_empty())
    }
}

/// A record whose embedding could not be decoded. Content is still usable.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedRecord {
    pub record: VectorRecord,
    pub error: DataFormatError,
}

pub type DecodedRecord = Result<VectorRecord, MalformedRecord>;

#[derive(Debug, Clone, PartialEq)]
pub struct NewVectorRecord {
    pub document_id: String,
    pub document_type: DocumentType,
    pub vector_type: String,
    pub content: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Value,
}

/// Restricts the candidate pool of a search
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFilter {
    pub document_type: Option<DocumentType>,
    pub vector_type: Option<String>,
    /// Only this document's vectors
    pub include_document_id: Option<String>,
    /// Everything except this document, for "similar item" queries
    pub exclude_document_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedVectors {
    pub ids: Vec<String>,
    pub vector_types: Vec<String>,
}

impl DeletedVectors {
    #[inline]
    pub fn count(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingStatus {
    NoVectors,
    NoEmbeddings,
    PartialEmbeddings,
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorTypeStatistics {
    #[serde(rename = "type")]
    pub vector_type: String,
    pub count: usize,
    pub has_embedding: bool,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Embedding coverage of one document's active vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStatistics {
    pub vector_count: usize,
    pub vector_types: Vec<String>,
    pub embedding_count: usize,
    pub last_updated: Option<DateTime<Utc>>,
    pub status: EmbeddingStatus,
    pub type_stats: Vec<VectorTypeStatistics>,
    pub completion_rate: f64,
}

impl DocumentStatistics {
    /// Summarize rows that are already filtered to one document and not deleted
    #[inline]
    pub fn from_rows(rows: &[VectorRow]) -> Self {
        let vector_count = rows.len();
        let has_embedding = |row: &VectorRow| matches!(row.embedding, Ok(Some(_)));
        let embedding_count = rows.iter().filter(|row| has_embedding(row)).count();
        let last_updated = rows.iter().map(|row| row.updated_at).max();

        let mut type_stats: Vec<VectorTypeStatistics> = Vec::new();
        for row in rows {
            if let Some(stats) = type_stats
                .iter_mut()
                .find(|stats| stats.vector_type == row.vector_type)
            {
                stats.count += 1;
                stats.has_embedding |= has_embedding(row);
            } else {
                type_stats.push(VectorTypeStatistics {
                    vector_type: row.vector_type.clone(),
                    count: 1,
                    has_embedding: has_embedding(row),
                    created: row.created_at,
                    updated: row.updated_at,
                });
            }
        }

        let status = if vector_count == 0 {
            EmbeddingStatus::NoVectors
        } else if embedding_count == 0 {
            EmbeddingStatus::NoEmbeddings
        } else if embedding_count < vector_count {
            EmbeddingStatus::PartialEmbeddings
        } else {
            EmbeddingStatus::Complete
        };

        let completion_rate = if vector_count > 0 {
            embedding_count as f64 / vector_count as f64 * 100.0
        } else {
            0.0
        };

        Self {
            vector_count,
            vector_types: type_stats.iter().map(|s| s.vector_type.clone()).collect(),
            embedding_count,
            last_updated,
            status,
            type_stats,
            completion_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TypeCount {
    pub document_type: DocumentType,
    pub total: i64,
    pub embedded: i64,
}

/// Active vector totals across the whole store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_vectors: i64,
    pub embedded_vectors: i64,
    pub by_type: Vec<TypeCount>,
}
