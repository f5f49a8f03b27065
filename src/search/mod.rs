// Ranked search module
// Embeds a query, scores stored candidates and returns the best matches

#[cfg(test)]
mod tests;

pub mod similarity;

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    CandidateFilter, DecodedRecord, DocumentType, MalformedRecord, VectorRecord,
};
use crate::embeddings::EmbeddingProvider;
use crate::retrieval::{ActiveConfig, CategoryConfig, KnowledgeCategory, RetrievalConfig};
use crate::{Result, RetrievalError};

pub use similarity::cosine_similarity;

/// Threshold used when neither the caller nor a category supplies one
pub const FALLBACK_SIMILARITY_THRESHOLD: f64 = 0.1;
/// Limit used when neither the caller nor a category supplies one
pub const FALLBACK_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Category whose configured threshold and limit apply
    pub category: Option<KnowledgeCategory>,
    pub similarity_threshold: Option<f64>,
    pub limit: Option<usize>,
    pub filter: CandidateFilter,
}

impl SearchOptions {
    #[inline]
    pub fn for_category(category: KnowledgeCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    /// Explicit category, else the one implied by a document type filter
    #[inline]
    pub fn effective_category(&self) -> Option<KnowledgeCategory> {
        self.category
            .or_else(|| self.filter.document_type.map(DocumentType::category))
    }
}

/// Effective ranking parameters for one search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankParams {
    pub threshold: f64,
    pub limit: usize,
    /// Results at or above this similarity get `force_use`
    pub force_use_threshold: Option<f64>,
}

impl RankParams {
    /// Caller override, then category config, then the message search
    /// section for message vector types, then the fixed fallback
    #[inline]
    pub fn resolve(options: &SearchOptions, config: &RetrievalConfig) -> Result<Self> {
        let category = options.effective_category();
        let configured = match category {
            Some(category) => Some(config.category(category)),
            None => options
                .filter
                .vector_type
                .as_deref()
                .filter(|vector_type| config.vector_search.covers(vector_type))
                .map(|_| CategoryConfig {
                    similarity_threshold: config.vector_search.similarity_threshold,
                    limit: config.vector_search.limit,
                }),
        };

        let threshold = options
            .similarity_threshold
            .or_else(|| configured.map(|c| c.similarity_threshold))
            .unwrap_or(FALLBACK_SIMILARITY_THRESHOLD);
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(RetrievalError::Validation(format!(
                "similarity_threshold must be between 0 and 1, got {}",
                threshold
            )));
        }

        let limit = options
            .limit
            .or_else(|| configured.map(|c| c.limit))
            .unwrap_or(FALLBACK_LIMIT);

        Ok(Self {
            threshold,
            limit,
            force_use_threshold: category.and_then(|c| config.force_use_threshold(c)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredResult {
    pub id: String,
    pub document_id: String,
    pub document_type: DocumentType,
    pub vector_type: String,
    pub content: String,
    pub metadata: Value,
    pub similarity: f64,
    /// Strong enough to be used verbatim (script library only)
    pub force_use: bool,
}

impl ScoredResult {
    fn new(record: VectorRecord, similarity: f64, params: &RankParams) -> Self {
        Self {
            force_use: params
                .force_use_threshold
                .is_some_and(|force| similarity >= force),
            id: record.id,
            document_id: record.document_id,
            document_type: record.document_type,
            vector_type: record.vector_type,
            content: record.content,
            metadata: record.metadata,
            similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    DataFormat { error: String },
    DimensionMismatch { expected: usize, actual: usize },
}

/// A candidate left out of scoring, with why
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedCandidate {
    pub id: String,
    pub document_id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    pub results: Vec<ScoredResult>,
    pub skipped: Vec<SkippedCandidate>,
    pub total_candidates: usize,
    /// Candidates at or above the threshold, before truncation
    pub matched: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchReport {
    pub results: Vec<ScoredResult>,
    pub total_candidates: usize,
    /// Candidates at or above the threshold, before truncation
    pub matched: usize,
    pub skipped: Vec<SkippedCandidate>,
    pub threshold: f64,
    pub limit: usize,
    /// Zero when no query embedding was available
    pub query_dimension: usize,
}

/// Score every candidate against `query`.
///
/// Unreadable and mismatched candidates are skipped and reported. The
/// remaining ones are filtered by threshold, stably sorted by descending
/// similarity and truncated to the limit.
#[inline]
pub fn rank_candidates(
    query: &[f32],
    candidates: Vec<DecodedRecord>,
    params: &RankParams,
) -> Ranking {
    let total_candidates = candidates.len();
    let (scored, skipped) = score_candidates(query, candidates);

    let mut results: Vec<ScoredResult> = scored
        .into_iter()
        .filter(|(_, similarity)| *similarity >= params.threshold)
        .map(|(record, similarity)| ScoredResult::new(record, similarity, params))
        .collect();

    let matched = results.len();

    // sort_by is stable: ties keep candidate order
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    results.truncate(params.limit);

    Ranking {
        results,
        skipped,
        total_candidates,
        matched,
    }
}

/// Highest-scoring candidate regardless of threshold. Ties go to the earlier candidate.
#[inline]
pub fn best_candidate(
    query: &[f32],
    candidates: Vec<DecodedRecord>,
    params: &RankParams,
) -> Option<ScoredResult> {
    let (scored, _) = score_candidates(query, candidates);

    scored
        .into_iter()
        .reduce(|best, next| if next.1 > best.1 { next } else { best })
        .map(|(record, similarity)| ScoredResult::new(record, similarity, params))
}

fn score_candidates(
    query: &[f32],
    candidates: Vec<DecodedRecord>,
) -> (Vec<(VectorRecord, f64)>, Vec<SkippedCandidate>) {
    let mut scored = Vec::with_capacity(candidates.len());
    let mut skipped = Vec::new();

    for candidate in candidates {
        let record = match candidate {
            Ok(record) => record,
            Err(MalformedRecord { record, error }) => {
                warn!("Skipping vector {}: {}", record.id, error);
                skipped.push(SkippedCandidate {
                    id: record.id,
                    document_id: record.document_id,
                    reason: SkipReason::DataFormat {
                        error: error.to_string(),
                    },
                });
                continue;
            }
        };

        let Some(embedding) = record.embedding.as_deref() else {
            continue;
        };

        if embedding.len() != query.len() {
            warn!(
                "Skipping vector {}: dimension {} does not match query dimension {}",
                record.id,
                embedding.len(),
                query.len()
            );
            skipped.push(SkippedCandidate {
                reason: SkipReason::DimensionMismatch {
                    expected: query.len(),
                    actual: embedding.len(),
                },
                id: record.id,
                document_id: record.document_id,
            });
            continue;
        }

        let similarity = cosine_similarity(query, embedding);
        scored.push((record, similarity));
    }

    (scored, skipped)
}

/// Query-time entry point: embed, fetch, rank
#[derive(Clone)]
pub struct SearchService {
    database: Database,
    embedder: Arc<dyn EmbeddingProvider>,
    config: ActiveConfig,
}

impl SearchService {
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

    #[inline]
    pub fn config(&self) -> &ActiveConfig {
        &self.config
    }

    #[inline]
    pub fn database(&self) -> &Database {
        &self.database
    }

    #[inline]
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchReport> {
        let params = RankParams::resolve(options, &self.config.get())?;
        let Some(query_embedding) = self.embed_query(query).await? else {
            return Ok(SearchReport {
                results: Vec::new(),
                total_candidates: 0,
                matched: 0,
                skipped: Vec::new(),
                threshold: params.threshold,
                limit: params.limit,
                query_dimension: 0,
            });
        };

        let candidates = self.fetch_candidates(&options.filter).await?;
        let ranking = rank_candidates(&query_embedding, candidates, &params);

        info!(
            "Search returned {} of {} matches from {} candidates (threshold {}, limit {}, skipped {})",
            ranking.results.len(),
            ranking.matched,
            ranking.total_candidates,
            params.threshold,
            params.limit,
            ranking.skipped.len()
        );

        Ok(SearchReport {
            results: ranking.results,
            total_candidates: ranking.total_candidates,
            matched: ranking.matched,
            skipped: ranking.skipped,
            threshold: params.threshold,
            limit: params.limit,
            query_dimension: query_embedding.len(),
        })
    }

    /// Diagnostic mode: the single closest candidate, ignoring the threshold
    #[inline]
    pub async fn best_match(
        &self,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Option<ScoredResult>> {
        let params = RankParams::resolve(options, &self.config.get())?;
        let Some(query_embedding) = self.embed_query(query).await? else {
            return Ok(None);
        };

        let candidates = self.fetch_candidates(&options.filter).await?;
        Ok(best_candidate(&query_embedding, candidates, &params))
    }

    async fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>> {
        if query.trim().is_empty() {
            return Err(RetrievalError::Validation("query is required".to_string()));
        }

        let embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|e| RetrievalError::Embedding(e.to_string()))?;

        if embedding.is_empty() {
            debug!("No query embedding available, returning no results");
            return Ok(None);
        }

        Ok(Some(embedding))
    }

    async fn fetch_candidates(&self, filter: &CandidateFilter) -> Result<Vec<DecodedRecord>> {
        self.database
            .fetch_all_embedded(filter)
            .await
            .map_err(RetrievalError::database)
    }
}
