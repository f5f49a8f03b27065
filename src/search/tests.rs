use super::*;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::HashMap;
use tempfile::TempDir;

use crate::database::sqlite::models::{DataFormatError, NewVectorRecord};
use crate::embeddings::EmbedError;
use crate::retrieval::{Preset, RetrievalConfigPatch};

fn record(id: &str, embedding: &[f32]) -> VectorRecord {
    VectorRecord {
        id: id.to_string(),
        document_id: format!("doc-{}", id),
        document_type: DocumentType::Script,
        vector_type: "content".to_string(),
        content: format!("content {}", id),
        embedding: Some(embedding.to_vec()),
        metadata: json!({ "name": id }),
        is_deleted: false,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn params(threshold: f64, limit: usize) -> RankParams {
    RankParams {
        threshold,
        limit,
        force_use_threshold: None,
    }
}

fn ids(results: &[ScoredResult]) -> Vec<&str> {
    results.iter().map(|r| r.id.as_str()).collect()
}

const TOLERANCE: f64 = 1e-9;

#[test]
fn identical_vectors_score_one() {
    let a = [0.3, -1.2, 4.5, 0.01];
    assert!((cosine_similarity(&a, &a) - 1.0).abs() < TOLERANCE);
}

#[test]
fn orthogonal_vectors_score_zero() {
    assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < TOLERANCE);
}

#[test]
fn opposite_vectors_score_minus_one() {
    let score = cosine_similarity(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]);
    assert!((score + 1.0).abs() < TOLERANCE);
}

#[test]
fn cosine_is_symmetric() {
    let a = [0.2, 0.7, -0.4, 1.1];
    let b = [0.9, -0.3, 0.5, 0.05];
    assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < TOLERANCE);
}

#[test]
fn zero_vector_scores_zero() {
    assert_eq!(cosine_similarity(&[0.5, 0.5, 0.5], &[0.0, 0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
}

#[test]
fn mismatched_lengths_score_zero() {
    assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
    assert_eq!(cosine_similarity(&[], &[]), 0.0);
}

#[test]
fn diagonal_against_axis() {
    let score = cosine_similarity(&[1.0, 0.0], &[0.7, 0.7]);
    assert!((score - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
}

#[test]
fn ranks_reference_scenario() {
    let candidates = vec![
        Ok(record("A", &[1.0, 0.0])),
        Ok(record("B", &[0.0, 1.0])),
        Ok(record("C", &[0.7, 0.7])),
    ];

    let ranking = rank_candidates(&[1.0, 0.0], candidates, &params(0.5, 2));

    assert_eq!(ids(&ranking.results), vec!["A", "C"]);
    assert!((ranking.results[0].similarity - 1.0).abs() < 1e-9);
    assert!((ranking.results[1].similarity - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    assert_eq!(ranking.total_candidates, 3);
    assert!(ranking.skipped.is_empty());
}

#[test]
fn results_are_sorted_limited_and_above_threshold() {
    let candidates: Vec<DecodedRecord> = (0..20)
        .map(|i| {
            let angle = i as f32 * 0.08;
            Ok(record(&format!("r{}", i), &[angle.cos(), angle.sin()]))
        })
        .collect();

    let ranking = rank_candidates(&[0.0, 1.0], candidates, &params(0.3, 4));

    assert!(ranking.results.len() <= 4);
    assert!(ranking.results.iter().all(|r| r.similarity >= 0.3));
    assert!(
        ranking
            .results
            .windows(2)
            .all(|pair| pair[0].similarity >= pair[1].similarity)
    );
}

#[test]
fn ties_keep_candidate_order() {
    let candidates = vec![
        Ok(record("first", &[1.0, 1.0])),
        Ok(record("second", &[2.0, 2.0])),
        Ok(record("third", &[3.0, 3.0])),
    ];

    let ranking = rank_candidates(&[1.0, 1.0], candidates, &params(0.0, 10));
    assert_eq!(ids(&ranking.results), vec!["first", "second", "third"]);
}

#[test]
fn bad_candidates_are_skipped_not_fatal() {
    let mut malformed = record("broken", &[]);
    malformed.embedding = None;
    let candidates = vec![
        Ok(record("short", &[1.0, 0.0, 0.0])),
        Err(MalformedRecord {
            record: malformed,
            error: DataFormatError::UnparseableText("oops".to_string()),
        }),
        Ok(record("good", &[1.0, 0.0])),
    ];

    let ranking = rank_candidates(&[1.0, 0.0], candidates, &params(0.5, 5));

    assert_eq!(ids(&ranking.results), vec!["good"]);
    assert_eq!(ranking.total_candidates, 3);
    assert_eq!(ranking.skipped.len(), 2);
    assert_eq!(
        ranking.skipped[0].reason,
        SkipReason::DimensionMismatch {
            expected: 2,
            actual: 3
        }
    );
    assert!(matches!(
        ranking.skipped[1].reason,
        SkipReason::DataFormat { .. }
    ));
}

#[test]
fn force_use_is_flagged_without_short_circuit() {
    let candidates = vec![
        Ok(record("exact", &[1.0, 0.0])),
        Ok(record("close", &[0.8, 0.6])),
        Ok(record("loose", &[0.6, 0.8])),
    ];
    let params = RankParams {
        threshold: 0.4,
        limit: 5,
        force_use_threshold: Some(0.7),
    };

    let ranking = rank_candidates(&[1.0, 0.0], candidates, &params);

    assert_eq!(ids(&ranking.results), vec!["exact", "close", "loose"]);
    assert_eq!(
        ranking
            .results
            .iter()
            .map(|r| r.force_use)
            .collect::<Vec<_>>(),
        vec![true, true, false]
    );
}

#[test]
fn best_candidate_ignores_threshold() {
    let candidates = vec![
        Ok(record("weak", &[0.1, 1.0])),
        Ok(record("weaker", &[0.0, 1.0])),
    ];

    let best = best_candidate(&[1.0, 0.0], candidates, &params(0.9, 1))
        .expect("one candidate is comparable");
    assert_eq!(best.id, "weak");
    assert!(best.similarity < 0.9);

    assert!(best_candidate(&[1.0, 0.0], Vec::new(), &params(0.0, 1)).is_none());
}

#[test]
fn serialized_skip_reason_is_flat() {
    let skipped = SkippedCandidate {
        id: "v1".to_string(),
        document_id: "d1".to_string(),
        reason: SkipReason::DimensionMismatch {
            expected: 2,
            actual: 3,
        },
    };

    let value = serde_json::to_value(&skipped).expect("skipped candidate serializes");
    assert_eq!(
        value,
        json!({ "id": "v1", "document_id": "d1", "reason": "dimension_mismatch", "expected": 2, "actual": 3 })
    );
}

#[test]
fn params_resolution_order() {
    let config = RetrievalConfig::default();

    let fallback = RankParams::resolve(&SearchOptions::default(), &config).expect("valid");
    assert_eq!(fallback.threshold, FALLBACK_SIMILARITY_THRESHOLD);
    assert_eq!(fallback.limit, FALLBACK_LIMIT);
    assert_eq!(fallback.force_use_threshold, None);

    let script = RankParams::resolve(
        &SearchOptions::for_category(KnowledgeCategory::ScriptLibrary),
        &config,
    )
    .expect("valid");
    assert_eq!(script.threshold, 0.4);
    assert_eq!(script.limit, 5);
    assert_eq!(script.force_use_threshold, Some(0.7));

    let implied = RankParams::resolve(
        &SearchOptions {
            filter: CandidateFilter {
                document_type: Some(DocumentType::Abbreviation),
                ..CandidateFilter::default()
            },
            ..SearchOptions::default()
        },
        &config,
    )
    .expect("valid");
    assert_eq!(implied.threshold, 0.3);
    assert_eq!(implied.limit, 10);

    let overridden = RankParams::resolve(
        &SearchOptions {
            similarity_threshold: Some(0.9),
            limit: Some(1),
            ..SearchOptions::for_category(KnowledgeCategory::ScriptLibrary)
        },
        &config,
    )
    .expect("valid");
    assert_eq!(overridden.threshold, 0.9);
    assert_eq!(overridden.limit, 1);
    assert_eq!(overridden.force_use_threshold, Some(0.7));
}

fn patched(config: &RetrievalConfig, patch: Value) -> RetrievalConfig {
    let patch: RetrievalConfigPatch = serde_json::from_value(patch).expect("patch parses");
    config.merged(&patch).expect("patch is valid")
}

fn over_vector_type(vector_type: &str) -> SearchOptions {
    SearchOptions {
        filter: CandidateFilter {
            vector_type: Some(vector_type.to_string()),
            ..CandidateFilter::default()
        },
        ..SearchOptions::default()
    }
}

#[test]
fn message_searches_use_vector_search_section() {
    let config = patched(
        &RetrievalConfig::default(),
        json!({ "vector_search": { "similarity_threshold": 0.95, "limit": 1 } }),
    );

    let messages = RankParams::resolve(&over_vector_type("message"), &config).expect("valid");
    assert_eq!(messages.threshold, 0.95);
    assert_eq!(messages.limit, 1);

    // Context vectors only count once include_context is on
    let context = RankParams::resolve(&over_vector_type("context"), &config).expect("valid");
    assert_eq!(context.threshold, FALLBACK_SIMILARITY_THRESHOLD);
    let with_context = patched(&config, json!({ "vector_search": { "include_context": true } }));
    let context = RankParams::resolve(&over_vector_type("context"), &with_context).expect("valid");
    assert_eq!(context.limit, 1);

    let other = RankParams::resolve(&over_vector_type("preferences"), &config).expect("valid");
    assert_eq!(other.limit, FALLBACK_LIMIT);

    // A category still wins over the vector type
    let categorized = RankParams::resolve(
        &SearchOptions {
            category: Some(KnowledgeCategory::GeneralKnowledge),
            ..over_vector_type("message")
        },
        &config,
    )
    .expect("valid");
    assert_eq!(categorized.threshold, 0.5);
}

#[test]
fn matched_counts_results_before_truncation() {
    let candidates = vec![
        Ok(record("A", &[1.0, 0.0])),
        Ok(record("B", &[0.9, 0.1])),
        Ok(record("C", &[0.8, 0.2])),
        Ok(record("D", &[0.0, 1.0])),
    ];

    let ranking = rank_candidates(&[1.0, 0.0], candidates, &params(0.5, 1));
    assert_eq!(ids(&ranking.results), vec!["A"]);
    assert_eq!(ranking.matched, 3);
    assert_eq!(ranking.total_candidates, 4);
}

#[test]
fn out_of_range_threshold_is_rejected() {
    let options = SearchOptions {
        similarity_threshold: Some(1.5),
        ..SearchOptions::default()
    };

    assert!(matches!(
        RankParams::resolve(&options, &RetrievalConfig::default()),
        Err(RetrievalError::Validation(_))
    ));
}

/// Embeds known texts to fixed vectors; unknown texts get an empty vector
struct FixedEmbedder {
    vectors: HashMap<String, Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for FixedEmbedder {
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        Ok(self.vectors.get(text).cloned().unwrap_or_default())
    }

    fn model(&self) -> &str {
        "fixed"
    }
}

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        Err(EmbedError::Provider {
            status: 429,
            message: "Rate limit reached".to_string(),
        })
    }

    fn model(&self) -> &str {
        "failing"
    }
}

async fn seeded_service(embedder: Arc<dyn EmbeddingProvider>) -> (TempDir, SearchService) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let database = Database::initialize_in_dir(temp_dir.path(), "vectors.db")
        .await
        .expect("Failed to create database");

    for (document_id, document_type, embedding) in [
        ("script-a", DocumentType::Script, vec![1.0, 0.0]),
        ("script-b", DocumentType::Script, vec![0.0, 1.0]),
        ("script-c", DocumentType::Script, vec![0.7, 0.7]),
        ("abbr-a", DocumentType::Abbreviation, vec![0.9, 0.1]),
    ] {
        database
            .upsert(&NewVectorRecord {
                document_id: document_id.to_string(),
                document_type,
                vector_type: "content".to_string(),
                content: format!("content of {}", document_id),
                embedding: Some(embedding),
                metadata: json!({ "title": document_id }),
            })
            .await
            .expect("Failed to seed record")
            .expect("seeded embedding decodes");
    }

    let service = SearchService::new(database, embedder, ActiveConfig::default());
    (temp_dir, service)
}

fn fixed_embedder() -> Arc<dyn EmbeddingProvider> {
    Arc::new(FixedEmbedder {
        vectors: HashMap::from([
            ("greeting".to_string(), vec![1.0, 0.0]),
            ("three dims".to_string(), vec![1.0, 0.0, 0.0]),
        ]),
    })
}

#[tokio::test]
async fn search_ranks_stored_vectors() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let options = SearchOptions {
        similarity_threshold: Some(0.5),
        limit: Some(2),
        filter: CandidateFilter {
            document_type: Some(DocumentType::Script),
            ..CandidateFilter::default()
        },
        ..SearchOptions::default()
    };
    let report = service.search("greeting", &options).await.expect("search succeeds");

    assert_eq!(
        report
            .results
            .iter()
            .map(|r| r.document_id.as_str())
            .collect::<Vec<_>>(),
        vec!["script-a", "script-c"]
    );
    assert_eq!(report.total_candidates, 3);
    assert_eq!(report.query_dimension, 2);
    assert_eq!(report.threshold, 0.5);
    assert_eq!(report.limit, 2);
    assert_eq!(report.results[0].metadata, json!({ "title": "script-a" }));
    assert!(report.results[0].force_use);
}

#[tokio::test]
async fn search_uses_active_category_config() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let patch: RetrievalConfigPatch = serde_json::from_value(json!({
        "knowledge_retrieval": { "script_library": { "limit": 1 } }
    }))
    .expect("valid patch");
    service.config().set(&patch).expect("patch applies");

    let report = service
        .search(
            "greeting",
            &SearchOptions::for_category(KnowledgeCategory::ScriptLibrary),
        )
        .await
        .expect("search succeeds");

    assert_eq!(report.limit, 1);
    assert_eq!(report.threshold, 0.4);
    assert_eq!(report.results.len(), 1);

    service.config().load_preset(Preset::Conservative);
    let report = service
        .search(
            "greeting",
            &SearchOptions::for_category(KnowledgeCategory::ScriptLibrary),
        )
        .await
        .expect("search succeeds");
    assert_eq!(report.threshold, 0.6);
    assert_eq!(report.limit, 3);
}

#[tokio::test]
async fn search_excludes_document() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let options = SearchOptions {
        similarity_threshold: Some(0.0),
        limit: Some(10),
        filter: CandidateFilter {
            exclude_document_id: Some("script-a".to_string()),
            ..CandidateFilter::default()
        },
        ..SearchOptions::default()
    };
    let report = service.search("greeting", &options).await.expect("search succeeds");

    assert_eq!(report.total_candidates, 3);
    assert!(report.results.iter().all(|r| r.document_id != "script-a"));
    assert_eq!(report.results[0].document_id, "abbr-a");
}

#[tokio::test]
async fn missing_query_embedding_returns_empty_report() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let report = service
        .search("unknown text", &SearchOptions::default())
        .await
        .expect("degraded search is not an error");

    assert!(report.results.is_empty());
    assert_eq!(report.query_dimension, 0);
    assert_eq!(report.threshold, FALLBACK_SIMILARITY_THRESHOLD);

    let best = service
        .best_match("unknown text", &SearchOptions::default())
        .await
        .expect("degraded search is not an error");
    assert!(best.is_none());
}

#[tokio::test]
async fn mismatched_dimensions_are_reported() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let report = service
        .search("three dims", &SearchOptions::default())
        .await
        .expect("search succeeds");

    assert!(report.results.is_empty());
    assert_eq!(report.skipped.len(), 4);
}

#[tokio::test]
async fn best_match_below_threshold() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let options = SearchOptions {
        similarity_threshold: Some(1.0),
        filter: CandidateFilter {
            vector_type: Some("content".to_string()),
            exclude_document_id: Some("script-a".to_string()),
            ..CandidateFilter::default()
        },
        ..SearchOptions::default()
    };

    let report = service.search("greeting", &options).await.expect("search succeeds");
    assert!(report.results.is_empty());

    let best = service
        .best_match("greeting", &options)
        .await
        .expect("search succeeds")
        .expect("a candidate exists");
    assert_eq!(best.document_id, "abbr-a");
}

#[tokio::test]
async fn provider_failure_is_surfaced() {
    let (_temp_dir, service) = seeded_service(Arc::new(FailingEmbedder)).await;

    let error = service
        .search("greeting", &SearchOptions::default())
        .await
        .expect_err("provider failed");
    assert!(matches!(error, RetrievalError::Embedding(message) if message.contains("429")));
}

#[tokio::test]
async fn blank_query_is_rejected() {
    let (_temp_dir, service) = seeded_service(fixed_embedder()).await;

    let error = service
        .search("   ", &SearchOptions::default())
        .await
        .expect_err("blank query");
    assert!(matches!(error, RetrievalError::Validation(_)));
}
