use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use serde::Deserialize;
use serde_json::{Value, json};
use std::str::FromStr;
use tracing::debug;

use super::AppState;
use super::error::ApiError;
use crate::database::sqlite::models::{CandidateFilter, DeletedVectors, DocumentType};
use crate::retrieval::{KnowledgeCategory, Preset, RetrievalConfig, RetrievalConfigPatch};
use crate::search::SearchOptions;
use crate::vectorizer::{BatchReport, StoreDocumentInput};

type ApiResult = Result<Json<Value>, ApiError>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorizeRequest {
    document_id: Option<String>,
    content: Option<String>,
    metadata: Option<Value>,
    vector_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeRequest {
    document_id: Option<String>,
    document_type: Option<String>,
    data: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentQuery {
    document_id: Option<String>,
    document_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    query: Option<String>,
    limit: Option<i64>,
    similarity_threshold: Option<f64>,
    category: Option<String>,
    document_type: Option<String>,
    vector_type: Option<String>,
    exclude_document_id: Option<String>,
    include_document_id: Option<String>,
}

impl SearchRequest {
    fn into_parts(self) -> Result<(String, SearchOptions), ApiError> {
        let query = required(self.query, "query")?;

        let limit = self
            .limit
            .map(|limit| {
                usize::try_from(limit).map_err(|_| {
                    ApiError::BadRequest(format!("limit must not be negative, got {}", limit))
                })
            })
            .transpose()?;

        let options = SearchOptions {
            category: optional(self.category)
                .map(|name| KnowledgeCategory::from_str(&name))
                .transpose()?,
            similarity_threshold: self.similarity_threshold,
            limit,
            filter: CandidateFilter {
                document_type: optional(self.document_type)
                    .map(|name| DocumentType::from_str(&name))
                    .transpose()?,
                vector_type: optional(self.vector_type),
                include_document_id: optional(self.include_document_id),
                exclude_document_id: optional(self.exclude_document_id),
            },
        };

        Ok((query, options))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsQuery {
    document_type: Option<String>,
}

/// Trimmed value, or None when absent or blank
fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(value: Option<String>, field: &str) -> Result<String, ApiError> {
    optional(value).ok_or_else(|| ApiError::missing(field))
}

fn required_document_type(value: Option<String>) -> Result<DocumentType, ApiError> {
    Ok(DocumentType::from_str(&required(value, "documentType")?)?)
}

fn batch_body(message: &str, report: &BatchReport) -> Value {
    let mut body = json!({
        "success": true,
        "message": message,
        "updatedCount": report.succeeded_count(),
        "totalCount": report.total,
    });
    if !report.failed.is_empty() {
        body["errors"] = json!(report.error_messages());
    }
    body
}

fn deleted_body(document_type: DocumentType, deleted: &DeletedVectors) -> Value {
    json!({
        "success": true,
        "message": format!(
            "Deleted {} {} vectors ({})",
            deleted.count(),
            document_type,
            deleted.vector_types.join(", ")
        ),
        "deletedCount": deleted.count(),
        "vectorTypes": deleted.vector_types,
    })
}

fn config_body(config: &RetrievalConfig) -> Value {
    json!({ "success": true, "config": config })
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn vectorize(
    State(state): State<AppState>,
    payload: Result<Json<VectorizeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let document_id = required(request.document_id, "documentId")?;
    let content = required(request.content, "content")?;
    let metadata = request
        .metadata
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));

    // The source type travels in metadata, abbreviations are the common case
    let document_type = metadata
        .get("type")
        .and_then(Value::as_str)
        .map(DocumentType::from_str)
        .transpose()?
        .unwrap_or(DocumentType::Abbreviation);

    let mut input = StoreDocumentInput::new(&document_id, document_type, &content);
    input.metadata = metadata;
    if let Some(vector_type) = optional(request.vector_type) {
        input.vector_type = vector_type;
    }

    let stored = state.vectorizer.store_document(&input).await?;
    let message = if stored.has_embedding {
        format!("Vector stored for {} {}", document_type, document_id)
    } else {
        format!(
            "Content stored for {} {} without embedding",
            document_type, document_id
        )
    };

    Ok(Json(json!({
        "success": true,
        "message": message,
        "hasEmbedding": stored.has_embedding,
        "vectorSupport": stored.vector_support,
    })))
}

pub async fn delete_vectors(
    State(state): State<AppState>,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let document_id = required(query.document_id, "documentId")?;
    let document_type = optional(query.document_type)
        .map(|name| DocumentType::from_str(&name))
        .transpose()?
        .unwrap_or(DocumentType::Abbreviation);

    let deleted = state
        .vectorizer
        .delete_document(&document_id, document_type)
        .await?;
    Ok(Json(deleted_body(document_type, &deleted)))
}

pub async fn update_knowledge(
    State(state): State<AppState>,
    payload: Result<Json<KnowledgeRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let document_id = required(request.document_id, "documentId")?;
    let document_type = required_document_type(request.document_type)?;

    let report = state
        .vectorizer
        .refresh_document(&document_id, document_type, request.data.as_ref())
        .await?;

    let message = format!(
        "Updated {}/{} {} vectors",
        report.succeeded_count(),
        report.total,
        document_type
    );
    Ok(Json(batch_body(&message, &report)))
}

pub async fn delete_knowledge(
    State(state): State<AppState>,
    query: Result<Query<DocumentQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let document_id = required(query.document_id, "documentId")?;
    let document_type = required_document_type(query.document_type)?;

    let deleted = state
        .vectorizer
        .delete_document(&document_id, document_type)
        .await?;
    Ok(Json(deleted_body(document_type, &deleted)))
}

pub async fn vectorize_pending(State(state): State<AppState>) -> ApiResult {
    let report = state.vectorizer.vectorize_pending().await?;
    let message = format!(
        "Vectorized {}/{} pending vectors",
        report.succeeded_count(),
        report.total
    );
    Ok(Json(batch_body(&message, &report)))
}

pub async fn search(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let (query, options) = request.into_parts()?;
    debug!("Search request: {:?}", options);

    let report = state.search.search(&query, &options).await?;
    Ok(Json(json!({
        "success": true,
        "total": report.matched,
        "results": report.results,
        "skipped": report.skipped,
        "total_candidates": report.total_candidates,
        "query_embedding_length": report.query_dimension,
        "similarity_threshold": report.threshold,
        "limit": report.limit,
    })))
}

pub async fn search_best(
    State(state): State<AppState>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = payload?;
    let (query, options) = request.into_parts()?;

    let result = state.search.best_match(&query, &options).await?;
    Ok(Json(json!({ "success": true, "result": result })))
}

pub async fn document_statistics(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
    query: Result<Query<StatisticsQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let document_type = optional(query.document_type)
        .map(|name| DocumentType::from_str(&name))
        .transpose()?;

    let statistics = state
        .search
        .database()
        .document_statistics(&document_id, document_type)
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    Ok(Json(json!({
        "success": true,
        "documentId": document_id,
        "statistics": statistics,
    })))
}

pub async fn store_statistics(State(state): State<AppState>) -> ApiResult {
    let database = state.search.database();
    let statistics = database
        .store_statistics()
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;

    Ok(Json(json!({
        "success": true,
        "statistics": statistics,
        "vectorSupport": database.vector_support().await,
    })))
}

pub async fn get_config(State(state): State<AppState>) -> Json<Value> {
    Json(config_body(&state.search.config().get()))
}

pub async fn patch_config(
    State(state): State<AppState>,
    payload: Result<Json<RetrievalConfigPatch>, JsonRejection>,
) -> ApiResult {
    let Json(patch) = payload?;
    let config = state.search.config().set(&patch)?;
    Ok(Json(config_body(&config)))
}

pub async fn load_preset(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let preset = Preset::from_str(&name)?;
    let config = state.search.config().load_preset(preset);
    Ok(Json(config_body(&config)))
}

pub async fn reset_config(State(state): State<AppState>) -> Json<Value> {
    Json(config_body(&state.search.config().reset()))
}
