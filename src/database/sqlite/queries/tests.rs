use super::*;
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::migrate!("src/database/sqlite/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

fn new_record(document_id: &str, vector_type: &str, embedding: Option<Vec<f32>>) -> NewVectorRecord {
    NewVectorRecord {
        document_id: document_id.to_string(),
        document_type: DocumentType::Personality,
        vector_type: vector_type.to_string(),
        content: format!("{} content for {}", vector_type, document_id),
        embedding,
        metadata: json!({ "bot_name": document_id }),
    }
}

async fn insert_raw_embedding(pool: &SqlitePool, id: &str, embedding_sql: &str) {
    let sql = format!(
        "INSERT INTO vector_records (id, document_id, document_type, vector_type, content, embedding, metadata, created_at, updated_at) \
         VALUES (?, 'raw-doc', 'script', ?, 'raw content', {embedding_sql}, '{{}}', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')"
    );
    sqlx::query(&sql)
        .bind(id)
        .bind(id)
        .execute(pool)
        .await
        .expect("raw insert should succeed");
}

#[tokio::test]
async fn upsert_inserts_then_replaces() {
    let (_temp_dir, pool) = create_test_pool().await;

    let created = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");
    assert_eq!(created.embedding, Ok(None));

    let mut replacement = new_record("bot-1", "basic_info", Some(vec![0.5, 0.5]));
    replacement.content = "updated content".to_string();
    replacement.metadata = json!({ "bot_name": "Renamed" });

    let updated = VectorQueries::upsert(&pool, &replacement, EmbeddingFormat::Serialized)
        .await
        .expect("Failed to replace record");

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.content, "updated content");
    assert_eq!(updated.metadata, json!({ "bot_name": "Renamed" }));
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);
    assert_eq!(
        updated.embedding,
        Ok(Some(StoredEmbedding::Serialized("[0.5,0.5]".to_string())))
    );

    let rows = VectorQueries::list_by_document(&pool, "bot-1", Some(DocumentType::Personality))
        .await
        .expect("Failed to list rows");
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn upsert_after_soft_delete_creates_new_record() {
    let (_temp_dir, pool) = create_test_pool().await;

    let original = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");

    VectorQueries::soft_delete(&pool, "bot-1", DocumentType::Personality)
        .await
        .expect("Failed to delete");

    let recreated = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to recreate record");

    assert_ne!(recreated.id, original.id);
    assert!(
        VectorQueries::get_by_id(&pool, &original.id)
            .await
            .expect("query should succeed")
            .is_none()
    );
}

#[tokio::test]
async fn upsert_without_embedding_keeps_it_only_for_same_content() {
    let (_temp_dir, pool) = create_test_pool().await;

    VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", Some(vec![0.5, 0.25])),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");

    let unchanged = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to rewrite record");
    assert_eq!(
        unchanged.embedding,
        Ok(Some(StoredEmbedding::Serialized("[0.5,0.25]".to_string())))
    );

    let mut edited = new_record("bot-1", "basic_info", None);
    edited.content = "edited content".to_string();
    let edited = VectorQueries::upsert(&pool, &edited, EmbeddingFormat::Serialized)
        .await
        .expect("Failed to rewrite record");
    assert_eq!(edited.embedding, Ok(None));
}

#[tokio::test]
async fn soft_delete_except_retires_other_vector_types() {
    let (_temp_dir, pool) = create_test_pool().await;

    for vector_type in ["basic_info", "preferences", "comprehensive"] {
        VectorQueries::upsert(
            &pool,
            &new_record("bot-1", vector_type, None),
            EmbeddingFormat::Serialized,
        )
        .await
        .expect("Failed to insert record");
    }
    VectorQueries::upsert(
        &pool,
        &new_record("bot-2", "preferences", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");

    let keep = vec!["basic_info".to_string(), "comprehensive".to_string()];
    let retired =
        VectorQueries::soft_delete_except(&pool, "bot-1", DocumentType::Personality, &keep)
            .await
            .expect("Failed to retire vectors");
    assert_eq!(retired.vector_types, vec!["preferences"]);

    let rows = VectorQueries::list_by_document(&pool, "bot-1", Some(DocumentType::Personality))
        .await
        .expect("Failed to list rows");
    let types: Vec<&str> = rows.iter().map(|row| row.vector_type.as_str()).collect();
    assert_eq!(types, vec!["basic_info", "comprehensive"]);

    // Other documents are untouched and a second pass retires nothing
    let other = VectorQueries::list_by_document(&pool, "bot-2", None)
        .await
        .expect("Failed to list rows");
    assert_eq!(other.len(), 1);
    let again =
        VectorQueries::soft_delete_except(&pool, "bot-1", DocumentType::Personality, &keep)
            .await
            .expect("Failed to retire vectors");
    assert_eq!(again.count(), 0);
}

#[tokio::test]
async fn native_embeddings_are_stored_as_blobs() {
    let (_temp_dir, pool) = create_test_pool().await;

    let row = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", Some(vec![1.0, 0.0, -1.0])),
        EmbeddingFormat::Native,
    )
    .await
    .expect("Failed to insert record");

    assert!(matches!(row.embedding, Ok(Some(StoredEmbedding::Native(_)))));
    let record = row.decode().expect("blob should decode");
    assert_eq!(record.embedding, Some(vec![1.0, 0.0, -1.0]));
}

#[tokio::test]
async fn empty_embedding_is_stored_as_null() {
    let (_temp_dir, pool) = create_test_pool().await;

    let row = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", Some(Vec::new())),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");

    assert_eq!(row.embedding, Ok(None));
}

#[tokio::test]
async fn update_embedding_fills_pending_record() {
    let (_temp_dir, pool) = create_test_pool().await;

    let row = VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");

    let pending = VectorQueries::list_pending(&pool)
        .await
        .expect("Failed to list pending");
    assert_eq!(pending.len(), 1);

    let updated = VectorQueries::update_embedding(
        &pool,
        &row.id,
        Some(&[0.1, 0.2]),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to update embedding");
    assert!(updated);

    let pending = VectorQueries::list_pending(&pool)
        .await
        .expect("Failed to list pending");
    assert!(pending.is_empty());

    let fetched = VectorQueries::get_by_id(&pool, &row.id)
        .await
        .expect("query should succeed")
        .expect("row should exist")
        .decode()
        .expect("embedding should decode");
    assert_eq!(fetched.embedding, Some(vec![0.1, 0.2]));
    assert!(fetched.updated_at >= row.updated_at);
}

#[tokio::test]
async fn update_embedding_on_missing_record() {
    let (_temp_dir, pool) = create_test_pool().await;

    let updated = VectorQueries::update_embedding(
        &pool,
        "does-not-exist",
        Some(&[0.1]),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("query should succeed");
    assert!(!updated);
}

#[tokio::test]
async fn list_embedded_applies_filters() {
    let (_temp_dir, pool) = create_test_pool().await;

    for (document_id, vector_type, embedding) in [
        ("bot-1", "basic_info", Some(vec![1.0, 0.0])),
        ("bot-1", "preferences", Some(vec![0.0, 1.0])),
        ("bot-2", "basic_info", Some(vec![0.5, 0.5])),
        ("bot-3", "basic_info", None),
    ] {
        VectorQueries::upsert(
            &pool,
            &new_record(document_id, vector_type, embedding),
            EmbeddingFormat::Serialized,
        )
        .await
        .expect("Failed to insert record");
    }

    let all = VectorQueries::list_embedded(&pool, &CandidateFilter::default())
        .await
        .expect("Failed to list");
    assert_eq!(all.len(), 3);

    let basic = VectorQueries::list_embedded(
        &pool,
        &CandidateFilter {
            vector_type: Some("basic_info".to_string()),
            ..CandidateFilter::default()
        },
    )
    .await
    .expect("Failed to list");
    assert_eq!(
        basic.iter().map(|r| r.document_id.as_str()).collect::<Vec<_>>(),
        vec!["bot-1", "bot-2"]
    );

    let others = VectorQueries::list_embedded(
        &pool,
        &CandidateFilter {
            exclude_document_id: Some("bot-1".to_string()),
            ..CandidateFilter::default()
        },
    )
    .await
    .expect("Failed to list");
    assert_eq!(others.len(), 1);
    assert_eq!(others[0].document_id, "bot-2");

    let only = VectorQueries::list_embedded(
        &pool,
        &CandidateFilter {
            include_document_id: Some("bot-1".to_string()),
            exclude_document_id: Some("bot-1".to_string()),
            ..CandidateFilter::default()
        },
    )
    .await
    .expect("Failed to list");
    assert_eq!(only.len(), 2);

    let scripts = VectorQueries::list_embedded(
        &pool,
        &CandidateFilter {
            document_type: Some(DocumentType::Script),
            ..CandidateFilter::default()
        },
    )
    .await
    .expect("Failed to list");
    assert!(scripts.is_empty());
}

#[tokio::test]
async fn soft_delete_is_idempotent() {
    let (_temp_dir, pool) = create_test_pool().await;

    for vector_type in ["basic_info", "preferences"] {
        VectorQueries::upsert(
            &pool,
            &new_record("bot-1", vector_type, Some(vec![1.0])),
            EmbeddingFormat::Serialized,
        )
        .await
        .expect("Failed to insert record");
    }

    let first = VectorQueries::soft_delete(&pool, "bot-1", DocumentType::Personality)
        .await
        .expect("Failed to delete");
    assert_eq!(first.count(), 2);
    assert_eq!(first.vector_types.len(), 2);
    assert!(first.vector_types.contains(&"preferences".to_string()));

    let second = VectorQueries::soft_delete(&pool, "bot-1", DocumentType::Personality)
        .await
        .expect("Failed to delete again");
    assert_eq!(second.count(), 0);

    let embedded = VectorQueries::list_embedded(&pool, &CandidateFilter::default())
        .await
        .expect("Failed to list");
    assert!(embedded.is_empty());
    let listed = VectorQueries::list_by_document(&pool, "bot-1", None)
        .await
        .expect("Failed to list");
    assert!(listed.is_empty());
}

#[tokio::test]
async fn soft_delete_only_touches_matching_type() {
    let (_temp_dir, pool) = create_test_pool().await;

    VectorQueries::upsert(
        &pool,
        &new_record("shared-id", "content", Some(vec![1.0])),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");

    let deleted = VectorQueries::soft_delete(&pool, "shared-id", DocumentType::Script)
        .await
        .expect("Failed to delete");
    assert_eq!(deleted.count(), 0);

    let remaining = VectorQueries::list_by_document(&pool, "shared-id", None)
        .await
        .expect("Failed to list");
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn unreadable_embeddings_surface_as_format_errors() {
    let (_temp_dir, pool) = create_test_pool().await;

    insert_raw_embedding(&pool, "text-garbage", "'not a vector'").await;
    insert_raw_embedding(&pool, "integer", "42").await;
    insert_raw_embedding(&pool, "good-text", "'[0.6,0.8]'").await;

    let rows = VectorQueries::list_embedded(&pool, &CandidateFilter::default())
        .await
        .expect("listing must not fail on bad rows");
    assert_eq!(rows.len(), 3);

    let decoded: Vec<_> = rows.into_iter().map(VectorRow::decode).collect();
    assert!(matches!(
        &decoded[0],
        Err(MalformedRecord {
            error: DataFormatError::UnparseableText(_),
            ..
        })
    ));
    assert!(matches!(
        &decoded[1],
        Err(MalformedRecord {
            error: DataFormatError::UnsupportedType(kind),
            ..
        }) if kind == "integer"
    ));
    let good = decoded[2].as_ref().expect("text embedding should decode");
    assert_eq!(good.embedding, Some(vec![0.6, 0.8]));
}

#[tokio::test]
async fn count_by_type_ignores_deleted() {
    let (_temp_dir, pool) = create_test_pool().await;

    VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "basic_info", Some(vec![1.0])),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");
    VectorQueries::upsert(
        &pool,
        &new_record("bot-1", "preferences", None),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");
    VectorQueries::upsert(
        &pool,
        &new_record("bot-2", "basic_info", Some(vec![1.0])),
        EmbeddingFormat::Serialized,
    )
    .await
    .expect("Failed to insert record");
    VectorQueries::soft_delete(&pool, "bot-2", DocumentType::Personality)
        .await
        .expect("Failed to delete");

    let counts = VectorQueries::count_by_type(&pool)
        .await
        .expect("Failed to count");
    assert_eq!(
        counts,
        vec![TypeCount {
            document_type: DocumentType::Personality,
            total: 2,
            embedded: 1,
        }]
    );

    assert!(VectorQueries::probe_embedding_column(&pool).await);
}
