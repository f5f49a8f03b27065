use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{API_KEY_ENV, Config};
use crate::database::sqlite::Database;
use crate::embeddings::{EmbeddingClient, EmbeddingProvider};
use crate::retrieval::{ActiveConfig, ChatProcessingPatch, RetrievalConfigPatch};
use crate::search::{ScoredResult, SearchOptions, SearchService};
use crate::server::{self, AppState};
use crate::vectorizer::Vectorizer;

const PREVIEW_CHARS: usize = 100;

/// Open (and migrate) the vector store described by `config`
#[inline]
pub async fn open_database(config: &Config) -> Result<Database> {
    let database = Database::initialize_in_dir(config.base_dir(), &config.storage.database_file)
        .await
        .context("Failed to initialize database")?;
    Ok(database.with_embedding_format(config.storage.embedding_format))
}

/// Wire the store, the embedding client and the active retrieval config together
#[inline]
pub async fn build_state(config: &Config) -> Result<AppState> {
    let database = open_database(config).await?;

    let client = EmbeddingClient::new(&config.embedding)?;
    if !client.has_credentials() {
        warn!(
            "No API key configured ({} or embedding.api_key), running in text-only mode",
            API_KEY_ENV
        );
    }
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(client);
    info!("Using embedding model '{}'", embedder.model());

    let preset = config.retrieval.preset()?;
    info!("Starting with retrieval preset '{}'", preset);

    // The runtime config owns the embedding delay from here on
    let active = ActiveConfig::from_preset(preset);
    active.set(&RetrievalConfigPatch {
        chat_processing: Some(ChatProcessingPatch {
            embedding_delay_ms: Some(config.embedding.embedding_delay_ms),
            ..ChatProcessingPatch::default()
        }),
        ..RetrievalConfigPatch::default()
    })?;

    let search = SearchService::new(database.clone(), Arc::clone(&embedder), active.clone());
    let vectorizer = Vectorizer::new(database, embedder, active);

    Ok(AppState::new(search, vectorizer))
}

/// Run the HTTP API until interrupted
#[inline]
pub async fn serve(config: &Config, bind: Option<&str>) -> Result<()> {
    let bind: SocketAddr = match bind {
        Some(bind) => bind
            .parse()
            .with_context(|| format!("Invalid bind address: {}", bind))?,
        None => config.server.bind_addr()?,
    };

    let state = build_state(config).await?;
    server::serve(state, bind).await
}

/// One-off search from the command line
#[inline]
pub async fn search_command(
    config: &Config,
    query: &str,
    options: &SearchOptions,
    best: bool,
) -> Result<()> {
    let state = build_state(config).await?;

    if best {
        match state.search.best_match(query, options).await? {
            Some(result) => {
                println!("🎯 Best match for \"{}\":", query);
                print_result(1, &result);
            }
            None => println!("No candidates to compare against."),
        }
        return Ok(());
    }

    let report = state.search.search(query, options).await?;
    println!("🔍 Search: \"{}\"", query);
    println!(
        "   Threshold: {}  Limit: {}  Matches: {}/{}",
        report.threshold, report.limit, report.matched, report.total_candidates
    );

    if report.query_dimension == 0 {
        println!("   ⚠️  No query embedding available (is {} set?)", API_KEY_ENV);
    }
    if !report.skipped.is_empty() {
        println!("   ⚠️  Skipped {} unreadable vectors", report.skipped.len());
    }
    println!();

    if report.results.is_empty() {
        println!("No results above the similarity threshold.");
        return Ok(());
    }

    for (rank, result) in report.results.iter().enumerate() {
        print_result(rank + 1, result);
    }

    Ok(())
}

/// Embed every stored vector that is still missing an embedding
#[inline]
pub async fn vectorize_pending_command(config: &Config) -> Result<()> {
    let state = build_state(config).await?;
    let report = state.vectorizer.vectorize_pending().await?;

    if report.total == 0 {
        println!("✅ Nothing to vectorize, every vector has an embedding.");
        return Ok(());
    }

    println!(
        "🧮 Vectorized {}/{} pending vectors",
        report.succeeded_count(),
        report.total
    );
    for message in report.error_messages() {
        println!("   ❌ {}", message);
    }

    Ok(())
}

/// Print store-wide embedding coverage
#[inline]
pub async fn show_stats(config: &Config) -> Result<()> {
    let database = open_database(config).await?;
    let stats = database
        .store_statistics()
        .await
        .context("Failed to collect store statistics")?;

    println!("📊 Vector Store Status");
    println!("{}", "=".repeat(50));
    println!("🗄️  Database: {}", config.database_path().display());
    println!(
        "   Embedding column: {}",
        if database.vector_support().await {
            "✅ readable"
        } else {
            "❌ unavailable"
        }
    );
    println!();

    println!(
        "📚 Vectors: {} total, {} with embeddings",
        stats.total_vectors, stats.embedded_vectors
    );
    for count in &stats.by_type {
        let percent = if count.total > 0 {
            count.embedded as f64 / count.total as f64 * 100.0
        } else {
            0.0
        };
        println!(
            "   {:<14} {:>6} vectors, {:>6} embedded ({:.1}%)",
            count.document_type.as_str(),
            count.total,
            count.embedded,
            percent
        );
    }

    let pending = stats.total_vectors - stats.embedded_vectors;
    if pending > 0 {
        println!();
        println!(
            "💡 {} vectors lack embeddings. Run 'persona-retrieval vectorize-pending'.",
            pending
        );
    }

    Ok(())
}

fn print_result(rank: usize, result: &ScoredResult) {
    let marker = if result.force_use { " ⭐ force use" } else { "" };
    println!(
        "{}. [{:.4}] {} {} ({}){}",
        rank,
        result.similarity,
        result.document_type,
        result.document_id,
        result.vector_type,
        marker
    );
    println!("   {}", preview(&result.content));
}

fn preview(content: &str) -> String {
    if content.chars().count() > PREVIEW_CHARS {
        format!("{}...", content.chars().take(PREVIEW_CHARS).collect::<String>())
    } else {
        content.to_string()
    }
}
