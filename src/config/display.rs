use console::style;
use std::fmt::{self, Write};

use super::Config;
use crate::database::sqlite::models::EmbeddingFormat;

/// Print the effective configuration to stdout
#[inline]
pub fn show_config(config: &Config) {
    print!("{}", render_config(config));
}

#[inline]
pub fn render_config(config: &Config) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_config(&mut out, config);
    out
}

fn write_config(out: &mut String, config: &Config) -> fmt::Result {
    let embedding = &config.embedding;

    writeln!(out, "{}", style("📋 Current Configuration").bold().cyan())?;
    writeln!(out)?;

    writeln!(out, "{}", style("Embedding Provider:").bold().yellow())?;
    writeln!(out, "  Base URL: {}", style(&embedding.base_url).cyan())?;
    writeln!(out, "  Model: {}", style(&embedding.model).cyan())?;
    match embedding.resolved_api_key() {
        Some(key) => writeln!(out, "  API Key: {}", style(mask_key(&key)).cyan())?,
        None => writeln!(
            out,
            "  API Key: {}",
            style("not set (text-only mode)").red()
        )?,
    }
    writeln!(out, "  Timeout: {}s", style(embedding.timeout_seconds).cyan())?;
    writeln!(
        out,
        "  Retry Attempts: {}",
        style(embedding.retry_attempts).cyan()
    )?;
    writeln!(
        out,
        "  Batch Delay: {}ms",
        style(embedding.embedding_delay_ms).cyan()
    )?;

    writeln!(out)?;
    writeln!(out, "{}", style("Storage:").bold().yellow())?;
    writeln!(
        out,
        "  Database: {}",
        style(config.database_path().display()).cyan()
    )?;
    let format = match config.storage.embedding_format {
        EmbeddingFormat::Serialized => "serialized",
        EmbeddingFormat::Native => "native",
    };
    writeln!(out, "  Embedding Format: {}", style(format).cyan())?;

    writeln!(out)?;
    writeln!(out, "{}", style("Server:").bold().yellow())?;
    writeln!(out, "  Bind: {}", style(&config.server.bind).cyan())?;

    writeln!(out)?;
    writeln!(out, "{}", style("Retrieval:").bold().yellow())?;
    writeln!(out, "  Preset: {}", style(&config.retrieval.preset).cyan())?;

    writeln!(out)?;
    writeln!(
        out,
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    )
}

fn mask_key(key: &str) -> String {
    let skip = key.chars().count().saturating_sub(4);
    format!("****{}", key.chars().skip(skip).collect::<String>())
}
