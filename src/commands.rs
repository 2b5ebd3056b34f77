//! CLI command implementations.
//!
//! Each `run_*` function opens the configured database, performs one
//! operation through the [`Orchestrator`], and prints a human-readable
//! result to stdout. Failures propagate to `main`, which exits non-zero.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::warn;

use ragchat_core::models::Message;
use ragchat_core::orchestrator::Orchestrator;
use ragchat_core::store::Store;
use ragchat_core::RagError;

use crate::app;
use crate::config::Config;
use crate::extract;

/// Longest message preview shown by `chat list`.
const PREVIEW_CHARS: usize = 60;

/// Store a file, or every matching file under a directory, as documents.
/// Without `--title` the file stem is used.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    title: Option<String>,
    globs: &[String],
) -> Result<()> {
    if path.is_dir() {
        if title.is_some() {
            bail!("--title applies to a single file, not a directory");
        }
        return run_ingest_dir(config, path, globs).await;
    }

    let content = extract::extract_file(path)?;
    let title = title.unwrap_or_else(|| title_for(path));

    let orchestrator = app::open(config).await?;
    let doc = orchestrator
        .ingest_document(&title, &content)
        .await
        .context("document stored but not indexed; it is retried on the next sync")?;

    println!("Stored document {}", doc.id);
    println!("  title:   {}", doc.title);
    match &doc.index_ref {
        Some(index_ref) => println!("  indexed: {}", index_ref),
        None => println!("  indexed: deferred (rebuilt per request)"),
    }
    Ok(())
}

/// Ingest every file under `root` matching `globs` (or the defaults).
/// Files without extractable text are skipped. Files that are stored but
/// fail to embed make the command exit non-zero after the whole batch.
async fn run_ingest_dir(config: &Config, root: &Path, globs: &[String]) -> Result<()> {
    let patterns: Vec<String> = if globs.is_empty() {
        extract::DEFAULT_INGEST_GLOBS
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        globs.to_vec()
    };
    let files = extract::collect_files(root, &patterns)?;
    if files.is_empty() {
        println!("No matching files in {}", root.display());
        return Ok(());
    }

    let orchestrator = app::open(config).await?;
    let (mut stored, mut not_indexed, mut skipped) = (0usize, 0usize, 0usize);

    for file in &files {
        let name = file.strip_prefix(root).unwrap_or(file).display().to_string();
        let content = match extract::extract_file(file) {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                println!("  skipped  {} (no text)", name);
                skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(file = %name, error = %e, "extraction failed");
                println!("  skipped  {} ({:#})", name, e);
                skipped += 1;
                continue;
            }
        };

        match orchestrator.ingest_document(&title_for(file), &content).await {
            Ok(doc) => {
                stored += 1;
                println!("  stored   {} -> {}", name, doc.id);
            }
            Err(RagError::Embedding(e)) => {
                stored += 1;
                not_indexed += 1;
                println!("  stored   {} (not indexed: {})", name, e);
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to ingest {}", name)),
        }
    }

    println!(
        "Ingested {} of {} files ({} not indexed, {} skipped)",
        stored,
        files.len(),
        not_indexed,
        skipped
    );
    if not_indexed > 0 {
        bail!(
            "{} documents stored but not indexed; they are retried on the next sync",
            not_indexed
        );
    }
    Ok(())
}

fn title_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub async fn run_documents(config: &Config) -> Result<()> {
    let orchestrator = app::open(config).await?;
    let docs = orchestrator.store().list_documents().await?;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }

    println!("{:<36}  {:<16}  {:<10}  TITLE", "ID", "CREATED", "INDEXED");
    for doc in &docs {
        println!(
            "{:<36}  {:<16}  {:<10}  {}",
            doc.id,
            format_ts(&doc.created_at),
            if doc.index_ref.is_some() { "yes" } else { "no" },
            doc.title
        );
    }
    Ok(())
}

pub async fn run_chat_new(config: &Config, title: Option<String>) -> Result<()> {
    let orchestrator = app::open(config).await?;
    let chat = orchestrator.create_chat(title.as_deref()).await?;
    println!("Created chat {}", chat.id);
    println!("  title: {}", chat.title);
    Ok(())
}

/// Chats, most recently active first, each with a preview of its last
/// message.
pub async fn run_chat_list(config: &Config) -> Result<()> {
    let orchestrator = app::open(config).await?;
    let store = orchestrator.store();
    let chats = store.list_chats().await?;

    if chats.is_empty() {
        println!("No chats.");
        return Ok(());
    }

    for chat in &chats {
        println!("{}  {}", chat.id, chat.title);
        match store.last_message(&chat.id).await? {
            Some(last) => println!(
                "    {} {}: {}",
                format_ts(&last.created_at),
                speaker(&last),
                preview(&last.content)
            ),
            None => println!("    (no messages)"),
        }
    }
    Ok(())
}

pub async fn run_chat_show(config: &Config, chat_id: &str) -> Result<()> {
    let orchestrator = app::open(config).await?;
    let (chat, messages) = orchestrator.chat_with_messages(chat_id).await?;

    println!("--- Chat ---");
    println!("id:         {}", chat.id);
    println!("title:      {}", chat.title);
    println!("created_at: {}", format_ts(&chat.created_at));
    println!();
    println!("--- Messages ({}) ---", messages.len());
    for message in &messages {
        println!("[{}] {}", format_ts(&message.created_at), speaker(message));
        println!("{}", message.content);
        println!();
    }
    Ok(())
}

/// Answer a message in a chat and print the reply with its sources.
pub async fn run_ask(config: &Config, chat_id: &str, message: &str) -> Result<()> {
    let orchestrator = app::open(config).await?;
    ensure_chat(&orchestrator, chat_id).await?;
    app::warm_index(&orchestrator).await?;

    let outcome = orchestrator.send_message(chat_id, message).await?;

    println!("{}", outcome.assistant_message.content);
    println!();
    println!(
        "grounding: {}",
        serde_json::to_value(outcome.grounding)?
            .as_str()
            .unwrap_or_default()
    );
    if let Some(evaluation) = &outcome.evaluation {
        println!("evaluation: {}/10 {}", evaluation.score, evaluation.explanation);
    }
    if !outcome.source_chunks.is_empty() {
        println!();
        println!("--- Sources ({}) ---", outcome.source_chunks.len());
        for (i, source) in outcome.source_chunks.iter().enumerate() {
            println!(
                "{}. [{:.3}] {} #{}",
                i + 1,
                source.score,
                source.document_id,
                source.chunk_index
            );
            println!("   {}", preview(&source.text));
        }
    }
    Ok(())
}

/// Fail fast on an unknown chat, before warming the index.
async fn ensure_chat(orchestrator: &Orchestrator, chat_id: &str) -> Result<()> {
    if orchestrator.store().get_chat(chat_id).await?.is_none() {
        bail!("chat not found: {}", chat_id);
    }
    Ok(())
}

fn speaker(message: &Message) -> &'static str {
    if message.is_user {
        "you"
    } else {
        "assistant"
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    format!("{}...", cut.trim_end())
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
