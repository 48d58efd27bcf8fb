//! Ingestion pipeline orchestration.
//!
//! Coordinates the sync flow for each scrape target: scrape → dedup check →
//! upsert → chunking → inline embedding → removal of documents the site no
//! longer lists. Inline embedding is non-fatal; chunks it could not embed
//! stay pending for `rgpd embed pending`.

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::db;
use crate::embed_cmd;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::SourceItem;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};
use crate::scrape::{self, TARGETS};

/// Counters for one synced target.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub fetched: u64,
    pub upserted: u64,
    pub unchanged: u64,
    pub removed: u64,
    pub chunks_written: u64,
    pub embeddings_written: u64,
    pub embeddings_pending: u64,
}

/// Expands `all` into every target and rejects unknown names.
pub fn resolve_targets(target: &str) -> Result<Vec<&'static str>> {
    if target == "all" {
        return Ok(TARGETS.to_vec());
    }
    match TARGETS.iter().find(|t| **t == target) {
        Some(t) => Ok(vec![*t]),
        None => bail!(
            "Unknown target: '{}'. Available: all, {}",
            target,
            TARGETS.join(", ")
        ),
    }
}

/// Syncs each resolved target in turn. A failing target is logged and the
/// remaining targets still run; the failures are returned together at the end.
pub async fn run_sync(
    config: &Config,
    target: &str,
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
    progress: &dyn SyncProgressReporter,
) -> Result<()> {
    let targets = resolve_targets(target)?;
    let mut failures = Vec::new();

    for target in targets {
        if let Err(e) = sync_target(config, target, full, dry_run, limit, progress).await {
            error!(target, error = %format!("{:#}", e), "sync failed");
            failures.push(format!("{}: {:#}", target, e));
        }
    }

    if !failures.is_empty() {
        bail!("sync failed for {}", failures.join("; "));
    }

    println!("ok");
    Ok(())
}

async fn sync_target(
    config: &Config,
    target: &str,
    full: bool,
    dry_run: bool,
    limit: Option<usize>,
    progress: &dyn SyncProgressReporter,
) -> Result<()> {
    let outcome = scrape::scrape_target(config, target, progress).await?;
    let mut items = outcome.items;
    // Removal needs the whole listing: no limit and no skipped page.
    let complete = outcome.complete && limit.is_none();
    if let Some(lim) = limit {
        items.truncate(lim);
    }

    if dry_run {
        println!("sync {} (dry-run)", target);
        println!("  items found: {}", items.len());
        let total_chunks: usize = items
            .iter()
            .map(|item| {
                chunk_text(
                    "tmp",
                    &item.body,
                    config.chunking.max_tokens,
                    config.chunking.overlap_tokens,
                )
                .len()
            })
            .sum();
        println!("  estimated chunks: {}", total_chunks);
        return Ok(());
    }

    if !outcome.complete {
        warn!(target, "scrape incomplete, keeping documents not seen this run");
    }

    let pool = db::connect(config).await?;
    let report = ingest_items(config, &pool, target, &items, full, complete, progress).await?;
    pool.close().await;

    println!("sync {}", target);
    println!("  fetched: {} items", report.fetched);
    println!("  upserted documents: {}", report.upserted);
    println!("  unchanged: {}", report.unchanged);
    println!("  removed: {}", report.removed);
    println!("  chunks written: {}", report.chunks_written);
    if config.embedding.is_enabled() {
        println!("  embeddings written: {}", report.embeddings_written);
        println!("  embeddings pending: {}", report.embeddings_pending);
    }
    Ok(())
}

/// Writes scraped items for `source` into the store.
///
/// Items whose dedup hash matches the stored document are skipped unless
/// `full` is set. When `complete` is true the items are the whole current
/// listing of `source`, and stored documents absent from it are deleted.
pub async fn ingest_items(
    config: &Config,
    pool: &SqlitePool,
    source: &str,
    items: &[SourceItem],
    full: bool,
    complete: bool,
    progress: &dyn SyncProgressReporter,
) -> Result<SyncReport> {
    let provider = inline_provider(config);
    let mut report = SyncReport {
        fetched: items.len() as u64,
        ..Default::default()
    };
    let mut seen = HashSet::new();
    let total = items.len() as u64;

    for (i, item) in items.iter().enumerate() {
        seen.insert(item.source_id.as_str());
        progress.report(SyncProgressEvent::Ingesting {
            target: source.to_string(),
            n: i as u64 + 1,
            total,
        });

        let dedup_hash = dedup_hash(item);
        let existing = find_document(pool, item).await?;
        if !full {
            if let Some((_, stored_hash)) = &existing {
                if *stored_hash == dedup_hash {
                    report.unchanged += 1;
                    continue;
                }
            }
        }

        let doc_id = existing
            .map(|(id, _)| id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        upsert_document(pool, &doc_id, item, &dedup_hash).await?;

        let chunks = chunk_text(
            &doc_id,
            &item.body,
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        );
        replace_chunks(pool, &doc_id, &chunks).await?;
        report.upserted += 1;
        report.chunks_written += chunks.len() as u64;

        match &provider {
            Some(provider) => {
                let (ok, pending) = embed_cmd::embed_chunks_inline(
                    pool,
                    provider.as_ref(),
                    &chunks,
                    config.embedding.batch_size,
                )
                .await;
                report.embeddings_written += ok;
                report.embeddings_pending += pending;
            }
            None if config.embedding.is_enabled() => {
                report.embeddings_pending += chunks.len() as u64;
            }
            None => {}
        }
    }

    if complete {
        if items.is_empty() {
            warn!(source, "scrape returned no items, keeping stored documents");
        } else {
            report.removed = remove_unseen(pool, source, &seen).await?;
        }
    }

    set_checkpoint(pool, source, chrono::Utc::now().timestamp()).await?;
    info!(
        source,
        upserted = report.upserted,
        unchanged = report.unchanged,
        removed = report.removed,
        "sync finished"
    );
    Ok(report)
}

fn inline_provider(config: &Config) -> Option<Box<dyn EmbeddingProvider>> {
    if !config.embedding.is_enabled() {
        return None;
    }
    match embedding::create_provider(&config.embedding) {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(error = %e, "could not create embedding provider, chunks left pending");
            None
        }
    }
}

fn dedup_hash(item: &SourceItem) -> String {
    let mut hasher = Sha256::new();
    for part in [&item.source, &item.source_id, &item.body, &item.metadata_json] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

async fn find_document(pool: &SqlitePool, item: &SourceItem) -> Result<Option<(String, String)>> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT id, dedup_hash FROM documents WHERE source = ? AND source_id = ?")
            .bind(&item.source)
            .bind(&item.source_id)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

async fn upsert_document(
    pool: &SqlitePool,
    doc_id: &str,
    item: &SourceItem,
    dedup_hash: &str,
) -> Result<()> {
    let scraped_at = item.scraped_at.timestamp();

    sqlx::query(
        r#"
        INSERT INTO documents (id, source, source_id, source_url, title, created_at, updated_at, body, metadata_json, dedup_hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(source, source_id) DO UPDATE SET
            source_url = excluded.source_url,
            title = excluded.title,
            updated_at = excluded.updated_at,
            body = excluded.body,
            metadata_json = excluded.metadata_json,
            dedup_hash = excluded.dedup_hash
        "#,
    )
    .bind(doc_id)
    .bind(&item.source)
    .bind(&item.source_id)
    .bind(&item.source_url)
    .bind(&item.title)
    .bind(scraped_at)
    .bind(scraped_at)
    .bind(&item.body)
    .bind(&item.metadata_json)
    .bind(dedup_hash)
    .execute(pool)
    .await?;

    Ok(())
}

async fn replace_chunks(
    pool: &SqlitePool,
    document_id: &str,
    chunks: &[crate::models::Chunk],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    db::delete_chunks(&mut tx, document_id).await?;

    for chunk in chunks {
        sqlx::query(
            "INSERT INTO chunks (id, document_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&chunk.id)
        .bind(&chunk.document_id)
        .bind(chunk.chunk_index)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO chunks_fts (chunk_id, document_id, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(())
}

async fn remove_unseen(pool: &SqlitePool, source: &str, seen: &HashSet<&str>) -> Result<u64> {
    let stored: Vec<(String, String)> =
        sqlx::query_as("SELECT id, source_id FROM documents WHERE source = ?")
            .bind(source)
            .fetch_all(pool)
            .await?;

    let mut tx = pool.begin().await?;
    let mut removed = 0u64;
    for (id, source_id) in stored {
        if !seen.contains(source_id.as_str()) {
            db::delete_document(&mut tx, &id).await?;
            removed += 1;
        }
    }
    tx.commit().await?;
    Ok(removed)
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor_val: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor_val.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}
