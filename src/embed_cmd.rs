//! `rgpd embed pending|rebuild` and inline embedding during sync.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::Chunk;

/// Find and embed chunks that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size).max(1);

    let pending = find_pending_chunks(&pool, provider.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  chunks needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all chunks up to date");
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) = embed_batches(&pool, provider.as_ref(), &pending, batch_size).await?;

    println!("embed pending");
    println!("  total pending: {}", pending.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Delete all embeddings and regenerate for all chunks.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size).max(1);

    sqlx::query("DELETE FROM chunk_vectors").execute(&pool).await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    println!("embed rebuild — cleared existing embeddings");

    let all_chunks = find_pending_chunks(&pool, provider.model_name(), None).await?;

    if all_chunks.is_empty() {
        println!("  no chunks to embed");
        pool.close().await;
        return Ok(());
    }

    let (embedded, failed) =
        embed_batches(&pool, provider.as_ref(), &all_chunks, batch_size).await?;

    println!("embed rebuild");
    println!("  total chunks: {}", all_chunks.len());
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Embeds freshly written chunks during sync. Failures are logged and
/// counted as pending; `rgpd embed pending` picks them up later.
///
/// Returns `(embedded, pending)`.
pub async fn embed_chunks_inline(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    chunks: &[Chunk],
    batch_size: usize,
) -> (u64, u64) {
    let pending: Vec<PendingChunk> = chunks
        .iter()
        .map(|c| PendingChunk {
            chunk_id: c.id.clone(),
            document_id: c.document_id.clone(),
            text: c.text.clone(),
            text_hash: c.hash.clone(),
        })
        .collect();

    match embed_batches(pool, provider, &pending, batch_size.max(1)).await {
        Ok(counts) => counts,
        Err(e) => {
            warn!(error = %e, "failed to store embeddings");
            (0, pending.len() as u64)
        }
    }
}

/// Embeds `pending` in batches. A failed provider call skips its batch;
/// a storage error aborts.
async fn embed_batches(
    pool: &SqlitePool,
    provider: &dyn EmbeddingProvider,
    pending: &[PendingChunk],
    batch_size: usize,
) -> Result<(u64, u64)> {
    let mut embedded = 0u64;
    let mut failed = 0u64;

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();

        match provider.embed(&texts).await {
            Ok(vectors) => {
                for (item, vec) in batch.iter().zip(vectors.iter()) {
                    upsert_embedding(pool, item, provider.model_name(), provider.dims(), vec)
                        .await?;
                    embedded += 1;
                }
            }
            Err(e) => {
                warn!(error = %e, batch = batch.len(), "embedding batch failed");
                failed += batch.len() as u64;
            }
        }
    }

    Ok((embedded, failed))
}

struct PendingChunk {
    chunk_id: String,
    document_id: String,
    text: String,
    text_hash: String,
}

async fn find_pending_chunks(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingChunk>> {
    let limit_val = limit.map(|l| l as i64).unwrap_or(-1);

    // Chunks that either have no embedding or have a stale hash
    let rows = sqlx::query(
        r#"
        SELECT c.id AS chunk_id, c.document_id, c.text, c.hash AS chunk_hash
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_id = c.id AND e.model = ?
        WHERE e.chunk_id IS NULL OR e.hash != c.hash
        ORDER BY c.document_id, c.chunk_index
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit_val)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PendingChunk {
            chunk_id: row.get("chunk_id"),
            document_id: row.get("document_id"),
            text: row.get("text"),
            text_hash: row.get("chunk_hash"),
        })
        .collect())
}

async fn upsert_embedding(
    pool: &SqlitePool,
    item: &PendingChunk,
    model: &str,
    dims: usize,
    vector: &[f32],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let blob = embedding::vec_to_blob(vector);

    let mut tx = pool.begin().await?;
    sqlx::query(
        r#"
        INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            model = excluded.model,
            dims = excluded.dims,
            created_at = excluded.created_at,
            hash = excluded.hash
        "#,
    )
    .bind(&item.chunk_id)
    .bind(model)
    .bind(dims as i64)
    .bind(now)
    .bind(&item.text_hash)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, embedding)
        VALUES (?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            document_id = excluded.document_id,
            embedding = excluded.embedding
        "#,
    )
    .bind(&item.chunk_id)
    .bind(&item.document_id)
    .bind(&blob)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}
