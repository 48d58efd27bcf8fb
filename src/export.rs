//! Export the stored records as JSON.
//!
//! One file holds every document with its metadata columns and every
//! chunk, so a dataset can be inspected or reloaded without re-scraping.

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;
use std::path::Path;

use crate::config::Config;
use crate::db;

#[derive(Serialize)]
struct ExportData {
    exported_at: String,
    documents: Vec<ExportDocument>,
    chunks: Vec<ExportChunk>,
}

#[derive(Serialize)]
struct ExportDocument {
    id: String,
    source: String,
    source_id: String,
    source_url: Option<String>,
    title: Option<String>,
    updated_at: i64,
    body: String,
    metadata: serde_json::Value,
}

#[derive(Serialize)]
struct ExportChunk {
    id: String,
    document_id: String,
    chunk_index: i64,
    text: String,
}

/// Export documents and chunks as JSON, optionally for one source only.
///
/// If `output` is `Some`, writes to that file path. Otherwise writes
/// to stdout for piping.
pub async fn run_export(
    config: &Config,
    source: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let pool = db::connect(config).await?;

    let doc_rows = sqlx::query(
        "SELECT id, source, source_id, source_url, title, updated_at, body, metadata_json \
         FROM documents WHERE (?1 IS NULL OR source = ?1) ORDER BY source, source_id",
    )
    .bind(source)
    .fetch_all(&pool)
    .await?;

    let chunk_rows = sqlx::query(
        "SELECT c.id, c.document_id, c.chunk_index, c.text \
         FROM chunks c JOIN documents d ON d.id = c.document_id \
         WHERE (?1 IS NULL OR d.source = ?1) ORDER BY c.document_id, c.chunk_index",
    )
    .bind(source)
    .fetch_all(&pool)
    .await?;

    let documents: Vec<ExportDocument> = doc_rows
        .iter()
        .map(|row| {
            let metadata_json: String = row.get("metadata_json");
            ExportDocument {
                id: row.get("id"),
                source: row.get("source"),
                source_id: row.get("source_id"),
                source_url: row.get("source_url"),
                title: row.get("title"),
                updated_at: row.get("updated_at"),
                body: row.get("body"),
                metadata: serde_json::from_str(&metadata_json)
                    .unwrap_or(serde_json::json!({})),
            }
        })
        .collect();

    let chunks: Vec<ExportChunk> = chunk_rows
        .iter()
        .map(|row| ExportChunk {
            id: row.get("id"),
            document_id: row.get("document_id"),
            chunk_index: row.get("chunk_index"),
            text: row.get("text"),
        })
        .collect();

    let doc_count = documents.len();
    let chunk_count = chunks.len();

    let data = ExportData {
        exported_at: chrono::Utc::now().to_rfc3339(),
        documents,
        chunks,
    };
    let json = serde_json::to_string_pretty(&data)?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &json)?;
            eprintln!(
                "Exported {} documents, {} chunks to {}",
                doc_count,
                chunk_count,
                path.display()
            );
        }
        None => {
            println!("{}", json);
        }
    }

    pool.close().await;
    Ok(())
}
