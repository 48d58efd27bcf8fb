//! Keyword, semantic and hybrid retrieval over stored chunks.
//!
//! Keyword candidates come from FTS5 (BM25 rank, negated so higher is
//! better). Semantic candidates are a brute-force cosine scan over every
//! stored vector. Hybrid min-max normalizes both channels to `[0, 1]` and
//! blends them as `(1 - α)·k + α·v`.
//!
//! [`search_chunks`] feeds answer context; [`search_documents`] groups hits
//! per document (MAX) for `rgpd search` and `POST /search`.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::SearchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Keyword,
    Semantic,
    Hybrid,
}

impl SearchMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "keyword" => Ok(SearchMode::Keyword),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            _ => bail!(
                "Unknown search mode: {}. Use keyword, semantic, or hybrid.",
                mode
            ),
        }
    }

    /// Mode used to retrieve answer context. `auto` picks hybrid when
    /// embeddings are enabled and keyword otherwise.
    pub fn for_context(config: &Config) -> Result<Self> {
        match config.retrieval.context_mode.as_str() {
            "auto" if config.embedding.is_enabled() => Ok(SearchMode::Hybrid),
            "auto" => Ok(SearchMode::Keyword),
            other => Self::parse(other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::Keyword => "keyword",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }

    fn uses_keyword(&self) -> bool {
        matches!(self, SearchMode::Keyword | SearchMode::Hybrid)
    }

    fn uses_vectors(&self) -> bool {
        matches!(self, SearchMode::Semantic | SearchMode::Hybrid)
    }

    fn alpha(&self, configured: f64) -> f64 {
        match self {
            SearchMode::Keyword => 0.0,
            SearchMode::Semantic => 1.0,
            SearchMode::Hybrid => configured,
        }
    }
}

/// A scored chunk.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    pub text: String,
    pub snippet: String,
}

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    raw_score: f64,
    text: String,
    snippet: String,
}

/// Returns the `k` best chunks for `query`, best first.
pub async fn search_chunks(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    mode: SearchMode,
    k: usize,
) -> Result<Vec<ChunkHit>> {
    let mut hits = score_chunks(pool, config, query, mode).await?;
    hits.truncate(k);
    Ok(hits)
}

async fn score_chunks(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    mode: SearchMode,
) -> Result<Vec<ChunkHit>> {
    if mode.uses_vectors() && !config.embedding.is_enabled() {
        bail!(
            "Mode '{}' requires embeddings. Set [embedding] provider in config.",
            mode.as_str()
        );
    }
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let keyword_candidates = if mode.uses_keyword() {
        fetch_keyword_candidates(pool, query, config.retrieval.candidate_k_keyword).await?
    } else {
        Vec::new()
    };

    let vector_candidates = if mode.uses_vectors() {
        fetch_vector_candidates(pool, config, query, config.retrieval.candidate_k_vector).await?
    } else {
        Vec::new()
    };

    let kw_map: HashMap<&str, f64> = normalize_scores(&keyword_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(&vector_candidates)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut all_chunks: HashMap<&str, &ChunkCandidate> = HashMap::new();
    for c in keyword_candidates.iter().chain(vector_candidates.iter()) {
        all_chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let alpha = mode.alpha(config.retrieval.hybrid_alpha);
    let mut hits: Vec<ChunkHit> = all_chunks
        .into_iter()
        .map(|(chunk_id, cand)| {
            let k = kw_map.get(chunk_id).copied().unwrap_or(0.0);
            let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
            ChunkHit {
                chunk_id: chunk_id.to_string(),
                document_id: cand.document_id.clone(),
                score: hybrid_score(k, v, alpha),
                text: cand.text.clone(),
                snippet: cand.snippet.clone(),
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    Ok(hits)
}

fn hybrid_score(k: f64, v: f64, alpha: f64) -> f64 {
    (1.0 - alpha) * k + alpha * v
}

/// Searches and groups hits per document, keeping each document's best
/// chunk. Sorted by score desc, then most recently updated, then id.
pub async fn search_documents(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    mode: SearchMode,
    source_filter: Option<&str>,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let hits = score_chunks(pool, config, query, mode).await?;

    // Hits are sorted best first, so the first one seen per document wins.
    let mut best: HashMap<&str, &ChunkHit> = HashMap::new();
    for hit in &hits {
        best.entry(hit.document_id.as_str()).or_insert(hit);
    }

    let mut results: Vec<(i64, SearchResult)> = Vec::new();
    for (doc_id, hit) in best {
        let row = sqlx::query(
            "SELECT id, title, source, source_id, updated_at, source_url FROM documents WHERE id = ?",
        )
        .bind(doc_id)
        .fetch_optional(pool)
        .await?;

        let Some(row) = row else { continue };
        let source: String = row.get("source");
        if source_filter.is_some_and(|f| f != source) {
            continue;
        }

        results.push((
            row.get("updated_at"),
            SearchResult {
                id: row.get("id"),
                title: row.get("title"),
                source,
                source_id: row.get("source_id"),
                source_url: row.get("source_url"),
                score: hit.score,
                snippet: hit.snippet.clone(),
            },
        ));
    }

    results.sort_by(|(a_updated, a), (b_updated, b)| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(b_updated.cmp(a_updated))
            .then(a.id.cmp(&b.id))
    });
    results.truncate(limit);

    Ok(results.into_iter().map(|(_, r)| r).collect())
}

pub async fn run_search(
    config: &Config,
    query: &str,
    mode: &str,
    source_filter: Option<String>,
    limit: Option<i64>,
) -> Result<()> {
    let mode = SearchMode::parse(mode)?;
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let limit = limit.unwrap_or(config.retrieval.final_limit).max(1) as usize;
    let results =
        search_documents(&pool, config, query, mode, source_filter.as_deref(), limit).await?;
    pool.close().await;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.source,
            title_display
        );
        println!("    ref: {}", result.source_id);
        if let Some(ref url) = result.source_url {
            println!("    url: {}", url);
        }
        println!(
            "    excerpt: \"{}\"",
            result.snippet.replace('\n', " ").trim()
        );
        println!("    id: {}", result.id);
        println!();
    }

    Ok(())
}

// ============ Keyword search ============

/// Turns free text into an FTS5 query: every word becomes a quoted term
/// and terms are OR-ed, so punctuation and FTS operators in user input
/// are matched literally.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let Some(fts) = fts_query(query) else {
        return Ok(Vec::new());
    };

    let rows = sqlx::query(
        r#"
        SELECT chunk_id, document_id, rank, text,
               snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet
        FROM chunks_fts
        WHERE chunks_fts MATCH ?
        ORDER BY rank
        LIMIT ?
        "#,
    )
    .bind(fts)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: -rank,
                text: row.get("text"),
                snippet: row.get("snippet"),
            }
        })
        .collect())
}

// ============ Vector search ============

async fn fetch_vector_candidates(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), query).await?;

    let rows = sqlx::query(
        r#"
        SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text,
               COALESCE(substr(c.text, 1, 240), '') AS snippet
        FROM chunk_vectors cv
        JOIN chunks c ON c.id = cv.chunk_id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut candidates: Vec<ChunkCandidate> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let vec = embedding::blob_to_vec(&blob);
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                raw_score: embedding::cosine_similarity(&query_vec, &vec) as f64,
                text: row.get("text"),
                snippet: row.get("snippet"),
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(Ordering::Equal)
    });
    candidates.truncate(candidate_k.max(0) as usize);

    Ok(candidates)
}

// ============ Score normalization ============

/// Min-max normalize scores to `[0, 1]`. A single candidate, or all equal
/// scores, normalize to 1.0.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::ingest::ingest_items;
    use crate::migrate;
    use crate::models::{ArticleParagraph, Record, Recital};
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    fn make_candidate(chunk_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: "d".to_string(),
            raw_score: score,
            text: String::new(),
            snippet: String::new(),
        }
    }

    #[test]
    fn test_normalize_empty_and_single() {
        assert!(normalize_scores(&[]).is_empty());
        let single = vec![make_candidate("c1", 5.0)];
        assert!((normalize_scores(&single)[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_scores_always_in_unit() {
        let candidates = vec![
            make_candidate("c1", -5.0),
            make_candidate("c2", 100.0),
            make_candidate("c3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "Score out of range: {}", score);
        }
    }

    #[test]
    fn test_alpha_extremes_select_one_channel() {
        assert_eq!(hybrid_score(0.8, 0.2, SearchMode::Keyword.alpha(0.6)), 0.8);
        assert_eq!(hybrid_score(0.8, 0.2, SearchMode::Semantic.alpha(0.6)), 0.2);
        let blended = hybrid_score(1.0, 0.0, SearchMode::Hybrid.alpha(0.6));
        assert!((blended - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_fts_query_quotes_every_word() {
        assert_eq!(
            fts_query("Qu'est-ce que l'article 5 ?").as_deref(),
            Some("\"Qu\" OR \"est\" OR \"ce\" OR \"que\" OR \"l\" OR \"article\" OR \"5\"")
        );
        assert_eq!(
            fts_query("données AND NOT").as_deref(),
            Some("\"données\" OR \"AND\" OR \"NOT\"")
        );
        assert_eq!(fts_query("?!  ..."), None);
    }

    #[test]
    fn test_context_mode_resolution() {
        let base = "[db]\npath = \"x.sqlite\"\n\n[chunking]\nmax_tokens = 700\n";
        let cfg = parse_config(base).unwrap();
        assert_eq!(SearchMode::for_context(&cfg).unwrap(), SearchMode::Keyword);

        let with_embeddings = format!(
            "{}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic\"\ndims = 768\n",
            base
        );
        let cfg = parse_config(&with_embeddings).unwrap();
        assert_eq!(SearchMode::for_context(&cfg).unwrap(), SearchMode::Hybrid);
    }

    async fn seeded() -> (TempDir, Config, SqlitePool) {
        let tmp = TempDir::new().unwrap();
        let toml = format!(
            "[db]\npath = \"{}\"\n\n[chunking]\nmax_tokens = 700\n",
            tmp.path().join("rgpd.sqlite").display()
        );
        let config = parse_config(&toml).unwrap();
        let pool = db::connect(&config).await.unwrap();
        migrate::apply(&pool).await.unwrap();

        let now = chrono::Utc::now();
        let recitals = vec![
            Recital {
                number: "32".to_string(),
                text: "Le consentement devrait être donné par un acte positif clair.".to_string(),
            }
            .to_source_item(None, now),
            Recital {
                number: "39".to_string(),
                text: "Tout traitement de données à caractère personnel devrait être licite."
                    .to_string(),
            }
            .to_source_item(None, now),
        ];
        ingest_items(&config, &pool, "recitals", &recitals, false, true, &NoProgress)
            .await
            .unwrap();

        let articles = vec![ArticleParagraph {
            chapter: "Chapitre II".to_string(),
            article: "Article 7 - Conditions applicables au consentement".to_string(),
            paragraph: "Le responsable du traitement est en mesure de démontrer le consentement."
                .to_string(),
            sub_paragraph: None,
            position: 0,
        }
        .to_source_item(None, now)];
        ingest_items(&config, &pool, "articles", &articles, false, true, &NoProgress)
            .await
            .unwrap();

        (tmp, config, pool)
    }

    #[tokio::test]
    async fn keyword_search_finds_matching_chunks() {
        let (_tmp, config, pool) = seeded().await;
        let hits = search_chunks(&pool, &config, "consentement ?", SearchMode::Keyword, 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.text.contains("consentement")));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn document_search_filters_by_source() {
        let (_tmp, config, pool) = seeded().await;
        let results = search_documents(
            &pool,
            &config,
            "consentement",
            SearchMode::Keyword,
            Some("articles"),
            10,
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, "articles");
        assert!(results[0].snippet.contains(">>>"));
    }

    #[tokio::test]
    async fn semantic_mode_requires_embeddings() {
        let (_tmp, config, pool) = seeded().await;
        let err = search_chunks(&pool, &config, "licite", SearchMode::Semantic, 5)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("requires embeddings"));
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let (_tmp, config, pool) = seeded().await;
        let hits = search_chunks(&pool, &config, "   ", SearchMode::Keyword, 5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
