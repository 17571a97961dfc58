//! Lexical, vector, and hybrid retrieval over the indexed corpus.
//!
//! Three modes share one request shape:
//! - **lexical** — FTS5 relevance over stored descriptions,
//! - **vector** — cosine distance against a query embedding or a reference
//!   asset's stored embedding,
//! - **hybrid** — both sub-queries fanned out concurrently and fused with
//!   Reciprocal Rank Fusion, which merges the two incompatible scoring
//!   scales by rank instead of by score.
//!
//! Every ranked surface is deterministic: ties break by ascending asset id
//! and pagination happens only after the full ordering is fixed.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding;

// ============ Request types ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Lexical,
    Vector,
    Hybrid,
}

impl SearchMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "lexical" => Ok(SearchMode::Lexical),
            "vector" => Ok(SearchMode::Vector),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => bail!(
                "Unknown search mode: {}. Use lexical, vector, or hybrid.",
                other
            ),
        }
    }
}

/// How the lexical query text is read. Resolved together with the
/// expansion flag into a parameterized FTS match expression; user input
/// is never spliced into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpretation {
    Natural,
    Boolean,
}

impl Interpretation {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "natural" => Ok(Interpretation::Natural),
            "boolean" => Ok(Interpretation::Boolean),
            other => bail!(
                "Unknown interpretation: {}. Use natural or boolean.",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub mode: SearchMode,
    pub interpretation: Interpretation,
    pub expansion: bool,
    pub reference_asset_id: Option<i64>,
    pub offset: i64,
    pub limit: i64,
}

/// One ranked result: `score` is relevance (desc) for lexical, distance
/// (asc) for vector, and the fused RRF score (desc) for hybrid.
#[derive(Debug, Clone)]
pub struct RankedHit {
    pub id: i64,
    pub score: f64,
}

// ============ CLI entry point ============

pub async fn run_search(config: &Config, request: SearchRequest) -> Result<()> {
    let needs_query_text = request.reference_asset_id.is_none();
    if needs_query_text && request.query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if matches!(request.mode, SearchMode::Vector | SearchMode::Hybrid)
        && request.reference_asset_id.is_none()
        && !config.embedding.is_enabled()
    {
        bail!(
            "Mode requires embeddings. Set [embedding] provider in config, \
             or pass --reference to rank against a stored asset."
        );
    }

    let pool = db::connect(config).await?;
    let hits = search_assets(config, &pool, &request).await;
    let hits = match hits {
        Ok(h) => h,
        Err(e) => {
            pool.close().await;
            return Err(e);
        }
    };

    if hits.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let row = sqlx::query(
            "SELECT file_name, full_path, visited FROM media_assets WHERE id = ?",
        )
        .bind(hit.id)
        .fetch_optional(&pool)
        .await?;

        let label = match request.mode {
            SearchMode::Vector => format!("dist {:.4}", hit.score),
            _ => format!("{:.4}", hit.score),
        };

        if let Some(row) = row {
            let file_name: String = row.get("file_name");
            let full_path: String = row.get("full_path");
            let visited: i64 = row.get("visited");
            println!(
                "{}. [{}] {}",
                request.offset + i as i64 + 1,
                label,
                file_name
            );
            println!("    path: {}", full_path);
            println!("    visited: {}", visited);
            println!("    id: {}", hit.id);
            println!();
        }
    }

    pool.close().await;
    Ok(())
}

/// Core search returning ranked ids (used by the CLI and tests).
pub async fn search_assets(
    config: &Config,
    pool: &SqlitePool,
    request: &SearchRequest,
) -> Result<Vec<RankedHit>> {
    let retrieval = &config.retrieval;
    let depth = request.offset + request.limit;

    match request.mode {
        SearchMode::Lexical => {
            let ranked = lexical_ranked(
                pool,
                &request.query,
                request.interpretation,
                request.expansion,
                depth,
            )
            .await?;
            Ok(paginate(ranked, request.offset, request.limit))
        }
        SearchMode::Vector => {
            let query_vec = resolve_query_vector(config, pool, request).await?;
            let ranked =
                vector_ranked(pool, &query_vec, request.reference_asset_id, depth).await?;
            Ok(paginate(ranked, request.offset, request.limit))
        }
        SearchMode::Hybrid => {
            // Fan out both sub-queries; neither depends on the other
            let lexical_fut = lexical_ranked(
                pool,
                &request.query,
                request.interpretation,
                request.expansion,
                retrieval.candidate_k_lexical,
            );
            let vector_fut = async {
                let query_vec = resolve_query_vector(config, pool, request).await?;
                vector_ranked(
                    pool,
                    &query_vec,
                    request.reference_asset_id,
                    retrieval.candidate_k_vector,
                )
                .await
            };

            let (lexical, vector) = tokio::join!(lexical_fut, vector_fut);
            let fused = fuse_sources(
                lexical,
                vector,
                retrieval.rrf_k_lexical,
                retrieval.rrf_k_vector,
            )?;
            Ok(paginate(fused, request.offset, request.limit))
        }
    }
}

/// Embed the query text, or load the reference asset's stored vector.
async fn resolve_query_vector(
    config: &Config,
    pool: &SqlitePool,
    request: &SearchRequest,
) -> Result<Vec<f32>> {
    if let Some(reference_id) = request.reference_asset_id {
        let blob: Option<Option<Vec<u8>>> =
            sqlx::query_scalar("SELECT embedding FROM media_assets WHERE id = ?")
                .bind(reference_id)
                .fetch_optional(pool)
                .await?;
        return match blob {
            None => bail!("Reference asset not found: {}", reference_id),
            Some(None) => bail!("Reference asset {} has no embedding", reference_id),
            Some(Some(bytes)) => Ok(embedding::blob_to_vec(&bytes)),
        };
    }

    let provider = embedding::create_provider(&config.embedding)?;
    embedding::embed_query(provider.as_ref(), &config.embedding, &request.query).await
}

// ============ Lexical retrieval ============

/// Rank assets by FTS5 relevance, best first. Relevance is the negated
/// bm25 rank, so higher is better. Ties break by ascending id in SQL.
pub async fn lexical_ranked(
    pool: &SqlitePool,
    query: &str,
    interpretation: Interpretation,
    expansion: bool,
    depth: i64,
) -> Result<Vec<RankedHit>> {
    let match_expr = match build_match_expression(query, interpretation, expansion) {
        Some(expr) => expr,
        None => return Ok(Vec::new()),
    };

    let rows = sqlx::query(
        r#"
        SELECT asset_id, rank
        FROM assets_fts
        WHERE assets_fts MATCH ?
        ORDER BY rank ASC, asset_id ASC
        LIMIT ?
        "#,
    )
    .bind(&match_expr)
    .bind(depth)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            RankedHit {
                id: row.get("asset_id"),
                score: -rank,
            }
        })
        .collect())
}

/// Build the FTS5 MATCH expression for the closed
/// `{Natural, Boolean} × {Exact, Expanded}` variant. Terms are always
/// quoted; expansion adds a prefix star. Returns `None` when the query
/// yields no usable terms.
pub fn build_match_expression(
    query: &str,
    interpretation: Interpretation,
    expansion: bool,
) -> Option<String> {
    const OPERATORS: &[&str] = &["AND", "OR", "NOT"];

    let mut parts: Vec<String> = Vec::new();
    let mut last_was_operator = true; // suppresses a leading operator

    for token in query.split_whitespace() {
        if interpretation == Interpretation::Boolean && OPERATORS.contains(&token) {
            if !last_was_operator {
                parts.push(token.to_string());
                last_was_operator = true;
            }
            continue;
        }

        let term: String = token.chars().filter(|c| *c != '"').collect();
        if term.is_empty() {
            continue;
        }

        let quoted = if expansion {
            format!("\"{}\"*", term)
        } else {
            format!("\"{}\"", term)
        };

        match interpretation {
            Interpretation::Natural => {
                if !parts.is_empty() {
                    parts.push("OR".to_string());
                }
            }
            Interpretation::Boolean => {}
        }
        parts.push(quoted);
        last_was_operator = false;
    }

    // A trailing operator would be a syntax error
    while parts
        .last()
        .map(|p| OPERATORS.contains(&p.as_str()))
        .unwrap_or(false)
    {
        parts.pop();
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

// ============ Vector retrieval ============

/// Rank vector-eligible assets by cosine distance to `query_vec`,
/// closest first. The reference asset itself is excluded in find-similar
/// mode. Scored in Rust over all stored vectors.
pub async fn vector_ranked(
    pool: &SqlitePool,
    query_vec: &[f32],
    exclude_id: Option<i64>,
    depth: i64,
) -> Result<Vec<RankedHit>> {
    let rows = sqlx::query(
        "SELECT id, embedding FROM media_assets WHERE embedding IS NOT NULL",
    )
    .fetch_all(pool)
    .await?;

    let mut hits: Vec<RankedHit> = rows
        .iter()
        .filter_map(|row| {
            let id: i64 = row.get("id");
            if exclude_id == Some(id) {
                return None;
            }
            let blob: Vec<u8> = row.get("embedding");
            let stored = embedding::blob_to_vec(&blob);
            Some(RankedHit {
                id,
                score: embedding::cosine_distance(query_vec, &stored) as f64,
            })
        })
        .collect();

    hits.sort_by(|a, b| {
        a.score
            .partial_cmp(&b.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(depth as usize);
    Ok(hits)
}

// ============ Rank fusion ============

/// Reciprocal Rank Fusion over the two ranked lists.
///
/// The item at 1-based rank `r` in a list contributes `1 / (k + r)` with
/// that list's damping constant; an item's total is the sum over the lists
/// it appears in. Rank-based fusion sidesteps normalizing text relevance
/// against geometric distance.
pub fn rrf_fuse(
    lexical: &[RankedHit],
    vector: &[RankedHit],
    k_lexical: f64,
    k_vector: f64,
) -> Vec<RankedHit> {
    let mut scores: HashMap<i64, f64> = HashMap::new();

    for (rank, hit) in lexical.iter().enumerate() {
        *scores.entry(hit.id).or_insert(0.0) += 1.0 / (k_lexical + rank as f64 + 1.0);
    }
    for (rank, hit) in vector.iter().enumerate() {
        *scores.entry(hit.id).or_insert(0.0) += 1.0 / (k_vector + rank as f64 + 1.0);
    }

    let mut fused: Vec<RankedHit> = scores
        .into_iter()
        .map(|(id, score)| RankedHit { id, score })
        .collect();

    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    fused
}

/// Combine the two sub-query outcomes. One failed source degrades to the
/// survivor's ranking with a warning; both failing is a request-level
/// error, never a silent empty result.
pub fn fuse_sources(
    lexical: Result<Vec<RankedHit>>,
    vector: Result<Vec<RankedHit>>,
    k_lexical: f64,
    k_vector: f64,
) -> Result<Vec<RankedHit>> {
    match (lexical, vector) {
        (Ok(lexical), Ok(vector)) => Ok(rrf_fuse(&lexical, &vector, k_lexical, k_vector)),
        (Ok(lexical), Err(e)) => {
            tracing::warn!(error = %e, "vector source failed; using lexical ranking only");
            Ok(rrf_fuse(&lexical, &[], k_lexical, k_vector))
        }
        (Err(e), Ok(vector)) => {
            tracing::warn!(error = %e, "lexical source failed; using vector ranking only");
            Ok(rrf_fuse(&[], &vector, k_lexical, k_vector))
        }
        (Err(lexical_err), Err(vector_err)) => {
            bail!(
                "Both retrieval sources failed — lexical: {}; vector: {}",
                lexical_err,
                vector_err
            )
        }
    }
}

fn paginate(hits: Vec<RankedHit>, offset: i64, limit: i64) -> Vec<RankedHit> {
    hits.into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[i64]) -> Vec<RankedHit> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| RankedHit {
                id: *id,
                score: 100.0 - i as f64,
            })
            .collect()
    }

    fn ids(hits: &[RankedHit]) -> Vec<i64> {
        hits.iter().map(|h| h.id).collect()
    }

    // ---- rank fusion ----

    #[test]
    fn test_rrf_worked_example() {
        // lexical ranks [5→1, 3→2], vector ranks [3→1, 7→2], k=1 each
        let fused = rrf_fuse(&hits(&[5, 3]), &hits(&[3, 7]), 1.0, 1.0);

        assert_eq!(ids(&fused), vec![3, 5, 7]);
        // id3 = 1/(1+2) + 1/(1+1) = 0.8333
        assert!((fused[0].score - 0.8333).abs() < 1e-4);
        // id5 = 1/(1+1) = 0.5
        assert!((fused[1].score - 0.5).abs() < 1e-9);
        // id7 = 1/(1+2)
        assert!((fused[2].score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_rrf_per_source_constants_are_independent() {
        // Same item at rank 1 in both lists; different k per source
        let fused = rrf_fuse(&hits(&[9]), &hits(&[9]), 0.0, 4.0);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - (1.0 / 1.0 + 1.0 / 5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_rrf_ties_break_by_ascending_id() {
        // Disjoint lists with equal k produce equal scores pairwise:
        // rank 1 in lexical ties rank 1 in vector
        let fused = rrf_fuse(&hits(&[20, 10]), &hits(&[15, 5]), 2.0, 2.0);
        assert_eq!(ids(&fused), vec![15, 20, 5, 10]);
    }

    #[test]
    fn test_rrf_empty_inputs() {
        assert!(rrf_fuse(&[], &[], 60.0, 60.0).is_empty());
        let one_sided = rrf_fuse(&hits(&[4, 2]), &[], 60.0, 60.0);
        assert_eq!(ids(&one_sided), vec![4, 2]);
    }

    // ---- degradation ----

    #[test]
    fn test_vector_failure_degrades_to_lexical_ranking() {
        let fused = fuse_sources(
            Ok(hits(&[8, 3, 5])),
            Err(anyhow::anyhow!("embedding service down")),
            60.0,
            60.0,
        )
        .unwrap();
        assert_eq!(ids(&fused), vec![8, 3, 5]);
    }

    #[test]
    fn test_lexical_failure_degrades_to_vector_ranking() {
        let fused = fuse_sources(
            Err(anyhow::anyhow!("fts corrupted")),
            Ok(hits(&[2, 9])),
            60.0,
            60.0,
        )
        .unwrap();
        assert_eq!(ids(&fused), vec![2, 9]);
    }

    #[test]
    fn test_both_sources_failing_is_an_error() {
        let err = fuse_sources(
            Err(anyhow::anyhow!("fts corrupted")),
            Err(anyhow::anyhow!("embedding service down")),
            60.0,
            60.0,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Both retrieval sources failed"));
        assert!(message.contains("fts corrupted"));
        assert!(message.contains("embedding service down"));
    }

    // ---- match expression ----

    #[test]
    fn test_natural_exact_joins_with_or() {
        let expr =
            build_match_expression("harbor sunset", Interpretation::Natural, false).unwrap();
        assert_eq!(expr, "\"harbor\" OR \"sunset\"");
    }

    #[test]
    fn test_natural_expanded_adds_prefix() {
        let expr = build_match_expression("harbor sunset", Interpretation::Natural, true).unwrap();
        assert_eq!(expr, "\"harbor\"* OR \"sunset\"*");
    }

    #[test]
    fn test_boolean_preserves_operators() {
        let expr = build_match_expression(
            "harbor AND sunset NOT night",
            Interpretation::Boolean,
            false,
        )
        .unwrap();
        assert_eq!(expr, "\"harbor\" AND \"sunset\" NOT \"night\"");
    }

    #[test]
    fn test_boolean_expanded() {
        let expr =
            build_match_expression("harbor OR pier", Interpretation::Boolean, true).unwrap();
        assert_eq!(expr, "\"harbor\"* OR \"pier\"*");
    }

    #[test]
    fn test_boolean_drops_dangling_operators() {
        let expr =
            build_match_expression("NOT harbor AND", Interpretation::Boolean, false).unwrap();
        assert_eq!(expr, "\"harbor\"");
    }

    #[test]
    fn test_natural_treats_operator_words_as_terms() {
        let expr = build_match_expression("black AND white", Interpretation::Natural, false)
            .unwrap();
        assert_eq!(expr, "\"black\" OR \"AND\" OR \"white\"");
    }

    #[test]
    fn test_embedded_quotes_are_stripped() {
        let expr =
            build_match_expression("\"harbor\" sunset", Interpretation::Natural, false).unwrap();
        assert_eq!(expr, "\"harbor\" OR \"sunset\"");
    }

    #[test]
    fn test_no_usable_terms_yields_none() {
        assert!(build_match_expression("   ", Interpretation::Natural, false).is_none());
        assert!(build_match_expression("\"\" \"\"", Interpretation::Boolean, false).is_none());
        assert!(build_match_expression("AND OR", Interpretation::Boolean, false).is_none());
    }

    // ---- pagination ----

    #[test]
    fn test_paginate_offset_and_limit() {
        let page = paginate(hits(&[1, 2, 3, 4, 5]), 1, 2);
        assert_eq!(ids(&page), vec![2, 3]);

        let beyond = paginate(hits(&[1, 2]), 5, 3);
        assert!(beyond.is_empty());
    }

    // ---- store-backed ----

    async fn seed_asset(
        pool: &SqlitePool,
        path: &str,
        description: &str,
        vector: Option<Vec<f32>>,
    ) -> i64 {
        crate::ingest::upsert_asset(
            pool,
            &crate::models::AssetRecord {
                image_name: path.rsplit('/').next().unwrap().to_string(),
                full_path: path.to_string(),
                file_format: "jpg".to_string(),
                file_size_kb: 10,
                created_at: chrono::Utc::now(),
                description: description.to_string(),
                content_digest: None,
                embedding: vector,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_lexical_ranking_and_determinism() {
        let pool = crate::db::connect_memory().await.unwrap();
        let a = seed_asset(
            &pool,
            "/p/a.jpg",
            "[START] A harbor at dawn with fishing boats in the harbor.",
            None,
        )
        .await;
        let _b = seed_asset(&pool, "/p/b.jpg", "[START] A forest trail in fog.", None).await;
        let c = seed_asset(&pool, "/p/c.jpg", "[START] A harbor crane.", None).await;

        let first = lexical_ranked(&pool, "harbor", Interpretation::Natural, false, 10)
            .await
            .unwrap();
        let second = lexical_ranked(&pool, "harbor", Interpretation::Natural, false, 10)
            .await
            .unwrap();

        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.len(), 2);
        assert!(ids(&first).contains(&a));
        assert!(ids(&first).contains(&c));
        // Relevance is reported descending
        assert!(first[0].score >= first[1].score);
    }

    #[tokio::test]
    async fn test_vector_requires_embedding_presence() {
        let pool = crate::db::connect_memory().await.unwrap();
        let with_vec = seed_asset(
            &pool,
            "/p/a.jpg",
            "[START] d",
            Some(vec![1.0, 0.0]),
        )
        .await;
        let _without = seed_asset(&pool, "/p/b.jpg", "[START] d", None).await;

        let ranked = vector_ranked(&pool, &[1.0, 0.0], None, 10).await.unwrap();
        assert_eq!(ids(&ranked), vec![with_vec]);
        assert!(ranked[0].score.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_reference_mode_excludes_the_reference() {
        let pool = crate::db::connect_memory().await.unwrap();
        let reference = seed_asset(&pool, "/p/a.jpg", "[START] d", Some(vec![1.0, 0.0])).await;
        let near = seed_asset(&pool, "/p/b.jpg", "[START] d", Some(vec![0.9, 0.1])).await;
        let far = seed_asset(&pool, "/p/c.jpg", "[START] d", Some(vec![0.0, 1.0])).await;

        let ranked = vector_ranked(&pool, &[1.0, 0.0], Some(reference), 10)
            .await
            .unwrap();
        assert_eq!(ids(&ranked), vec![near, far]);
    }
}
