//! Curated collections of assets.
//!
//! Membership is a real set in memory. Add and remove are set union and
//! set difference with the requested ids: re-adding a member or removing
//! a non-member changes nothing, but every successful mutation still
//! counts as a touch (revision and `updated_at` move). The JSON array
//! representation exists only at the row boundary.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;

use crate::config::Config;
use crate::db;
use crate::models::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Add,
    Remove,
}

impl MutationAction {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(MutationAction::Add),
            "remove" => Ok(MutationAction::Remove),
            other => bail!("Unknown action: {}. Use add or remove.", other),
        }
    }
}

pub async fn create_collection(
    pool: &SqlitePool,
    title: &str,
    description: Option<&str>,
    cover_asset_id: Option<i64>,
) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO collections (title, description, members, cover_asset_id, created_at, updated_at)
        VALUES (?, ?, '[]', ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(title)
    .bind(description)
    .bind(cover_asset_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn get_collection(pool: &SqlitePool, id: i64) -> Result<Collection> {
    let row = sqlx::query(
        "SELECT id, title, description, members, cover_asset_id, created_at, updated_at, revision \
         FROM collections WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => row_to_collection(&row),
        None => bail!("collection not found: {}", id),
    }
}

pub async fn list_collections(pool: &SqlitePool) -> Result<Vec<Collection>> {
    let rows = sqlx::query(
        "SELECT id, title, description, members, cover_asset_id, created_at, updated_at, revision \
         FROM collections ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_collection).collect()
}

/// Apply a membership mutation and return the updated collection.
///
/// Union or difference with `asset_ids`; duplicates in the request
/// collapse into the set. The whole mutation runs in one transaction.
pub async fn mutate_members(
    pool: &SqlitePool,
    collection_id: i64,
    action: MutationAction,
    asset_ids: &[i64],
) -> Result<Collection> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    let row = sqlx::query("SELECT members FROM collections WHERE id = ?")
        .bind(collection_id)
        .fetch_optional(&mut *tx)
        .await?;
    let members_json: String = match row {
        Some(row) => row.get("members"),
        None => bail!("collection not found: {}", collection_id),
    };

    let mut members = members_from_json(&members_json)?;
    match action {
        MutationAction::Add => {
            members.extend(asset_ids.iter().copied());
        }
        MutationAction::Remove => {
            for id in asset_ids {
                members.remove(id);
            }
        }
    }

    sqlx::query(
        "UPDATE collections SET members = ?, updated_at = ?, revision = revision + 1 WHERE id = ?",
    )
    .bind(members_to_json(&members)?)
    .bind(now)
    .bind(collection_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    get_collection(pool, collection_id).await
}

pub async fn set_cover(pool: &SqlitePool, collection_id: i64, asset_id: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let result = sqlx::query(
        "UPDATE collections SET cover_asset_id = ?, updated_at = ?, revision = revision + 1 \
         WHERE id = ?",
    )
    .bind(asset_id)
    .bind(now)
    .bind(collection_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        bail!("collection not found: {}", collection_id);
    }
    Ok(())
}

// ============ Persistence edge ============

fn row_to_collection(row: &sqlx::sqlite::SqliteRow) -> Result<Collection> {
    let members_json: String = row.get("members");
    Ok(Collection {
        id: row.get("id"),
        title: row.get("title"),
        description: row.get("description"),
        members: members_from_json(&members_json)?,
        cover_asset_id: row.get("cover_asset_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        revision: row.get("revision"),
    })
}

fn members_from_json(json: &str) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = serde_json::from_str(json)?;
    Ok(ids.into_iter().collect())
}

fn members_to_json(members: &BTreeSet<i64>) -> Result<String> {
    Ok(serde_json::to_string(&members.iter().collect::<Vec<_>>())?)
}

// ============ CLI entry points ============

pub async fn run_create(
    config: &Config,
    title: &str,
    description: Option<&str>,
    cover: Option<i64>,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = create_collection(&pool, title, description, cover).await;
    pool.close().await;
    let id = result?;
    println!("created collection {} ({})", title, id);
    Ok(())
}

pub async fn run_mutate(
    config: &Config,
    collection_id: i64,
    action: MutationAction,
    asset_ids: &[i64],
) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = mutate_members(&pool, collection_id, action, asset_ids).await;
    pool.close().await;
    let collection = result?;

    println!("collection {} ({})", collection.title, collection.id);
    println!("  members: {}", collection.members.len());
    println!("  revision: {}", collection.revision);
    Ok(())
}

pub async fn run_show(config: &Config, collection_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = get_collection(&pool, collection_id).await;
    pool.close().await;
    let collection = result?;

    println!("--- Collection {} ---", collection.id);
    println!("title:       {}", collection.title);
    if let Some(ref description) = collection.description {
        println!("description: {}", description);
    }
    if let Some(cover) = collection.cover_asset_id {
        println!("cover:       {}", cover);
    }
    println!("revision:    {}", collection.revision);
    println!(
        "members:     {}",
        collection
            .members
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

pub async fn run_list(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = list_collections(&pool).await;
    pool.close().await;
    let collections = result?;

    if collections.is_empty() {
        println!("No collections.");
        return Ok(());
    }
    for collection in &collections {
        println!(
            "{}  {}  ({} members, rev {})",
            collection.id,
            collection.title,
            collection.members.len(),
            collection.revision
        );
    }
    Ok(())
}

pub async fn run_cover(config: &Config, collection_id: i64, asset_id: i64) -> Result<()> {
    let pool = db::connect(config).await?;
    let result = set_cover(&pool, collection_id, asset_id).await;
    pool.close().await;
    result?;
    println!("collection {} cover set to {}", collection_id, asset_id);
    Ok(())
}
