//! Core data models used throughout mediatrace.
//!
//! These types represent the assets, ledger records, access events, and
//! collections that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One line of the output ledger, as produced by the job runner.
///
/// Field names follow the ledger's on-disk camelCase contract so the file
/// stays interchangeable with earlier tooling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRecord {
    pub image_name: String,
    pub full_path: String,
    pub file_format: String,
    #[serde(rename = "fileSizeKB")]
    pub file_size_kb: i64,
    pub created_at: DateTime<Utc>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// Indexed media file as stored in SQLite.
#[derive(Debug, Clone)]
pub struct MediaAsset {
    pub id: i64,
    pub file_name: String,
    pub full_path: String,
    pub file_format: String,
    pub file_size_kb: i64,
    pub content_digest: Option<String>,
    pub meta: Option<String>,
    pub description: String,
    pub created_at: i64,
    pub indexed_at: i64,
    pub updated_at: Option<i64>,
    pub revision: i64,
    pub visited: i64,
}

/// Kind of access recorded against an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    View,
    Export,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::View => "view",
            AccessKind::Export => "export",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(AccessKind::View),
            "export" => Some(AccessKind::Export),
            _ => None,
        }
    }
}

/// Immutable access-history entry. Appended once, never updated.
#[derive(Debug, Clone)]
pub struct AccessEvent {
    pub id: i64,
    pub asset_id: i64,
    pub kind: AccessKind,
    pub created_at: i64,
}

/// A user-curated set of assets.
///
/// `members` is a real set in memory; it is serialized to a JSON array
/// only at the persistence edge (see `collections::row_to_collection`).
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub members: BTreeSet<i64>,
    pub cover_asset_id: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub revision: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_camel_case() {
        let record = AssetRecord {
            image_name: "sunset.jpg".to_string(),
            full_path: "/photos/sunset.jpg".to_string(),
            file_format: "jpg".to_string(),
            file_size_kb: 420,
            created_at: "2025-06-01T12:00:00Z".parse().unwrap(),
            description: "[START] A sunset.".to_string(),
            content_digest: None,
            embedding: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"imageName\""));
        assert!(json.contains("\"fileSizeKB\":420"));
        assert!(json.contains("\"fullPath\""));
        // Absent optionals stay off the wire
        assert!(!json.contains("contentDigest"));
        assert!(!json.contains("embedding"));
    }

    #[test]
    fn test_record_roundtrip_with_digest() {
        let json = r#"{"imageName":"a.png","fullPath":"/x/a.png","fileFormat":"png","fileSizeKB":12,"createdAt":"2025-01-01T00:00:00Z","description":"[START] d","contentDigest":"abc123","embedding":[0.5,-0.25]}"#;
        let record: AssetRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.content_digest.as_deref(), Some("abc123"));
        assert_eq!(record.embedding.as_deref(), Some(&[0.5, -0.25][..]));
    }

    #[test]
    fn test_access_kind_roundtrip() {
        assert_eq!(AccessKind::parse("view"), Some(AccessKind::View));
        assert_eq!(AccessKind::parse("export"), Some(AccessKind::Export));
        assert_eq!(AccessKind::parse("open"), None);
        assert_eq!(AccessKind::Export.as_str(), "export");
    }
}
