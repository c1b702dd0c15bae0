//! # Remote documents
//! The stored form of a dataset, and the single metadata document that records whether the store has been seeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dataset as it is stored remotely.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteDocument {
    pub data: serde_json::Value,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl RemoteDocument {
    pub fn stamp(&self) -> VersionStamp {
        VersionStamp {
            version: self.version,
            updated_at: self.updated_at,
        }
    }

    /// The document that a versioned write produces on top of `previous`.
    pub(crate) fn next(
        previous: Option<&RemoteDocument>,
        data: serde_json::Value,
        updated_by: &str,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let current_version = previous.map(|doc| doc.version).unwrap_or(0);
        RemoteDocument {
            data,
            version: current_version + 1,
            updated_at,
            updated_by: updated_by.to_string(),
        }
    }
}

/// The `(version, updatedAt)` pair identifying one revision of a dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStamp {
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// A change notification delivered to subscribers.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteChange<K> {
    pub key: K,
    pub document: RemoteDocument,
}

/// The global record of whether the store has ever been initialized from bundled defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDocument {
    #[serde(default)]
    pub seeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

impl MetaDocument {
    /// Merge a patch in place. Fields the patch leaves unset keep their stored value.
    pub fn merge(&mut self, patch: MetaPatch) {
        let MetaPatch {
            seeded,
            seeded_at,
            seeded_by,
            last_updated,
            claimed_at,
            claimed_by,
        } = patch;

        if let Some(seeded) = seeded {
            self.seeded = seeded;
        }
        if seeded_at.is_some() {
            self.seeded_at = seeded_at;
        }
        if seeded_by.is_some() {
            self.seeded_by = seeded_by;
        }
        if last_updated.is_some() {
            self.last_updated = last_updated;
        }
        if claimed_at.is_some() {
            self.claimed_at = claimed_at;
        }
        if claimed_by.is_some() {
            self.claimed_by = claimed_by;
        }
    }

    /// The document a seeding claim creates.
    pub(crate) fn claimed(by: &str, at: DateTime<Utc>) -> Self {
        MetaDocument {
            seeded: false,
            claimed_at: Some(at),
            claimed_by: Some(by.to_string()),
            last_updated: Some(at),
            ..Default::default()
        }
    }
}

/// A partial update of the [`MetaDocument`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
}

impl MetaPatch {
    pub fn seeded(by: &str, at: DateTime<Utc>) -> Self {
        MetaPatch {
            seeded: Some(true),
            seeded_at: Some(at),
            seeded_by: Some(by.to_string()),
            last_updated: Some(at),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_remote_document_wire_shape() {
        let doc = RemoteDocument {
            data: serde_json::json!([{"id": "g1", "name": "Laura"}]),
            version: 4,
            updated_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap(),
            updated_by: "host@example.com".to_string(),
        };

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["version"], 4);
        assert_eq!(json["updatedBy"], "host@example.com");
        assert_eq!(json["updatedAt"], "2026-05-01T12:00:00Z");
        assert_eq!(json["data"][0]["name"], "Laura");
    }

    #[test]
    fn test_next_increments_from_zero_when_absent() {
        let now = Utc::now();
        let first = RemoteDocument::next(None, serde_json::json!([]), "a", now);
        assert_eq!(first.version, 1);

        let second = RemoteDocument::next(Some(&first), serde_json::json!([1]), "b", now);
        assert_eq!(second.version, 2);
        assert_eq!(second.updated_by, "b");
    }

    #[test]
    fn test_meta_merge_preserves_unset_fields() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut meta = MetaDocument::claimed("tab-a", at);

        let later = Utc.with_ymd_and_hms(2026, 1, 1, 0, 5, 0).unwrap();
        meta.merge(MetaPatch::seeded("tab-a", later));

        assert!(meta.seeded);
        assert_eq!(meta.seeded_at, Some(later));
        assert_eq!(meta.claimed_at, Some(at));
        assert_eq!(meta.claimed_by.as_deref(), Some("tab-a"));

        meta.merge(MetaPatch {
            last_updated: Some(at),
            ..Default::default()
        });
        assert!(meta.seeded);
        assert_eq!(meta.seeded_by.as_deref(), Some("tab-a"));
        assert_eq!(meta.last_updated, Some(at));
    }

    #[test]
    fn test_meta_document_tolerates_missing_fields() {
        let meta: MetaDocument = serde_json::from_str(r#"{"seeded": true}"#).unwrap();
        assert!(meta.seeded);
        assert_eq!(meta.seeded_at, None);

        let empty: MetaDocument = serde_json::from_str("{}").unwrap();
        assert!(!empty.seeded);
    }
}
