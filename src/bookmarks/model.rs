use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::realtime::{ChangeType, PostgresChange};

/// A saved link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(deserialize_with = "id_from_value")]
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(deserialize_with = "id_from_value")]
    pub user_id: String,
    #[serde(deserialize_with = "timestamp_from_str")]
    pub created_at: DateTime<Utc>,
}

/// Insert payload; the store assigns `id` and `created_at`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: String,
}

/// A change to the bookmarks table observed on the live feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookmarkChange {
    Inserted(Bookmark),
    /// `user_id` is only present when the table replicates full old rows
    Deleted { id: String, user_id: Option<String> },
}

impl BookmarkChange {
    /// Translate a row change. Updates and undecodable rows yield `None`.
    pub fn from_postgres(change: &PostgresChange) -> Option<Self> {
        match change.change_type {
            ChangeType::Insert => match serde_json::from_value::<Bookmark>(change.record.clone()) {
                Ok(bookmark) => Some(BookmarkChange::Inserted(bookmark)),
                Err(e) => {
                    log::warn!("Ignoring undecodable bookmark insert: {}", e);
                    None
                }
            },
            ChangeType::Delete => {
                let id = value_to_id(change.old_record.get("id")?)?;
                let user_id = change.old_record.get("user_id").and_then(value_to_id);
                Some(BookmarkChange::Deleted { id, user_id })
            }
            ChangeType::Update => None,
        }
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Ids come back as strings (uuid) or numbers (bigint) depending on the schema
fn id_from_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_to_id(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {}", value)))
}

/// PostgREST sends offsets, realtime records may not; offset-less values are UTC
fn timestamp_from_str<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_rest_row_with_offset() {
        let bookmark: Bookmark = serde_json::from_value(json!({
            "id": "6f1c",
            "title": "Docs",
            "url": "https://docs.rs",
            "user_id": "u1",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }))
        .unwrap();
        assert_eq!(bookmark.created_at.to_rfc3339(), "2024-05-01T10:00:00.123456+00:00");
    }

    #[test]
    fn decodes_numeric_id_and_naive_timestamp() {
        let bookmark: Bookmark = serde_json::from_value(json!({
            "id": 42,
            "title": "Docs",
            "url": "https://docs.rs",
            "user_id": "u1",
            "created_at": "2024-05-01T10:00:00.5"
        }))
        .unwrap();
        assert_eq!(bookmark.id, "42");
        assert_eq!(bookmark.created_at, parse_timestamp("2024-05-01T10:00:00.5Z").unwrap());
    }

    #[test]
    fn postgres_timestamp_with_short_offset() {
        assert_eq!(
            parse_timestamp("2024-05-01 12:00:00+02"),
            parse_timestamp("2024-05-01T10:00:00Z")
        );
    }

    #[test]
    fn update_changes_are_ignored() {
        let change = PostgresChange {
            schema: "public".into(),
            table: "bookmarks".into(),
            commit_timestamp: None,
            change_type: ChangeType::Update,
            record: json!({}),
            old_record: json!({}),
        };
        assert!(BookmarkChange::from_postgres(&change).is_none());
    }

    #[test]
    fn delete_change_reads_old_record() {
        let change = PostgresChange {
            schema: "public".into(),
            table: "bookmarks".into(),
            commit_timestamp: None,
            change_type: ChangeType::Delete,
            record: Value::Null,
            old_record: json!({ "id": 7 }),
        };
        assert_eq!(
            BookmarkChange::from_postgres(&change),
            Some(BookmarkChange::Deleted { id: "7".into(), user_id: None })
        );
    }
}
