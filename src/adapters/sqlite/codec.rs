//! Shared column codecs for the sqlite repositories.
//!
//! Uuids and timestamps are stored as TEXT (RFC 3339); string lists and
//! payloads as JSON text.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::{CoreError, CoreResult};

pub(crate) fn parse_uuid(s: &str) -> CoreResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| CoreError::Storage(format!("invalid uuid {s:?}: {e}")))
}

pub(crate) fn parse_opt_uuid(s: Option<&str>) -> CoreResult<Option<Uuid>> {
    s.map(parse_uuid).transpose()
}

pub(crate) fn parse_datetime(s: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CoreError::Storage(format!("invalid timestamp {s:?}: {e}")))
}

pub(crate) fn parse_opt_datetime(s: Option<&str>) -> CoreResult<Option<DateTime<Utc>>> {
    s.map(parse_datetime).transpose()
}

pub(crate) fn string_list_json(v: &[String]) -> CoreResult<String> {
    Ok(serde_json::to_string(v)?)
}

pub(crate) fn parse_string_list(s: &str) -> CoreResult<Vec<String>> {
    Ok(serde_json::from_str(s)?)
}

/// Whether a sqlx error is a SQLite uniqueness violation. Claim races and
/// short-id collisions are told apart from other storage failures this way.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trip() {
        let now = Utc::now();
        let parsed = parse_datetime(&now.to_rfc3339()).unwrap();
        assert_eq!(parsed, now);
    }

    #[test]
    fn string_list_round_trip() {
        let v = vec!["a".to_string(), "b".to_string()];
        let json = string_list_json(&v).unwrap();
        assert_eq!(parse_string_list(&json).unwrap(), v);
        assert_eq!(parse_string_list("[]").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn bad_uuid_is_a_storage_error() {
        let err = parse_uuid("not-a-uuid").unwrap_err();
        assert_eq!(err.kind(), "STORAGE");
    }
}
