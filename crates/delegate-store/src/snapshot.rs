//! Versioned on-disk envelope for the registry.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::models::{RecordViolation, TaskInvocation, TaskRecord};

/// The only schema version this build reads or writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Whole-registry snapshot as written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PersistedSnapshot {
    pub schema_version: u32,
    pub saved_at_epoch_ms: i64,
    pub entries: Vec<PersistedEntry>,
}

/// One task: the validated record plus the fields that live outside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    #[serde(flatten)]
    pub record: TaskRecord,
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default)]
    pub invocation: TaskInvocation,
    #[serde(default)]
    pub follow_up_prompts: Vec<String>,
}

/// Why a snapshot could not be accepted.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("unsupported schema version {found:?} (expected {SCHEMA_VERSION})")]
    SchemaVersion { found: Option<u64> },

    #[error("invalid record: {0}")]
    InvalidRecord(#[from] RecordViolation),

    #[error("duplicate task id {0:?}")]
    DuplicateId(String),
}

impl PersistedSnapshot {
    pub fn new(saved_at_epoch_ms: i64, entries: Vec<PersistedEntry>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            saved_at_epoch_ms,
            entries,
        }
    }

    /// Parse and validate a snapshot.
    ///
    /// The schema version is checked before the entry shapes so a file from a
    /// newer build reports the version mismatch rather than a field error.
    pub fn from_json(text: &str) -> Result<Self, SnapshotError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(SnapshotError::Malformed)?;
        let version = value.get("schemaVersion").and_then(|v| v.as_u64());
        if version != Some(u64::from(SCHEMA_VERSION)) {
            return Err(SnapshotError::SchemaVersion { found: version });
        }

        let snapshot: Self = serde_json::from_value(value).map_err(SnapshotError::Malformed)?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Every record must validate and ids must be unique.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            entry.record.validate()?;
            if !seen.insert(entry.record.id.as_str()) {
                return Err(SnapshotError::DuplicateId(entry.record.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskState;

    fn entry(id: &str) -> PersistedEntry {
        let mut record = TaskRecord::queued(id, "finder", "d", "p", 10);
        record.state = TaskState::Succeeded;
        record.ended_at_epoch_ms = Some(20);
        PersistedEntry {
            record,
            summary: "done".to_string(),
            output: Some("out".to_string()),
            backend: "simulate".to_string(),
            provider: None,
            model: None,
            runtime: None,
            route: None,
            invocation: TaskInvocation::default(),
            follow_up_prompts: vec!["again".to_string()],
        }
    }

    #[test]
    fn entry_flattens_record_fields() {
        let json = serde_json::to_value(entry("t1")).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["summary"], "done");
        assert_eq!(json["followUpPrompts"][0], "again");
    }

    #[test]
    fn parse_valid_snapshot() {
        let snapshot = PersistedSnapshot::new(30, vec![entry("t1"), entry("t2")]);
        let text = snapshot.to_json().unwrap();
        let parsed = PersistedSnapshot::from_json(&text).unwrap();
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn wrong_schema_version_is_rejected() {
        let text = r#"{"schemaVersion": 2, "savedAtEpochMs": 1, "entries": []}"#;
        let err = PersistedSnapshot::from_json(text).unwrap_err();
        assert!(matches!(err, SnapshotError::SchemaVersion { found: Some(2) }));
    }

    #[test]
    fn missing_schema_version_is_rejected() {
        let err = PersistedSnapshot::from_json(r#"{"entries": []}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::SchemaVersion { found: None }));
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let text = r#"{"schemaVersion": 1, "savedAtEpochMs": 1, "entries": [], "extra": true}"#;
        let err = PersistedSnapshot::from_json(text).unwrap_err();
        assert!(matches!(err, SnapshotError::Malformed(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let snapshot = PersistedSnapshot::new(30, vec![entry("t1"), entry("t1")]);
        let text = snapshot.to_json().unwrap();
        let err = PersistedSnapshot::from_json(&text).unwrap_err();
        assert!(matches!(err, SnapshotError::DuplicateId(id) if id == "t1"));
    }

    #[test]
    fn invalid_record_is_rejected() {
        let mut bad = entry("t1");
        bad.record.active_tool_calls = 1;
        bad.record.total_tool_calls = 1;
        let text = PersistedSnapshot::new(30, vec![bad]).to_json().unwrap();
        let err = PersistedSnapshot::from_json(&text).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidRecord(_)));
    }
}
