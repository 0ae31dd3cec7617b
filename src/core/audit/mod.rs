//! Audit history for cartridge sources and manifests
//!
//! Provides the append-only records written by every integrity check:
//! - Per-source modification entries (observed vs expected digest/size)
//! - Manifest-level events for each hydrate/dehydrate/verify run
//! - Second-precision UTC timestamps (RFC 3339)

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Modification status of a source, as recorded in the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationStatus {
    /// Observed content matches the recorded baseline
    #[default]
    Clean,
    /// Observed content differs from the recorded baseline
    Drifted,
}

/// Outcome stored on a single history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Clean,
    Drifted,
    /// Content could not be obtained, or a curation rule was violated
    Failed,
}

impl From<ModificationStatus> for EntryStatus {
    fn from(status: ModificationStatus) -> Self {
        match status {
            ModificationStatus::Clean => EntryStatus::Clean,
            ModificationStatus::Drifted => EntryStatus::Drifted,
        }
    }
}

/// Single modification-history entry for a source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationEntry {
    /// When the check ran (RFC 3339, UTC)
    pub checked_at: String,
    /// Digest observed during the check
    pub observed_digest: Option<String>,
    /// Size observed during the check
    pub observed_size: Option<u64>,
    /// Recorded `hash` at the time of the check
    pub expected_hash: Option<String>,
    /// Recorded `size_bytes` at the time of the check
    #[serde(default)]
    pub expected_size: Option<u64>,
    /// Pre-declared `expected_digest`, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_digest: Option<String>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ModificationEntry {
    /// Create an entry stamped with the current time
    pub fn now(status: EntryStatus) -> Self {
        ModificationEntry {
            checked_at: timestamp(Utc::now()),
            observed_digest: None,
            observed_size: None,
            expected_hash: None,
            expected_size: None,
            expected_digest: None,
            status,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Operation recorded in the manifest-level history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Hydrate,
    Dehydrate,
    Verify,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::Hydrate => "hydrate",
            Action::Dehydrate => "dehydrate",
            Action::Verify => "verify",
        };
        f.write_str(name)
    }
}

/// One manifest-level history event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub at: String,
    pub action: Action,
    /// Tool identity that performed the action
    pub tool: String,
    /// Ids of sources that failed during the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_sources: Vec<String>,
}

impl HistoryEvent {
    pub fn new(action: Action, failed_sources: Vec<String>) -> Self {
        HistoryEvent {
            at: timestamp(Utc::now()),
            action,
            tool: crate::TOOL_ID.to_string(),
            failed_sources,
        }
    }
}

/// RFC 3339 UTC timestamp with a trailing `Z`
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
