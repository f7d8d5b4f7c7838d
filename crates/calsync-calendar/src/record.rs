//! Sync records: the persisted mapping from a local event to its remote copy.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Calendar used when the caller does not name one.
pub const DEFAULT_CALENDAR_ID: &str = "primary";

/// Composite natural key of a sync record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncKey {
    pub user_id: String,
    pub persona_id: Option<String>,
    pub local_event_id: String,
}

impl SyncKey {
    pub fn new(
        user_id: impl Into<String>,
        persona_id: Option<&str>,
        local_event_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            persona_id: persona_id.map(str::to_string),
            local_event_id: local_event_id.into(),
        }
    }

    /// Input for remote ID derivation. Scoped by user and persona so that two
    /// owners reusing a local ID in one calendar never collide.
    pub fn id_seed(&self) -> String {
        // U+001F (unit separator) does not occur in sane identifiers.
        format!(
            "{}\u{1f}{}\u{1f}{}",
            self.user_id,
            self.persona_id.as_deref().unwrap_or(""),
            self.local_event_id
        )
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.user_id,
            self.persona_id.as_deref().unwrap_or("-"),
            self.local_event_id
        )
    }
}

/// Where a record stands relative to the remote calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
    Skipped,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "synced" => Ok(SyncStatus::Synced),
            "failed" => Ok(SyncStatus::Failed),
            "skipped" => Ok(SyncStatus::Skipped),
            other => Err(format!("unknown sync status '{}'", other)),
        }
    }
}

/// One local event and what is known about its remote copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub user_id: String,
    pub persona_id: Option<String>,
    pub local_event_id: String,
    pub remote_event_id: Option<String>,
    pub remote_calendar_id: String,
    /// Fingerprint of the event data last confirmed on the remote side.
    pub content_hash: Option<String>,
    pub source_system: String,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_sync_attempt: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl SyncRecord {
    /// A fresh `pending` record with nothing on the remote side yet.
    pub fn pending(
        key: &SyncKey,
        calendar_id: &str,
        source_system: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: key.user_id.clone(),
            persona_id: key.persona_id.clone(),
            local_event_id: key.local_event_id.clone(),
            remote_event_id: None,
            remote_calendar_id: calendar_id.to_string(),
            content_hash: None,
            source_system: source_system.to_string(),
            sync_status: SyncStatus::Pending,
            sync_error: None,
            created_at: now,
            updated_at: now,
            last_sync_attempt: now,
            last_synced_at: None,
        }
    }

    pub fn key(&self) -> SyncKey {
        SyncKey {
            user_id: self.user_id.clone(),
            persona_id: self.persona_id.clone(),
            local_event_id: self.local_event_id.clone(),
        }
    }

    /// Record a confirmed remote write.
    pub fn mark_synced(&mut self, remote_event_id: String, content_hash: String, now: DateTime<Utc>) {
        self.remote_event_id = Some(remote_event_id);
        self.content_hash = Some(content_hash);
        self.sync_status = SyncStatus::Synced;
        self.sync_error = None;
        self.updated_at = now;
        self.last_sync_attempt = now;
        self.last_synced_at = Some(now);
    }

    /// Record a failed attempt. The fingerprint is left alone: it still
    /// describes what the remote side last accepted.
    pub fn mark_failed(&mut self, error: &str, now: DateTime<Utc>) {
        self.sync_status = SyncStatus::Failed;
        self.sync_error = Some(error.to_string());
        self.updated_at = now;
        self.last_sync_attempt = now;
    }
}

/// Filter for listing records of one user.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub user_id: String,
    /// `None` matches every persona.
    pub persona_id: Option<String>,
    pub status: Option<SyncStatus>,
}

impl RecordFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }
}

/// Filter for [`SyncCounts`].
#[derive(Debug, Clone, Default)]
pub struct CountFilter {
    pub user_id: String,
    pub persona_id: Option<String>,
    pub calendar_id: Option<String>,
    pub status: Option<SyncStatus>,
}

/// Record totals, overall and per remote calendar.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub total: u64,
    pub by_calendar: BTreeMap<String, u64>,
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Page {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}
