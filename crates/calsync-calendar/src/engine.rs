//! The sync orchestrator.
//!
//! [`SyncEngine`] keeps at most one remote event per local key. Each write
//! goes through the same steps: fingerprint the event, look up the record,
//! then create, update or skip the remote call depending on what the record
//! says. All writes for one key are serialised by [`KeyedLocks`].

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{CalendarError, CalendarResult, ErrorKind, SyncError, SyncResult};
use crate::hash::compute_hash;
use crate::ids::{derive_remote_id, DEFAULT_MAX_ID_LENGTH};
use crate::locks::KeyedLocks;
use crate::record::{
    CountFilter, Page, RecordFilter, SyncCounts, SyncKey, SyncRecord, SyncStatus,
    DEFAULT_CALENDAR_ID,
};
use crate::remote::RemoteCalendar;
use crate::store::SyncStore;
use crate::types::{EventData, ListQuery, RemoteEvent};

/// How remote IDs are chosen on create.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Send a derived ID with each create when the provider allows it.
    pub explicit_ids: bool,
    pub max_id_length: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            explicit_ids: true,
            max_id_length: DEFAULT_MAX_ID_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    Unchanged,
}

/// Result of [`SyncEngine::create_or_update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub remote_event_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteAction {
    Deleted,
    /// The remote event was already gone; the record was removed.
    AlreadyDeleted,
    /// No record matched.
    NotFound,
}

pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    remote: Arc<dyn RemoteCalendar>,
    locks: KeyedLocks,
    options: EngineOptions,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn SyncStore>, remote: Arc<dyn RemoteCalendar>) -> Self {
        Self {
            store,
            remote,
            locks: KeyedLocks::new(),
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// Mirror `event` to the remote calendar under `key`.
    ///
    /// `calendar_id` picks the calendar for a new remote event; an existing
    /// one is always updated where it lives. Safe to replay: calling again with
    /// the same event makes no remote call.
    #[instrument(skip(self, key, event), fields(key = %key), level = "info")]
    pub async fn create_or_update(
        &self,
        key: &SyncKey,
        event: &EventData,
        calendar_id: Option<&str>,
        source_system: &str,
    ) -> SyncResult<SyncOutcome> {
        event.validate().map_err(SyncError::Validation)?;
        let hash = compute_hash(event);

        let _guard = self.locks.lock(key).await;
        let existing = self.store.get(key).await?;

        let mut record = match existing {
            None => {
                let calendar = calendar_id.unwrap_or(DEFAULT_CALENDAR_ID);
                let record = SyncRecord::pending(key, calendar, source_system, Utc::now());
                self.store.upsert(&record).await?;
                return self.create_fresh(record, event, hash, None).await;
            }
            Some(record) => record,
        };

        let Some(remote_id) = record.remote_event_id.clone() else {
            // An earlier create never went through.
            debug!("Record has no remote event yet, creating");
            if let Some(calendar) = calendar_id {
                record.remote_calendar_id = calendar.to_string();
            }
            record.source_system = source_system.to_string();
            return self.create_fresh(record, event, hash, None).await;
        };

        if record.content_hash.as_deref() == Some(hash.as_str()) {
            if record.sync_status != SyncStatus::Synced {
                info!(status = %record.sync_status, "Remote already matches, restoring synced status");
                let now = Utc::now();
                record.sync_status = SyncStatus::Synced;
                record.sync_error = None;
                record.updated_at = now;
                self.store.upsert(&record).await?;
            }
            debug!(remote_event_id = %remote_id, "Event unchanged");
            return Ok(SyncOutcome {
                action: SyncAction::Unchanged,
                remote_event_id: remote_id,
            });
        }

        let calendar = record.remote_calendar_id.clone();
        match self.remote.update(&remote_id, event, &calendar).await {
            Ok(remote) => {
                record.source_system = source_system.to_string();
                record.mark_synced(remote.id.clone(), hash, Utc::now());
                self.store.upsert(&record).await?;
                info!(remote_event_id = %remote.id, "Updated remote event");
                Ok(SyncOutcome {
                    action: SyncAction::Updated,
                    remote_event_id: remote.id,
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    remote_event_id = %remote_id,
                    calendar_id = %calendar,
                    "Remote event is gone, recreating"
                );
                self.store.delete(key).await?;

                let calendar = calendar_id.unwrap_or(&calendar);
                let fresh = SyncRecord::pending(key, calendar, source_system, Utc::now());
                self.store.upsert(&fresh).await?;
                self.create_fresh(fresh, event, hash, Some(&remote_id)).await
            }
            Err(e) => {
                self.record_failure(&mut record, &e).await;
                Err(e.into())
            }
        }
    }

    /// Create the remote event for a record that has none and persist the
    /// outcome. `avoid_id` is a remote ID that must not be reused.
    async fn create_fresh(
        &self,
        mut record: SyncRecord,
        event: &EventData,
        hash: String,
        avoid_id: Option<&str>,
    ) -> SyncResult<SyncOutcome> {
        let calendar = record.remote_calendar_id.clone();
        let explicit_id = self.explicit_id_for(&record.key(), avoid_id);

        let result = match explicit_id.as_deref() {
            Some(id) => match self.remote.create(event, Some(id), &calendar).await {
                Err(CalendarError::Conflict) => {
                    if self.owned_elsewhere(id, &record.key()).await? {
                        warn!(
                            remote_event_id = %id,
                            "Derived ID is held by another sync record, letting the provider assign one"
                        );
                        self.remote.create(event, None, &calendar).await
                    } else {
                        self.adopt(id, event, &calendar).await
                    }
                }
                other => other,
            },
            None => self.remote.create(event, None, &calendar).await,
        };

        match result {
            Ok(remote) => {
                record.mark_synced(remote.id.clone(), hash, Utc::now());
                self.store.upsert(&record).await?;
                info!(
                    remote_event_id = %remote.id,
                    calendar_id = %calendar,
                    provider = self.remote.name(),
                    "Created remote event"
                );
                Ok(SyncOutcome {
                    action: SyncAction::Created,
                    remote_event_id: remote.id,
                })
            }
            Err(e) => {
                self.record_failure(&mut record, &e).await;
                Err(e.into())
            }
        }
    }

    fn explicit_id_for(&self, key: &SyncKey, avoid_id: Option<&str>) -> Option<String> {
        if !self.options.explicit_ids || !self.remote.supports_explicit_ids() {
            return None;
        }
        let id = derive_remote_id(&key.id_seed(), self.options.max_id_length);
        if avoid_id == Some(id.as_str()) {
            debug!("Derived ID belongs to a deleted event, letting the provider assign one");
            return None;
        }
        Some(id)
    }

    /// Whether a record other than `key` already maps to `remote_id`.
    async fn owned_elsewhere(&self, remote_id: &str, key: &SyncKey) -> SyncResult<bool> {
        let owner = self.store.get_by_remote_id(remote_id).await?;
        Ok(owner.is_some_and(|r| r.key() != *key))
    }

    /// The derived ID is taken, most likely by an earlier attempt for this
    /// same key. Take the event over and bring its content up to date.
    async fn adopt(
        &self,
        remote_id: &str,
        event: &EventData,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent> {
        info!(remote_event_id = %remote_id, "Event ID already exists, adopting it");
        match self.remote.update(remote_id, event, calendar_id).await {
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    remote_event_id = %remote_id,
                    "Conflicting event cannot be updated, creating without an ID"
                );
                self.remote.create(event, None, calendar_id).await
            }
            other => other,
        }
    }

    /// Persist a failed attempt. A storage error here is logged and dropped so
    /// the caller still sees the remote error.
    async fn record_failure(&self, record: &mut SyncRecord, error: &CalendarError) {
        warn!(key = %record.key(), error = %error, "Remote call failed");
        record.mark_failed(&error.to_string(), Utc::now());
        if let Err(store_err) = self.store.upsert(record).await {
            warn!(
                key = %record.key(),
                error = %store_err,
                "Could not record sync failure"
            );
        }
    }

    /// Delete the remote copy of an event and forget the record.
    ///
    /// With `is_remote_id`, `event_id` is the provider's ID and only records
    /// owned by `user_id` match; `persona_id` narrows further when given.
    /// Otherwise `event_id` is the local ID and `persona_id` is part of the key.
    /// `calendar_id` overrides the calendar stored on the record.
    #[instrument(skip(self), level = "info")]
    pub async fn delete(
        &self,
        user_id: &str,
        persona_id: Option<&str>,
        event_id: &str,
        calendar_id: Option<&str>,
        is_remote_id: bool,
    ) -> SyncResult<DeleteAction> {
        let Some(found) = self.resolve(user_id, persona_id, event_id, is_remote_id).await? else {
            debug!("No sync record to delete");
            return Ok(DeleteAction::NotFound);
        };

        let key = found.key();
        let _guard = self.locks.lock(&key).await;

        // The record may have moved on while we waited for the lock.
        let Some(mut record) = self.store.get(&key).await? else {
            return Ok(DeleteAction::NotFound);
        };
        if is_remote_id && record.remote_event_id.as_deref() != Some(event_id) {
            return Ok(DeleteAction::NotFound);
        }

        let Some(remote_id) = record.remote_event_id.clone() else {
            self.store.delete(&key).await?;
            info!(key = %key, "Removed record that never reached the remote calendar");
            return Ok(DeleteAction::AlreadyDeleted);
        };

        let calendar = calendar_id
            .unwrap_or(&record.remote_calendar_id)
            .to_string();
        match self.remote.delete(&remote_id, &calendar).await {
            Ok(()) => {
                self.store.delete(&key).await?;
                info!(key = %key, remote_event_id = %remote_id, "Deleted remote event");
                Ok(DeleteAction::Deleted)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.store.delete(&key).await?;
                info!(key = %key, remote_event_id = %remote_id, "Remote event already gone");
                Ok(DeleteAction::AlreadyDeleted)
            }
            Err(e) => {
                self.record_failure(&mut record, &e).await;
                Err(e.into())
            }
        }
    }

    async fn resolve(
        &self,
        user_id: &str,
        persona_id: Option<&str>,
        event_id: &str,
        is_remote_id: bool,
    ) -> SyncResult<Option<SyncRecord>> {
        if !is_remote_id {
            let key = SyncKey::new(user_id, persona_id, event_id);
            return Ok(self.store.get(&key).await?);
        }

        let record = self.store.get_by_remote_id(event_id).await?;
        Ok(record.filter(|r| {
            let owned = r.user_id == user_id
                && persona_id.map_or(true, |p| r.persona_id.as_deref() == Some(p));
            if !owned {
                debug!(remote_event_id = %event_id, "Remote event belongs to another owner");
            }
            owned
        }))
    }

    pub async fn get_sync_state(&self, key: &SyncKey) -> SyncResult<Option<SyncRecord>> {
        Ok(self.store.get(key).await?)
    }

    pub async fn list_records(
        &self,
        filter: &RecordFilter,
        page: Page,
    ) -> SyncResult<Vec<SyncRecord>> {
        Ok(self.store.list(filter, page).await?)
    }

    pub async fn count(&self, filter: &CountFilter) -> SyncResult<SyncCounts> {
        Ok(self.store.count_by_calendar(filter).await?)
    }

    /// Events currently on the remote calendar.
    #[instrument(skip(self), level = "info")]
    pub async fn list_events(
        &self,
        calendar_id: Option<&str>,
        query: &ListQuery,
    ) -> SyncResult<Vec<RemoteEvent>> {
        let calendar = calendar_id.unwrap_or(DEFAULT_CALENDAR_ID);
        Ok(self.remote.list(calendar, query).await?)
    }
}
