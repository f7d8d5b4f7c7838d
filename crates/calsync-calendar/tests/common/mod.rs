//! In-memory calendar provider for orchestrator tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use calsync_calendar::error::{CalendarError, CalendarResult};
use calsync_calendar::types::{EventStatus, ListQuery, RemoteEvent};
use calsync_calendar::{EventData, RemoteCalendar, SqliteSyncStore, SyncEngine};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create {
        explicit_id: Option<String>,
        calendar_id: String,
    },
    Update {
        id: String,
        calendar_id: String,
    },
    Delete {
        id: String,
        calendar_id: String,
    },
    List {
        calendar_id: String,
    },
}

#[derive(Default)]
struct State {
    events: HashMap<String, (String, EventData)>,
    /// IDs of deleted events. Like Google, they cannot be created again.
    reserved: HashSet<String>,
    calls: Vec<Call>,
    failures: VecDeque<CalendarError>,
    next_id: u32,
}

/// Records every call and behaves like a provider that honours explicit IDs
/// and rejects duplicates.
pub struct FakeCalendar {
    state: Mutex<State>,
    explicit_ids: bool,
    create_delay: Option<Duration>,
}

impl FakeCalendar {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            explicit_ids: true,
            create_delay: None,
        }
    }

    /// A provider that always assigns its own IDs.
    pub fn without_explicit_ids() -> Self {
        Self {
            explicit_ids: false,
            ..Self::new()
        }
    }

    /// Slow creates down so concurrent callers overlap.
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    /// The next adapter call fails with `error`.
    pub fn fail_next(&self, error: CalendarError) {
        self.state.lock().failures.push_back(error);
    }

    /// Put an event on the calendar without going through the engine.
    pub fn seed(&self, id: &str, calendar_id: &str, event: EventData) {
        self.state
            .lock()
            .events
            .insert(id.to_string(), (calendar_id.to_string(), event));
    }

    /// Delete an event behind the engine's back.
    pub fn remove_out_of_band(&self, id: &str) {
        let mut state = self.state.lock();
        state.events.remove(id);
        state.reserved.insert(id.to_string());
    }

    pub fn event(&self, id: &str) -> Option<EventData> {
        self.state.lock().events.get(id).map(|(_, e)| e.clone())
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn creates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Create { .. }))
            .count()
    }

    pub fn updates(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Update { .. }))
            .count()
    }

    fn record(&self, call: Call) -> CalendarResult<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn to_remote(id: &str, calendar_id: &str, event: &EventData) -> RemoteEvent {
    let (start, end) = event.validate().expect("engine validates before calling");
    RemoteEvent {
        id: id.to_string(),
        calendar_id: calendar_id.to_string(),
        summary: event.summary.clone(),
        description: event.description.clone(),
        location: event.location.clone(),
        start: start.as_remote(),
        end: end.as_remote(),
        all_day: start.is_all_day(),
        attendees: Vec::new(),
        organizer: None,
        status: EventStatus::Confirmed,
        html_link: None,
        etag: None,
    }
}

#[async_trait]
impl RemoteCalendar for FakeCalendar {
    fn name(&self) -> &str {
        "fake"
    }

    fn supports_explicit_ids(&self) -> bool {
        self.explicit_ids
    }

    async fn create(
        &self,
        event: &EventData,
        explicit_id: Option<&str>,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent> {
        self.record(Call::Create {
            explicit_id: explicit_id.map(str::to_string),
            calendar_id: calendar_id.to_string(),
        })?;

        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        let id = match explicit_id {
            Some(id) => {
                if state.events.contains_key(id) || state.reserved.contains(id) {
                    return Err(CalendarError::Conflict);
                }
                id.to_string()
            }
            None => {
                state.next_id += 1;
                format!("gen{:05}", state.next_id)
            }
        };
        state
            .events
            .insert(id.clone(), (calendar_id.to_string(), event.clone()));
        Ok(to_remote(&id, calendar_id, event))
    }

    async fn update(
        &self,
        remote_event_id: &str,
        event: &EventData,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent> {
        self.record(Call::Update {
            id: remote_event_id.to_string(),
            calendar_id: calendar_id.to_string(),
        })?;
        let mut state = self.state.lock();
        match state.events.get_mut(remote_event_id) {
            Some(stored) => {
                stored.1 = event.clone();
                Ok(to_remote(remote_event_id, calendar_id, event))
            }
            None => Err(CalendarError::EventNotFound(remote_event_id.to_string())),
        }
    }

    async fn delete(&self, remote_event_id: &str, calendar_id: &str) -> CalendarResult<()> {
        self.record(Call::Delete {
            id: remote_event_id.to_string(),
            calendar_id: calendar_id.to_string(),
        })?;
        let mut state = self.state.lock();
        match state.events.remove(remote_event_id) {
            Some(_) => {
                state.reserved.insert(remote_event_id.to_string());
                Ok(())
            }
            None => Err(CalendarError::EventNotFound(remote_event_id.to_string())),
        }
    }

    async fn list(&self, calendar_id: &str, query: &ListQuery) -> CalendarResult<Vec<RemoteEvent>> {
        self.record(Call::List {
            calendar_id: calendar_id.to_string(),
        })?;
        let state = self.state.lock();
        let mut events: Vec<_> = state
            .events
            .iter()
            .filter(|(_, (cal, _))| cal == calendar_id)
            .map(|(id, (cal, event))| to_remote(id, cal, event))
            .collect();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events.truncate(query.max_results);
        Ok(events)
    }
}

pub fn standup() -> EventData {
    EventData::new("Standup", "2024-01-15T09:00:00", "2024-01-15T09:15:00")
}

/// An engine over an in-memory store and a fresh fake calendar.
pub fn engine_with(remote: FakeCalendar) -> (SyncEngine, Arc<FakeCalendar>, Arc<SqliteSyncStore>) {
    let remote = Arc::new(remote);
    let store = Arc::new(SqliteSyncStore::in_memory().expect("in-memory store"));
    let engine = SyncEngine::new(store.clone(), remote.clone());
    (engine, remote, store)
}

pub fn engine() -> (SyncEngine, Arc<FakeCalendar>, Arc<SqliteSyncStore>) {
    engine_with(FakeCalendar::new())
}
