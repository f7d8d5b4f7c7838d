//! Calendar sync engine.
//!
//! Maps caller-owned event keys to events in a remote calendar, keeping at
//! most one remote event per key, skipping writes when nothing meaningful
//! changed and recovering when the remote copy disappears.

pub mod client;
pub mod engine;
pub mod error;
pub mod hash;
pub mod ids;
pub mod locks;
pub mod record;
pub mod remote;
pub mod retry;
pub mod store;
pub mod types;

pub use client::GoogleCalendarClient;
pub use engine::{DeleteAction, EngineOptions, SyncAction, SyncEngine, SyncOutcome};
pub use error::{CalendarError, ErrorKind, StoreError, SyncError, SyncResult};
pub use hash::compute_hash;
pub use ids::derive_remote_id;
pub use record::{
    CountFilter, Page, RecordFilter, SyncCounts, SyncKey, SyncRecord, SyncStatus,
    DEFAULT_CALENDAR_ID,
};
pub use remote::RemoteCalendar;
pub use retry::{with_retry, RetryConfig};
pub use store::{SqliteSyncStore, SyncStore};
pub use types::{EventData, EventTime, ListQuery, RemoteEvent, RemoteTime};
