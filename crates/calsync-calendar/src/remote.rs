//! The seam between the orchestrator and a calendar provider.

use async_trait::async_trait;

use crate::error::CalendarResult;
use crate::types::{EventData, ListQuery, RemoteEvent};

/// A remote calendar provider.
///
/// Implementations map provider failures onto [`CalendarError`] so the
/// orchestrator can tell "gone" from "try again" from "bad input".
///
/// [`CalendarError`]: crate::error::CalendarError
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Whether `create` honours a caller-chosen event ID.
    fn supports_explicit_ids(&self) -> bool {
        true
    }

    /// Create an event. With `explicit_id`, a taken ID fails with
    /// `CalendarError::Conflict`.
    async fn create(
        &self,
        event: &EventData,
        explicit_id: Option<&str>,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent>;

    /// Replace the event's content. A missing event fails with
    /// `CalendarError::EventNotFound`.
    async fn update(
        &self,
        remote_event_id: &str,
        event: &EventData,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent>;

    async fn delete(&self, remote_event_id: &str, calendar_id: &str) -> CalendarResult<()>;

    async fn list(&self, calendar_id: &str, query: &ListQuery) -> CalendarResult<Vec<RemoteEvent>>;
}
