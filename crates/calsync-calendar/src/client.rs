//! Google Calendar v3 implementation of [`RemoteCalendar`].

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::{CalendarError, CalendarResult};
use crate::remote::RemoteCalendar;
use crate::types::*;

pub const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Largest page Google is asked for in one list request.
const MAX_PAGE_SIZE: usize = 250;

pub struct GoogleCalendarClient {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
}

impl GoogleCalendarClient {
    pub fn new(access_token: &str) -> Self {
        Self::with_base_url(access_token, CALENDAR_API_BASE)
    }

    /// Point the client at another endpoint (a proxy, or a mock server in tests).
    pub fn with_base_url(access_token: &str, base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn events_url(&self, calendar_id: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_id)
        )
    }

    fn event_url(&self, calendar_id: &str, event_id: &str) -> String {
        format!(
            "{}/{}",
            self.events_url(calendar_id),
            urlencoding::encode(event_id)
        )
    }

    /// Fetch one page of events.
    async fn list_page(
        &self,
        calendar_id: &str,
        query: &ListQuery,
        page_size: usize,
        page_token: Option<&str>,
    ) -> CalendarResult<EventListResponse> {
        let mut url = format!(
            "{}?singleEvents=true&orderBy=startTime&maxResults={}",
            self.events_url(calendar_id),
            page_size
        );
        if let Some(min) = query.time_min {
            url.push_str(&format!("&timeMin={}", urlencoding::encode(&min.to_rfc3339())));
        }
        if let Some(max) = query.time_max {
            url.push_str(&format!("&timeMax={}", urlencoding::encode(&max.to_rfc3339())));
        }
        if let Some(pt) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(pt)));
        }

        let response = self
            .client
            .get(&url)
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Helper to handle API responses and errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> CalendarResult<T> {
        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| CalendarError::ApiError(format!("JSON parse error: {}", e)))
        } else {
            Err(error_from_response(response).await)
        }
    }
}

/// Map a non-success response onto a [`CalendarError`].
async fn error_from_response(response: reqwest::Response) -> CalendarError {
    let status = response.status().as_u16();

    match status {
        401 => CalendarError::TokenExpired,
        403 => CalendarError::AuthRequired,
        409 => CalendarError::Conflict,
        429 => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            CalendarError::RateLimited(retry_after)
        }
        _ => {
            let text = response.text().await.unwrap_or_default();
            match status {
                400 => CalendarError::InvalidEventData(text),
                404 | 410 => CalendarError::EventNotFound(text),
                500..=599 => CalendarError::ServerError {
                    status,
                    message: text,
                },
                _ => CalendarError::ApiError(format!("{}: {}", status, text)),
            }
        }
    }
}

fn time_body(time: &ParsedTime, timezone: &str) -> Value {
    match time {
        ParsedTime::Instant(dt) => json!({ "dateTime": dt.to_rfc3339(), "timeZone": timezone }),
        ParsedTime::Floating(dt) => json!({
            "dateTime": dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "timeZone": timezone,
        }),
        ParsedTime::Date(d) => json!({ "date": d.format("%Y-%m-%d").to_string() }),
    }
}

/// Build the request body for an event. Absent optionals are sent as `null`
/// so a PATCH clears them.
fn event_body(event: &EventData) -> CalendarResult<serde_json::Map<String, Value>> {
    let (start, end) = event
        .validate()
        .map_err(CalendarError::InvalidEventData)?;

    let attendees = event.attendees.as_ref().map(|list| {
        list.iter()
            .map(|email| json!({ "email": email }))
            .collect::<Vec<_>>()
    });

    let mut body = serde_json::Map::new();
    body.insert("summary".to_string(), json!(event.summary));
    body.insert("start".to_string(), time_body(&start, &event.timezone));
    body.insert("end".to_string(), time_body(&end, &event.timezone));
    body.insert("description".to_string(), json!(event.description));
    body.insert("location".to_string(), json!(event.location));
    body.insert("attendees".to_string(), json!(attendees));
    Ok(body)
}

#[async_trait]
impl RemoteCalendar for GoogleCalendarClient {
    fn name(&self) -> &str {
        "google"
    }

    #[instrument(skip(self, event), level = "info")]
    async fn create(
        &self,
        event: &EventData,
        explicit_id: Option<&str>,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent> {
        let mut body = event_body(event)?;
        // Nulls are noise on insert.
        body.retain(|_, v| !v.is_null());
        if let Some(id) = explicit_id {
            body.insert("id".to_string(), json!(id));
        }

        let response = self
            .client
            .post(self.events_url(calendar_id))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;

        let api_event: ApiEvent = self.handle_response(response).await?;
        Ok(RemoteEvent::from_api(api_event, calendar_id))
    }

    #[instrument(skip(self, event), level = "info")]
    async fn update(
        &self,
        remote_event_id: &str,
        event: &EventData,
        calendar_id: &str,
    ) -> CalendarResult<RemoteEvent> {
        let mut body = event_body(event)?;
        // Brings back an event that was cancelled on the remote side.
        body.insert("status".to_string(), json!("confirmed"));

        let response = self
            .client
            .patch(self.event_url(calendar_id, remote_event_id))
            .header("Authorization", self.auth_header())
            .json(&body)
            .send()
            .await?;

        let api_event: ApiEvent = self.handle_response(response).await?;
        Ok(RemoteEvent::from_api(api_event, calendar_id))
    }

    #[instrument(skip(self), level = "info")]
    async fn delete(&self, remote_event_id: &str, calendar_id: &str) -> CalendarResult<()> {
        let response = self
            .client
            .delete(self.event_url(calendar_id, remote_event_id))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        // 204 No Content on success
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    #[instrument(skip(self), level = "info")]
    async fn list(&self, calendar_id: &str, query: &ListQuery) -> CalendarResult<Vec<RemoteEvent>> {
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        while events.len() < query.max_results {
            let page_size = (query.max_results - events.len()).min(MAX_PAGE_SIZE);
            let page = self
                .list_page(calendar_id, query, page_size, page_token.as_deref())
                .await?;

            events.extend(
                page.items
                    .into_iter()
                    .map(|api| RemoteEvent::from_api(api, calendar_id)),
            );

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        events.truncate(query.max_results);
        tracing::debug!(count = events.len(), "Listed remote events");
        Ok(events)
    }
}
