//! Event types: the caller's input and the provider's view of an event.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Start or end of a local event, as supplied by the caller.
///
/// Strings are kept verbatim so that the change fingerprint sees exactly what
/// the caller sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventTime {
    Text(String),
    Instant(DateTime<Utc>),
}

impl EventTime {
    /// Stable string form used for change detection.
    pub fn canonical(&self) -> String {
        match self {
            EventTime::Text(s) => s.clone(),
            EventTime::Instant(dt) => dt.to_rfc3339_opts(SecondsFormat::AutoSi, true),
        }
    }

    /// Interpret the value as an instant, a floating local time or a date.
    pub fn parse(&self) -> Result<ParsedTime, String> {
        match self {
            EventTime::Instant(dt) => Ok(ParsedTime::Instant(dt.fixed_offset())),
            EventTime::Text(raw) => {
                let s = raw.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Ok(ParsedTime::Instant(dt));
                }
                for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"] {
                    if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                        return Ok(ParsedTime::Floating(dt));
                    }
                }
                if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    return Ok(ParsedTime::Date(date));
                }
                Err(format!("unrecognised date/time '{}'", raw))
            }
        }
    }
}

impl From<&str> for EventTime {
    fn from(s: &str) -> Self {
        EventTime::Text(s.to_string())
    }
}

impl From<String> for EventTime {
    fn from(s: String) -> Self {
        EventTime::Text(s)
    }
}

impl From<DateTime<Utc>> for EventTime {
    fn from(dt: DateTime<Utc>) -> Self {
        EventTime::Instant(dt)
    }
}

/// An [`EventTime`] after interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedTime {
    /// Absolute point in time with a known offset.
    Instant(DateTime<FixedOffset>),
    /// Wall-clock time in the event's timezone.
    Floating(NaiveDateTime),
    /// All-day.
    Date(NaiveDate),
}

impl ParsedTime {
    pub fn is_all_day(&self) -> bool {
        matches!(self, ParsedTime::Date(_))
    }

    /// Best-effort conversion to the remote representation. Floating times
    /// are read as UTC.
    pub fn as_remote(&self) -> RemoteTime {
        match self {
            ParsedTime::Instant(dt) => RemoteTime::DateTime(dt.with_timezone(&Utc)),
            ParsedTime::Floating(dt) => RemoteTime::DateTime(dt.and_utc()),
            ParsedTime::Date(d) => RemoteTime::Date(*d),
        }
    }
}

fn default_timezone() -> String {
    "UTC".to_string()
}

/// A local event the caller wants mirrored to the remote calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub attendees: Option<Vec<String>>,
}

impl EventData {
    pub fn new(
        summary: impl Into<String>,
        start: impl Into<EventTime>,
        end: impl Into<EventTime>,
    ) -> Self {
        Self {
            summary: summary.into(),
            start: start.into(),
            end: end.into(),
            description: None,
            location: None,
            timezone: default_timezone(),
            attendees: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_attendees(mut self, attendees: Vec<String>) -> Self {
        self.attendees = Some(attendees);
        self
    }

    /// Check the event is something a provider could accept.
    ///
    /// Returns the parsed bounds on success.
    pub fn validate(&self) -> Result<(ParsedTime, ParsedTime), String> {
        if self.timezone.trim().is_empty() {
            return Err("timezone must not be empty".to_string());
        }

        let start = self.start.parse().map_err(|e| format!("start: {}", e))?;
        let end = self.end.parse().map_err(|e| format!("end: {}", e))?;

        if start.is_all_day() != end.is_all_day() {
            return Err("start and end must both be dates or both be date-times".to_string());
        }

        let end_before_start = match (start, end) {
            (ParsedTime::Date(s), ParsedTime::Date(e)) => e < s,
            (ParsedTime::Instant(s), ParsedTime::Instant(e)) => e < s,
            (ParsedTime::Floating(s), ParsedTime::Floating(e)) => e < s,
            // Offset vs. floating depends on the timezone; the provider decides.
            _ => false,
        };
        if end_before_start {
            return Err(format!(
                "end ({}) is before start ({})",
                self.end.canonical(),
                self.start.canonical()
            ));
        }

        Ok((start, end))
    }
}

/// Calendar event as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEvent {
    pub id: String,
    pub calendar_id: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: RemoteTime,
    pub end: RemoteTime,
    pub all_day: bool,
    pub attendees: Vec<Attendee>,
    pub organizer: Option<String>,
    pub status: EventStatus,
    pub html_link: Option<String>,
    pub etag: Option<String>,
}

/// Event time - can be a specific datetime or an all-day date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteTime {
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
}

impl RemoteTime {
    #[cfg(test)]
    fn as_datetime(&self) -> DateTime<Utc> {
        match self {
            RemoteTime::DateTime(dt) => *dt,
            RemoteTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }
}

/// Event status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum EventStatus {
    #[default]
    Confirmed,
    Tentative,
    Cancelled,
}

/// Event attendee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    pub display_name: Option<String>,
    pub response_status: ResponseStatus,
    pub is_organizer: bool,
}

/// Attendee response status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum ResponseStatus {
    #[default]
    NeedsAction,
    Declined,
    Tentative,
    Accepted,
}

/// Window and size limit for listing remote events.
#[derive(Debug, Clone)]
pub struct ListQuery {
    pub time_min: Option<DateTime<Utc>>,
    pub time_max: Option<DateTime<Utc>>,
    pub max_results: usize,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            time_min: None,
            time_max: None,
            max_results: 250,
        }
    }
}

// API Response Types

/// Google Calendar API event response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub id: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<ApiEventTime>,
    pub end: Option<ApiEventTime>,
    #[serde(default)]
    pub attendees: Vec<ApiAttendee>,
    pub organizer: Option<ApiOrganizer>,
    pub status: Option<String>,
    pub html_link: Option<String>,
    pub etag: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEventTime {
    pub date_time: Option<String>,
    pub date: Option<String>,
    pub time_zone: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAttendee {
    pub email: String,
    pub display_name: Option<String>,
    pub response_status: Option<String>,
    #[serde(default)]
    pub organizer: bool,
}

#[derive(Debug, Deserialize)]
pub struct ApiOrganizer {
    pub email: Option<String>,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
}

/// API response for event list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    #[serde(default)]
    pub items: Vec<ApiEvent>,
    pub next_page_token: Option<String>,
}

impl RemoteEvent {
    /// Convert API response to a RemoteEvent.
    pub fn from_api(api: ApiEvent, calendar_id: &str) -> Self {
        let (start, all_day) = api
            .start
            .map(|t| parse_event_time(&t))
            .unwrap_or((RemoteTime::DateTime(Utc::now()), false));

        let end = api
            .end
            .map(|t| parse_event_time(&t).0)
            .unwrap_or_else(|| start.clone());

        let status = match api.status.as_deref() {
            Some("tentative") => EventStatus::Tentative,
            Some("cancelled") => EventStatus::Cancelled,
            _ => EventStatus::Confirmed,
        };

        let attendees = api
            .attendees
            .into_iter()
            .map(|a| {
                let response_status = match a.response_status.as_deref() {
                    Some("accepted") => ResponseStatus::Accepted,
                    Some("declined") => ResponseStatus::Declined,
                    Some("tentative") => ResponseStatus::Tentative,
                    _ => ResponseStatus::NeedsAction,
                };
                Attendee {
                    email: a.email,
                    display_name: a.display_name,
                    response_status,
                    is_organizer: a.organizer,
                }
            })
            .collect();

        Self {
            id: api.id,
            calendar_id: calendar_id.to_string(),
            summary: api.summary.unwrap_or_default(),
            description: api.description,
            location: api.location,
            start,
            end,
            all_day,
            attendees,
            organizer: api.organizer.and_then(|o| o.email),
            status,
            html_link: api.html_link,
            etag: api.etag,
        }
    }
}

fn parse_event_time(api: &ApiEventTime) -> (RemoteTime, bool) {
    if let Some(dt_str) = &api.date_time {
        if let Ok(dt) = DateTime::parse_from_rfc3339(dt_str) {
            return (RemoteTime::DateTime(dt.with_timezone(&Utc)), false);
        }
    }
    if let Some(date_str) = &api.date {
        if let Ok(date) = NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
            return (RemoteTime::Date(date), true);
        }
    }
    (RemoteTime::DateTime(Utc::now()), false)
}
