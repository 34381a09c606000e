use chrono::{DateTime, NaiveDateTime, Utc};
use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use super::{count_arg, OutlookConnector};
use crate::error::ConnectorError;
use crate::graph::{GraphRequest, QueryParams, FILTER, ORDER_BY, SELECT, TOP};
use crate::mail::EmailAddress;
use crate::utils::{arg_list, arg_str, require_str, structured_result_with_text};

const EVENT_SELECT_FIELDS: &str =
    "id,subject,bodyPreview,start,end,location,organizer,attendees,isAllDay,isCancelled";

const LOCAL_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateTimeZone {
    pub date_time: String,
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attendee {
    #[serde(rename = "emailAddress", default)]
    pub email_address: EmailAddress,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body_preview: Option<String>,
    #[serde(default)]
    pub start: Option<DateTimeZone>,
    #[serde(default)]
    pub end: Option<DateTimeZone>,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub organizer: Option<Attendee>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default)]
    pub is_all_day: Option<bool>,
    #[serde(default)]
    pub is_cancelled: Option<bool>,
}

fn event_path(id: &str) -> String {
    format!("me/events/{}", urlencoding::encode(id))
}

/// Graph returns `2024-05-01T09:30:00.0000000`; show minutes only.
fn short_time(t: Option<&DateTimeZone>) -> String {
    match t {
        Some(t) => {
            let trimmed: String = t.date_time.chars().take(16).collect();
            trimmed.replace('T', " ")
        }
        None => "?".to_string(),
    }
}

fn format_events(events: &[Event]) -> String {
    let mut out = String::new();
    for (i, e) in events.iter().enumerate() {
        let cancelled = if e.is_cancelled == Some(true) { " [CANCELLED]" } else { "" };
        out.push_str(&format!(
            "{}. {}{}\n   {} - {}\n",
            i + 1,
            e.subject.as_deref().unwrap_or("(no subject)"),
            cancelled,
            short_time(e.start.as_ref()),
            short_time(e.end.as_ref()),
        ));
        if let Some(loc) = e.location.as_ref().and_then(|l| l.display_name.as_deref()) {
            if !loc.is_empty() {
                out.push_str(&format!("   Location: {}\n", loc));
            }
        }
        if let Some(org) = e
            .organizer
            .as_ref()
            .and_then(|o| o.email_address.name.as_deref().or(o.email_address.address.as_deref()))
        {
            out.push_str(&format!("   Organizer: {}\n", org));
        }
        out.push_str(&format!("   ID: {}\n", e.id));
    }
    out
}

/// Parse an event time. Offset-qualified times are normalised to UTC; local
/// times are kept as given and paired with `default_tz`.
fn parse_event_time(raw: &str, default_tz: &str) -> Result<(NaiveDateTime, String), ConnectorError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok((dt.with_timezone(&Utc).naive_utc(), "UTC".to_string()));
    }
    LOCAL_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
        .map(|dt| (dt, default_tz.to_string()))
        .ok_or_else(|| {
            ConnectorError::InvalidParams(format!(
                "'{}' is not a valid time; use YYYY-MM-DDTHH:MM:SS",
                raw
            ))
        })
}

impl OutlookConnector {
    pub(super) async fn list_events(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let count = count_arg(args);
        let now = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let query = QueryParams::new()
            .with(TOP, count.to_string())
            .with(FILTER, format!("start/dateTime ge '{}'", now))
            .with(ORDER_BY, "start/dateTime")
            .with(SELECT, EVENT_SELECT_FIELDS);
        let prefer = format!("outlook.timezone=\"{}\"", self.config().time_zone);
        let request = GraphRequest::get("me/calendar/events")
            .with_query(query)
            .with_header("Prefer", &prefer);

        let values = self.api().send_paginated(request, count).await?;
        let events: Vec<Event> = values
            .into_iter()
            .filter_map(|v| match serde_json::from_value::<Event>(v) {
                Ok(e) => Some(e),
                Err(e) => {
                    warn!("skipping malformed event: {}", e);
                    None
                }
            })
            .collect();

        let text = if events.is_empty() {
            "No upcoming events.".to_string()
        } else {
            format!(
                "{} upcoming event(s) ({}):\n\n{}",
                events.len(),
                self.config().time_zone,
                format_events(&events)
            )
        };
        structured_result_with_text(&json!({"count": events.len(), "events": events}), Some(text))
    }

    pub(super) async fn create_event(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let subject = require_str(args, "subject")?;
        let tz = self.config().time_zone.as_str();
        let (start, start_tz) = parse_event_time(require_str(args, "start")?, tz)?;
        let (end, end_tz) = parse_event_time(require_str(args, "end")?, tz)?;
        if start_tz == end_tz && end <= start {
            return Err(ConnectorError::InvalidParams(
                "end must be after start".to_string(),
            ));
        }

        let mut payload = json!({
            "subject": subject,
            "start": {"dateTime": start.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": start_tz},
            "end": {"dateTime": end.format("%Y-%m-%dT%H:%M:%S").to_string(), "timeZone": end_tz},
        });
        if let Some(body) = arg_str(args, "body") {
            payload["body"] = json!({"contentType": "HTML", "content": body});
        }
        if let Some(location) = arg_str(args, "location") {
            payload["location"] = json!({"displayName": location});
        }
        let attendees = arg_list(args, "attendees");
        if !attendees.is_empty() {
            payload["attendees"] = Value::Array(
                attendees
                    .iter()
                    .map(|a| json!({"emailAddress": {"address": a}, "type": "required"}))
                    .collect(),
            );
        }

        let created = self
            .api()
            .send(GraphRequest::post("me/events").with_body(payload))
            .await?;
        let event: Event = serde_json::from_value(created)?;
        let text = format!(
            "Created event \"{}\" ({} - {}). ID: {}",
            subject,
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M"),
            event.id
        );
        structured_result_with_text(&event, Some(text))
    }

    /// `accept` or `decline` an invitation, notifying the organizer.
    pub(super) async fn respond_to_event(
        &self,
        args: &Map<String, Value>,
        action: &str,
    ) -> Result<CallToolResult, ConnectorError> {
        let id = require_str(args, "eventId")?;
        let mut body = json!({"sendResponse": true});
        if let Some(comment) = arg_str(args, "comment") {
            body["comment"] = json!(comment);
        }
        self.api()
            .send(GraphRequest::post(format!("{}/{}", event_path(id), action)).with_body(body))
            .await?;
        let verb = if action == "accept" { "accepted" } else { "declined" };
        structured_result_with_text(
            &json!({"eventId": id, "status": verb}),
            Some(format!("Event {}.", verb)),
        )
    }

    pub(super) async fn cancel_event(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let id = require_str(args, "eventId")?;
        let comment = arg_str(args, "comment").unwrap_or("This event has been cancelled.");
        self.api()
            .send(
                GraphRequest::post(format!("{}/cancel", event_path(id)))
                    .with_body(json!({"comment": comment})),
            )
            .await?;
        structured_result_with_text(
            &json!({"eventId": id, "status": "cancelled"}),
            Some("Event cancelled and attendees notified.".to_string()),
        )
    }

    pub(super) async fn delete_event(
        &self,
        args: &Map<String, Value>,
    ) -> Result<CallToolResult, ConnectorError> {
        let id = require_str(args, "eventId")?;
        self.api().send(GraphRequest::delete(event_path(id))).await?;
        structured_result_with_text(
            &json!({"eventId": id, "status": "deleted"}),
            Some("Event deleted.".to_string()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_times_keep_configured_zone() {
        let (dt, tz) = parse_event_time("2024-05-01T09:30", "Europe/Paris").unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "09:30");
        assert_eq!(tz, "Europe/Paris");
    }

    #[test]
    fn offset_times_become_utc() {
        let (dt, tz) = parse_event_time("2024-05-01T09:30:00+02:00", "Europe/Paris").unwrap();
        assert_eq!(dt.format("%H:%M").to_string(), "07:30");
        assert_eq!(tz, "UTC");
    }

    #[test]
    fn bad_time_is_a_param_error() {
        assert!(matches!(
            parse_event_time("next tuesday", "UTC"),
            Err(ConnectorError::InvalidParams(_))
        ));
    }

    #[test]
    fn event_list_shows_times_and_location() {
        let events: Vec<Event> = serde_json::from_value(json!([{
            "id": "e1",
            "subject": "Standup",
            "start": {"dateTime": "2024-05-01T09:30:00.0000000", "timeZone": "UTC"},
            "end": {"dateTime": "2024-05-01T09:45:00.0000000", "timeZone": "UTC"},
            "location": {"displayName": "Room 4"}
        }]))
        .unwrap();
        let text = format_events(&events);
        assert!(text.starts_with("1. Standup\n   2024-05-01 09:30 - 2024-05-01 09:45\n"));
        assert!(text.contains("Location: Room 4"));
        assert!(text.contains("ID: e1"));
    }
}
