// src/services/events.rs
use crate::errors::StudioError;
use crate::models::{Event, EventStatus, EventView};
use crate::services::api_client::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

const EVENT_LIST_LIMIT: usize = 50;
const DAY_MILLIS: i64 = 24 * 60 * 60 * 1_000;

#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_events(&self, limit: usize) -> Result<Vec<Value>, StudioError>;
    async fn fetch_event(&self, event_id: &str) -> Result<Option<Value>, StudioError>;
}

#[async_trait]
impl EventSource for ApiClient {
    async fn fetch_events(&self, limit: usize) -> Result<Vec<Value>, StudioError> {
        let limit = limit.to_string();
        let body: Value = self
            .get_with_query("/api/events", &[("limit", limit.as_str())])
            .await?;
        Ok(body["events"].as_array().cloned().unwrap_or_default())
    }

    async fn fetch_event(&self, event_id: &str) -> Result<Option<Value>, StudioError> {
        let body: Value = self.get(&format!("/api/events/{}", event_id)).await?;
        Ok(body.get("event").filter(|e| e.is_object()).cloned())
    }
}

/// Views count once, supports twice, participants three times.
pub fn popularity(event: &Event) -> u64 {
    event
        .view_count
        .saturating_add(event.support_count.saturating_mul(2))
        .saturating_add(event.participant_count.saturating_mul(3))
}

/// Most popular first; ties keep the order the API returned.
pub fn rank_events(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|event| std::cmp::Reverse(popularity(event)));
    events
}

/// Days left before an active event closes, rounded up. `None` for events
/// that are not running or whose end has passed.
pub fn days_remaining(event: &Event, now: DateTime<Utc>) -> Option<i64> {
    if event.status != Some(EventStatus::Active) {
        return None;
    }
    let end = DateTime::parse_from_rfc3339(event.end_date.as_deref()?).ok()?;
    let left = end.with_timezone(&Utc).signed_duration_since(now).num_milliseconds();
    (left > 0).then(|| (left + DAY_MILLIS - 1) / DAY_MILLIS)
}

/// Case-insensitive match on the title or the host name. A blank query keeps everything.
pub fn search_events(events: &[EventView], query: &str) -> Vec<EventView> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return events.to_vec();
    }
    events
        .iter()
        .filter(|view| {
            let title = view.event.title.as_deref().unwrap_or_default();
            let host = view.event.host_display_name().unwrap_or_default();
            title.to_lowercase().contains(&query) || host.to_lowercase().contains(&query)
        })
        .cloned()
        .collect()
}

fn parse_event(value: Value) -> Option<Event> {
    match serde_json::from_value(value) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!("Skipping malformed event: {}", e);
            None
        }
    }
}

fn view(event: Event, now: DateTime<Utc>) -> EventView {
    EventView {
        popularity: popularity(&event),
        days_remaining: days_remaining(&event, now),
        event,
    }
}

/// The events tab: ranked listing with search, and single-event detail.
pub struct EventBoard {
    source: Arc<dyn EventSource>,
}

impl EventBoard {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self { source }
    }

    pub async fn list(&self, query: &str) -> Result<Vec<EventView>, StudioError> {
        let raw = self.source.fetch_events(EVENT_LIST_LIMIT).await?;
        let now = Utc::now();
        let ranked: Vec<EventView> = rank_events(raw.into_iter().filter_map(parse_event).collect())
            .into_iter()
            .map(|event| view(event, now))
            .collect();
        info!("Loaded {} events", ranked.len());
        Ok(search_events(&ranked, query))
    }

    pub async fn detail(&self, event_id: &str) -> Result<EventView, StudioError> {
        if event_id.trim().is_empty() {
            return Err(StudioError::Validation("Event id is required".to_string()));
        }
        self.source
            .fetch_event(event_id)
            .await?
            .and_then(parse_event)
            .map(|event| view(event, Utc::now()))
            .ok_or_else(|| StudioError::NotFound(format!("Event {}", event_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FakeIdentity, spawn_fake_api};
    use actix_web::{HttpResponse, web};
    use chrono::Duration;
    use reqwest::Client;
    use serde_json::json;
    use std::collections::HashMap;

    fn event(id: &str, views: u64, supports: u64, participants: u64) -> Event {
        Event {
            id: id.to_string(),
            title: Some(format!("Event {}", id)),
            view_count: views,
            support_count: supports,
            participant_count: participants,
            ..Event::default()
        }
    }

    #[test]
    fn ranking_weights_supports_and_participants() {
        let ranked = rank_events(vec![
            event("views", 100, 0, 0),
            event("supports", 0, 40, 0),
            event("participants", 0, 0, 30),
            event("tie", 90, 0, 0),
            event("tie-late", 90, 0, 0),
        ]);
        let ids: Vec<&str> = ranked.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["views", "participants", "tie", "tie-late", "supports"]);
        assert_eq!(popularity(&event("x", 1520, 89, 128)), 1520 + 178 + 384);
    }

    #[test]
    fn search_matches_title_or_host_ignoring_case() {
        let mut summer = event("1", 0, 0, 0);
        summer.title = Some("Summer Fashion Challenge".into());
        summer.host_name = Some("OpenDesign Team".into());
        let mut vtuber = event("2", 0, 0, 0);
        vtuber.title = Some("Avatar Outfits".into());
        vtuber.host = Some(crate::models::EventHost {
            name: Some("Mika Channel".into()),
            ..Default::default()
        });
        let now = Utc::now();
        let views = vec![view(summer, now), view(vtuber, now)];

        let ids = |query: &str| -> Vec<String> {
            search_events(&views, query).into_iter().map(|v| v.event.id).collect()
        };
        assert_eq!(ids("summer"), ["1"]);
        assert_eq!(ids("OPENDESIGN"), ["1"]);
        assert_eq!(ids("mika"), ["2"]);
        assert_eq!(ids("  "), ["1", "2"]);
        assert!(ids("winter").is_empty());
    }

    #[test]
    fn days_remaining_only_for_running_events() {
        let now = Utc::now();
        let mut active = event("1", 0, 0, 0);
        active.status = Some(EventStatus::Active);
        active.end_date = Some((now + Duration::hours(36)).to_rfc3339());
        assert_eq!(days_remaining(&active, now), Some(2));

        active.end_date = Some((now - Duration::hours(1)).to_rfc3339());
        assert_eq!(days_remaining(&active, now), None);

        let mut upcoming = active.clone();
        upcoming.status = Some(EventStatus::Upcoming);
        upcoming.end_date = Some((now + Duration::days(5)).to_rfc3339());
        assert_eq!(days_remaining(&upcoming, now), None);
    }

    fn event_routes(cfg: &mut web::ServiceConfig) {
        cfg.route(
            "/api/events",
            web::get().to(|query: web::Query<HashMap<String, String>>| async move {
                if query.get("limit").map(String::as_str) != Some("50") {
                    return HttpResponse::BadRequest().finish();
                }
                HttpResponse::Ok().json(json!({"success": true, "events": [
                    {"id": "quiet", "title": "Quiet", "host_name": "Studio A",
                     "view_count": 10, "support_count": 1, "participant_count": 1},
                    {"id": 7, "title": "Loud", "host_name": "Studio B",
                     "view_count": 10, "support_count": "lots", "participant_count": 20},
                    "not-an-event"
                ]}))
            }),
        )
        .route(
            "/api/events/{id}",
            web::get().to(|path: web::Path<String>| async move {
                match path.as_str() {
                    "7" => HttpResponse::Ok().json(json!({"success": true, "event": {
                        "id": "7", "title": "Loud", "status": "active",
                        "host": {"id": "h1", "name": "Studio B", "avatar": "", "subscription_plan": "pro"},
                        "tags": ["coat", 3], "is_supported": true
                    }})),
                    _ => HttpResponse::Ok().json(json!({"success": false})),
                }
            }),
        );
    }

    async fn board() -> EventBoard {
        let base = spawn_fake_api(event_routes).await;
        let api = ApiClient::new(base, Client::new(), Arc::new(FakeIdentity::anonymous()));
        EventBoard::new(Arc::new(api))
    }

    #[actix_web::test]
    async fn lists_events_ranked_and_filtered() {
        let board = board().await;

        let all = board.list("").await.unwrap();
        let ids: Vec<&str> = all.iter().map(|v| v.event.id.as_str()).collect();
        assert_eq!(ids, ["7", "quiet"]);
        assert_eq!(all[0].popularity, 70);
        assert_eq!(all[0].event.support_count, 0);

        let hits = board.list("studio a").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].event.id, "quiet");
    }

    #[actix_web::test]
    async fn detail_loads_one_event_or_reports_missing() {
        let board = board().await;

        let detail = board.detail("7").await.unwrap();
        assert_eq!(detail.event.host_display_name(), Some("Studio B"));
        assert_eq!(detail.event.tags, vec!["coat".to_string()]);
        assert_eq!(detail.event.is_supported, Some(true));

        assert!(matches!(board.detail("nope").await, Err(StudioError::NotFound(_))));
        assert!(matches!(board.detail(" ").await, Err(StudioError::Validation(_))));
    }
}
