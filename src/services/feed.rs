// src/services/feed.rs
//! Feed composition: normalise the catalog and published sources, then blend
//! them into one weighted, interleaved sequence.

use crate::errors::StudioError;
use crate::models::*;
use crate::services::api_client::ApiClient;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Direct object-storage host; images served from it are not publicly readable.
pub const DENYLISTED_URL_PATTERN: &str = ".r2.dev/";
const HIDDEN_TITLE_MARKER: &str = "watercolor_blend";

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<Value>, StudioError>;
    async fn fetch_published(&self, limit: usize) -> Result<Vec<Value>, StudioError>;
}

#[async_trait]
impl FeedSource for ApiClient {
    async fn fetch_catalog(&self) -> Result<Vec<Value>, StudioError> {
        let body: Value = self.get("/api/catalog").await?;
        Ok(body["images"].as_array().cloned().unwrap_or_default())
    }

    async fn fetch_published(&self, limit: usize) -> Result<Vec<Value>, StudioError> {
        let limit = limit.to_string();
        let body: Value = self
            .get_with_query("/api/showcase", &[("limit", limit.as_str())])
            .await?;
        Ok(body["items"].as_array().cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedOrdering {
    Shuffle,
    NewestFirst,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedSettings {
    pub published_limit: usize,
    pub primary_ratio: f64,
    pub ordering: FeedOrdering,
}

impl FeedSettings {
    pub fn studio(ratio: f64) -> Self {
        Self {
            published_limit: 50,
            primary_ratio: ratio,
            ordering: FeedOrdering::Shuffle,
        }
    }

    pub fn showcase(ratio: f64) -> Self {
        Self {
            published_limit: 100,
            primary_ratio: ratio,
            ordering: FeedOrdering::Shuffle,
        }
    }

    pub fn with_ordering(mut self, ordering: FeedOrdering) -> Self {
        self.ordering = ordering;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    Ready,
    /// Sources answered but nothing is displayable.
    Empty,
    /// Both sources failed.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feed {
    pub items: Vec<DisplayItem>,
    pub state: FeedState,
}

impl Feed {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            state: FeedState::Empty,
        }
    }
}

pub fn is_displayable_url(url: &str) -> bool {
    !url.trim().is_empty() && !url.contains(DENYLISTED_URL_PATTERN)
}

impl RawItem {
    pub fn parse(value: Value, origin: ItemOrigin) -> Option<Self> {
        let parsed = match origin {
            ItemOrigin::Catalog => serde_json::from_value(value).map(RawItem::Catalog),
            ItemOrigin::Published => serde_json::from_value(value).map(RawItem::Published),
        };
        match parsed {
            Ok(raw) => Some(raw),
            Err(e) => {
                warn!("Skipping malformed {:?} item: {}", origin, e);
                None
            }
        }
    }

    pub fn into_display_item(self) -> Option<DisplayItem> {
        match self {
            RawItem::Catalog(raw) => catalog_item(raw),
            RawItem::Published(raw) => published_item(raw),
        }
    }
}

fn is_hidden(title: Option<&String>) -> bool {
    title.is_some_and(|t| t.contains(HIDDEN_TITLE_MARKER))
}

fn title_or_placeholder(title: Option<String>) -> String {
    title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| UNTITLED_DESIGN.to_string())
}

fn catalog_item(raw: RawCatalogItem) -> Option<DisplayItem> {
    if is_hidden(raw.title.as_ref()) {
        return None;
    }
    let image_url = raw.src.filter(|u| is_displayable_url(u))?;
    let tags = raw.tags.unwrap_or_default();
    let metadata = if tags.is_empty() {
        Value::Null
    } else {
        json!({ "design_tokens": { "tags": tags } })
    };

    Some(DisplayItem {
        id: raw.id,
        user_id: String::new(),
        title: title_or_placeholder(raw.title),
        thumbnail_url: Some(image_url.clone()),
        image_url,
        tags,
        colors: raw.colors.unwrap_or_default(),
        likes: raw.likes,
        price: raw.price,
        created_at: raw.created_at,
        origin: ItemOrigin::Catalog,
        metadata,
    })
}

fn published_item(raw: RawPublishedItem) -> Option<DisplayItem> {
    if is_hidden(raw.title.as_ref()) {
        return None;
    }
    let image_url = raw
        .original_url
        .or(raw.poster_url)
        .or(raw.image_url)
        .filter(|u| !u.trim().is_empty());
    let Some(image_url) = image_url else {
        warn!("Published item {} missing image URL", raw.id);
        return None;
    };
    if !is_displayable_url(&image_url) {
        return None;
    }

    let tags = raw.tags.unwrap_or_default();
    let mut metadata = match raw.metadata {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if !tags.is_empty() {
        metadata.insert("design_tokens".into(), json!({ "tags": tags }));
    }
    if let Some(quadtych) = raw.quadtych_urls {
        metadata.insert("quadtych_urls".into(), json!(quadtych));
    }
    let concept = raw
        .fusion_spec
        .as_ref()
        .and_then(|s| s["fusion_concept"].as_str())
        .map(str::to_string);
    if let Some(description) = raw.description.or(concept) {
        metadata.insert("description".into(), Value::String(description));
    }
    if let Some(spec) = raw.fusion_spec {
        metadata.insert("fusion_spec".into(), spec);
    }

    Some(DisplayItem {
        id: raw.id,
        user_id: raw.user_id.unwrap_or_default(),
        title: title_or_placeholder(raw.title),
        thumbnail_url: Some(image_url.clone()),
        image_url,
        tags,
        colors: raw.colors.unwrap_or_default(),
        likes: Some(raw.likes.unwrap_or(0)),
        price: raw.price,
        created_at: raw.created_at,
        origin: ItemOrigin::Published,
        metadata: if metadata.is_empty() {
            Value::Null
        } else {
            Value::Object(metadata)
        },
    })
}

/// Maps raw records of one source to display items, dropping anything without a usable image.
pub fn normalize(raw_items: Vec<Value>, origin: ItemOrigin) -> Vec<DisplayItem> {
    raw_items
        .into_iter()
        .filter_map(|value| RawItem::parse(value, origin))
        .filter_map(RawItem::into_display_item)
        .collect()
}

/// Fisher-Yates.
pub fn shuffle<T, R: Rng + ?Sized>(mut items: Vec<T>, rng: &mut R) -> Vec<T> {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
    items
}

/// Runs of one or two primary items (two with probability `primary_ratio`),
/// each followed by one secondary item. Order within each input is kept.
pub fn interleave<T, R: Rng + ?Sized>(
    primary: Vec<T>,
    secondary: Vec<T>,
    primary_ratio: f64,
    rng: &mut R,
) -> Vec<T> {
    let ratio = primary_ratio.clamp(0.0, 1.0);
    let mut result = Vec::with_capacity(primary.len() + secondary.len());
    let mut primary = primary.into_iter();
    let mut secondary = secondary.into_iter();

    while primary.len() > 0 || secondary.len() > 0 {
        if primary.len() > 0 {
            let run = if rng.random_bool(ratio) { 2 } else { 1 };
            result.extend(primary.by_ref().take(run));
        }
        if let Some(item) = secondary.next() {
            result.push(item);
        }
    }

    result
}

fn parse_timestamp(value: Option<&String>) -> Option<DateTime<FixedOffset>> {
    value.and_then(|v| DateTime::parse_from_rfc3339(v).ok())
}

/// Newest first; items without a parseable timestamp sink to the end.
pub fn sort_newest_first(items: &mut [DisplayItem]) {
    items.sort_by(|a, b| {
        let a = parse_timestamp(a.created_at.as_ref());
        let b = parse_timestamp(b.created_at.as_ref());
        b.cmp(&a)
    });
}

/// Blends already-fetched sources. A failed source counts as empty.
pub fn compose_feed<R: Rng + ?Sized>(
    catalog: Result<Vec<Value>, StudioError>,
    published: Result<Vec<Value>, StudioError>,
    settings: &FeedSettings,
    rng: &mut R,
) -> Feed {
    let both_failed = catalog.is_err() && published.is_err();

    let catalog = match catalog {
        Ok(raw) => normalize(raw, ItemOrigin::Catalog),
        Err(e) => {
            warn!("Catalog source failed: {}", e);
            Vec::new()
        }
    };
    let published = match published {
        Ok(raw) => normalize(raw, ItemOrigin::Published),
        Err(e) => {
            warn!("Published source failed: {}", e);
            Vec::new()
        }
    };

    info!(
        "Fetched items: catalog={}, published={}",
        catalog.len(),
        published.len()
    );

    let published = match settings.ordering {
        FeedOrdering::Shuffle => shuffle(published, rng),
        FeedOrdering::NewestFirst => {
            let mut published = published;
            sort_newest_first(&mut published);
            published
        }
    };
    let catalog = shuffle(catalog, rng);

    let items = interleave(published, catalog, settings.primary_ratio, rng);
    let state = if !items.is_empty() {
        FeedState::Ready
    } else if both_failed {
        FeedState::Unavailable
    } else {
        FeedState::Empty
    };

    Feed { items, state }
}

pub struct FeedComposer {
    source: Arc<dyn FeedSource>,
}

impl FeedComposer {
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &Arc<dyn FeedSource> {
        &self.source
    }

    /// Fetches both sources concurrently and blends them.
    pub async fn compose(&self, settings: &FeedSettings) -> Feed {
        let (catalog, published) = futures_util::join!(
            self.source.fetch_catalog(),
            self.source.fetch_published(settings.published_limit)
        );
        let feed = compose_feed(catalog, published, settings, &mut rand::rng());
        info!("Total items after merge: {}", feed.items.len());
        feed
    }
}

pub fn paginate(items: &[DisplayItem], offset: usize, limit: usize) -> Vec<DisplayItem> {
    items.iter().skip(offset).take(limit).cloned().collect()
}

/// Case-insensitive match on title or any tag. A blank query matches everything.
pub fn search(items: &[DisplayItem], query: &str) -> Vec<DisplayItem> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return items.to_vec();
    }
    items
        .iter()
        .filter(|item| {
            item.title.to_lowercase().contains(&query)
                || item.tags.iter().any(|t| t.to_lowercase().contains(&query))
        })
        .cloned()
        .collect()
}
