// src/models.rs
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const UNTITLED_DESIGN: &str = "Untitled Design";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    Catalog,
    Published,
}

/// A marketplace design as the presentation layer renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayItem {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub image_url: String,
    pub thumbnail_url: Option<String>,
    pub tags: Vec<String>,
    pub colors: Vec<String>,
    pub likes: Option<u64>,
    pub price: Option<f64>,
    pub created_at: Option<String>,
    pub origin: ItemOrigin,
    pub metadata: Value,
}

impl DisplayItem {
    pub fn is_user_generated(&self) -> bool {
        self.origin == ItemOrigin::Published
    }
}

/// `/api/catalog` record. Only the image decides whether a record is usable,
/// so every other field tolerates odd values and falls back to `None`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawCatalogItem {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub src: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub colors: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub likes: Option<u64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price: Option<f64>,
    #[serde(rename = "createdAt", default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
}

/// `/api/showcase` record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPublishedItem {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_id_opt")]
    pub user_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub original_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub poster_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_strings")]
    pub colors: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient")]
    pub likes: Option<u64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub quadtych_urls: Option<QuadtychUrls>,
    #[serde(default)]
    pub fusion_spec: Option<Value>,
}

/// The same conceptual item as delivered by the two feed endpoints.
#[derive(Debug, Clone)]
pub enum RawItem {
    Catalog(RawCatalogItem),
    Published(RawPublishedItem),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

fn id_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_id_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_text(Value::deserialize(deserializer)?))
}

/// A value of the wrong shape reads as absent.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(Value::deserialize(deserializer)?).ok())
}

/// Keeps the string entries of a list; anything that is not a list reads as absent.
fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Array(entries) => Ok(Some(
            entries
                .into_iter()
                .filter_map(|entry| match entry {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        )),
        _ => Ok(None),
    }
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let count: Option<u64> = lenient(deserializer)?;
    Ok(count.unwrap_or(0))
}

fn lenient_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_strings(deserializer)?.unwrap_or_default())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|price: &f64| price.is_finite()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Upcoming,
    Active,
    Voting,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventHost {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub avatar: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub subscription_plan: Option<String>,
}

/// A design contest as `/api/events` lists it. The detail endpoint adds the
/// nested host, rules and the viewer's own participation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub thumbnail_url: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub banner_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_id_opt")]
    pub host_id: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub host_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub host_avatar: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub host: Option<EventHost>,
    #[serde(default, deserialize_with = "lenient")]
    pub start_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub end_date: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<EventStatus>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub participant_count: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub view_count: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub support_count: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub submission_count: u64,
    #[serde(default, deserialize_with = "lenient")]
    pub max_submissions: Option<u64>,
    #[serde(default, deserialize_with = "lenient_string_list")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub prize_info: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub rules: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub is_supported: Option<bool>,
    #[serde(default)]
    pub user_submission: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
}

impl Event {
    /// Flat `host_name` from the list endpoint, else the nested detail host.
    pub fn host_display_name(&self) -> Option<&str> {
        self.host_name
            .as_deref()
            .or_else(|| self.host.as_ref().and_then(|h| h.name.as_deref()))
    }
}

/// An event with the figures the events tab derives for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventView {
    #[serde(flatten)]
    pub event: Event,
    pub popularity: u64,
    /// Whole days left for an active event; absent once it has ended.
    pub days_remaining: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteColor {
    pub name: String,
    pub hex: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MotifAbstraction {
    pub source_cue: String,
    pub operation: String,
    pub placement: Vec<String>,
    pub style: String,
    pub scale: String,
    pub notes: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_intent: Option<String>,
}

/// Structured design descriptor produced by the analysis step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSpec {
    pub palette: Vec<PaletteColor>,
    pub silhouette: String,
    pub materials: Vec<String>,
    pub motif_abstractions: Vec<MotifAbstraction>,
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inspiration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_concept: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotional_keywords: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dominant_trait_analysis: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FusionStage {
    Upload,
    Analyzing,
    Preview,
    Generating,
    Revealing,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSlot {
    A,
    B,
}

impl ImageSlot {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "a" | "A" => Some(ImageSlot::A),
            "b" | "B" => Some(ImageSlot::B),
            _ => None,
        }
    }
}

/// A locally selected source image, held in memory until the fusion uploads it.
#[derive(Debug, Clone, PartialEq)]
pub struct FusionImage {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedImage {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
}

impl From<&FusionImage> for SelectedImage {
    fn from(image: &FusionImage) -> Self {
        Self {
            filename: image.filename.clone(),
            content_type: image.content_type.clone(),
            size: image.data.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriptychUrls {
    pub front: String,
    pub side: String,
    pub back: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadtychUrls {
    pub main: String,
    pub front: String,
    pub side: String,
    pub back: String,
}

/// Multi-angle renders of one generated design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewBundle {
    Triptych(TriptychUrls),
    Quadtych(QuadtychUrls),
}

/// A generated design whose images are already in object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedDesign {
    pub image_url: String,
    pub image_key: String,
    pub mime_type: String,
    pub prompt: String,
    pub views: Option<ViewBundle>,
    pub metadata: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionSnapshot {
    pub stage: FusionStage,
    pub image_a: Option<SelectedImage>,
    pub image_b: Option<SelectedImage>,
    pub fusion_spec: Option<FusionSpec>,
    pub generated_image_url: Option<String>,
    pub generation_id: Option<String>,
    pub views: Option<ViewBundle>,
    pub pending_persist: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarItem {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub image_id: String,
    pub title: String,
    pub similarity_score: Option<f64>,
    pub overlapping_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantStatus {
    pub side: Option<String>,
    pub back: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Published,
    Draft,
}

/// Title, description and tags proposed for a design before publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetadataRequest {
    pub image_url: String,
    #[serde(default)]
    pub fusion_spec: Option<FusionSpec>,
}

/// What the publication screen submits for a generated design.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationDraft {
    pub image_url: String,
    pub generation_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: PublicationStatus,
    #[serde(default)]
    pub price: u32,
    pub fusion_spec: Option<FusionSpec>,
    pub event_id: Option<String>,
    #[serde(default)]
    pub is_event_exclusive: bool,
}

/// Edit form for an item the current user owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEdit {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Comma separated, as typed into the form.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LikeState {
    pub item_id: String,
    pub liked: bool,
    pub likes: u64,
}
