// src/services/publishing.rs
use crate::errors::StudioError;
use crate::models::*;
use crate::services::api_client::ApiClient;
use crate::services::feed::{FeedSource, normalize};
use crate::services::identity::UserSession;
use base64::{Engine as _, engine::general_purpose};
use log::{info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

const SHOWCASE_LOOKUP_LIMIT: usize = 100;
const MAX_METADATA_TAGS: usize = 10;
const DEFAULT_TAGS: [&str; 2] = ["fashion", "design"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishReceipt {
    pub item_id: Option<String>,
    pub status: PublicationStatus,
    pub event_submitted: bool,
}

/// Publication, owner edits and single-item lookup.
pub struct Publisher {
    api: Arc<ApiClient>,
}

fn id_matches(value: &Value, id: &str) -> bool {
    match value {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Splits a comma separated tag field, dropping blanks.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn publication_body(draft: &PublicationDraft) -> Value {
    let colors: Vec<&str> = draft
        .fusion_spec
        .as_ref()
        .map(|spec| spec.palette.iter().map(|c| c.name.as_str()).collect())
        .unwrap_or_default();
    let generation_data = draft.fusion_spec.as_ref().map(|spec| {
        json!({
            "session_id": draft.generation_id,
            "parameters": { "fusion_spec": spec },
        })
    });

    json!({
        "originalUrl": draft.image_url,
        "posterUrl": draft.image_url,
        "sessionId": draft.generation_id,
        "title": draft.title.trim(),
        "description": draft.description.trim(),
        "tags": draft.tags,
        "colors": colors,
        "category": "user-generated",
        "price": draft.price,
        "saleType": match draft.status {
            PublicationStatus::Published => "buyout",
            PublicationStatus::Draft => "draft",
        },
        "generation_data": generation_data,
        "eventId": draft.event_id,
        "isEventExclusive": draft.is_event_exclusive,
    })
}

fn first_nonblank<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    values.into_iter().map(str::trim).find(|v| !v.is_empty())
}

/// Keeps the first occurrence of each non-blank tag, up to the cap.
fn dedup_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.into_iter().map(str::trim).filter(|t| !t.is_empty()) {
        if out.len() == MAX_METADATA_TAGS {
            break;
        }
        if !out.iter().any(|seen| seen == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

fn spec_color(spec: &FusionSpec) -> Option<&str> {
    first_nonblank(spec.palette.first().map(|c| c.name.as_str()))
}

fn spec_keywords(spec: &FusionSpec) -> &[String] {
    spec.emotional_keywords.as_deref().unwrap_or_default()
}

/// Title for a generated design: its main color and silhouette, or its main
/// material when the silhouette is unknown.
pub fn title_from_spec(spec: &FusionSpec) -> String {
    let color = spec_color(spec).unwrap_or("Mixed");
    let shape = first_nonblank([spec.silhouette.as_str()])
        .or_else(|| first_nonblank(spec.materials.iter().map(String::as_str)))
        .unwrap_or("Fabric");
    format!("{} {}", color, shape)
}

/// Metadata derived from the spec alone, used when image analysis is unavailable.
pub fn fallback_metadata(spec: Option<&FusionSpec>) -> GeneratedMetadata {
    let Some(spec) = spec else {
        return GeneratedMetadata {
            title: UNTITLED_DESIGN.to_string(),
            description: "A unique fashion design".to_string(),
            tags: DEFAULT_TAGS.iter().map(|t| t.to_string()).collect(),
        };
    };

    let silhouette = first_nonblank([spec.silhouette.as_str()]);
    let title = format!(
        "{} in {}",
        silhouette.unwrap_or("Design"),
        spec_color(spec).unwrap_or("Mixed Colors")
    );
    let description = match spec.fusion_concept.as_deref().and_then(|c| first_nonblank([c])) {
        Some(concept) => concept.to_string(),
        None => {
            let materials = if spec.materials.is_empty() {
                "premium materials".to_string()
            } else {
                spec.materials.join(", ")
            };
            format!(
                "A {} design crafted with {}.",
                silhouette.unwrap_or("unique").to_lowercase(),
                materials
            )
        }
    };

    let tags = dedup_tags(
        silhouette
            .into_iter()
            .chain(spec.materials.iter().take(3).map(String::as_str))
            .chain(spec.palette.iter().take(2).map(|c| c.name.as_str()))
            .chain(spec_keywords(spec).iter().take(3).map(String::as_str)),
    );

    GeneratedMetadata {
        title,
        description,
        tags: if tags.is_empty() {
            DEFAULT_TAGS.iter().map(|t| t.to_string()).collect()
        } else {
            tags
        },
    }
}

/// Combines the analysis response with the spec: AI description first, AI tags
/// ahead of the spec's own keywords.
pub fn metadata_from_analysis(analysis: &Value, spec: &FusionSpec) -> GeneratedMetadata {
    let description = analysis["description"]
        .as_str()
        .and_then(|d| first_nonblank([d]))
        .or_else(|| spec.fusion_concept.as_deref())
        .unwrap_or_default()
        .to_string();

    let ai_tags = analysis["tags"]
        .as_array()
        .map(|tags| tags.iter().filter_map(Value::as_str).collect::<Vec<_>>())
        .unwrap_or_default();
    let spec_tags = std::iter::once(spec.silhouette.as_str())
        .chain(spec.materials.iter().take(2).map(String::as_str))
        .chain(spec_keywords(spec).iter().take(3).map(String::as_str));

    GeneratedMetadata {
        title: title_from_spec(spec),
        description,
        tags: dedup_tags(ai_tags.into_iter().chain(spec_tags)),
    }
}

impl Publisher {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    async fn require_user(&self) -> Result<UserSession, StudioError> {
        self.api
            .identity()
            .current_user()
            .await
            .ok_or(StudioError::AuthRequired)
    }

    /// Publishes a generated design. An event submission failing afterwards
    /// does not undo the publication.
    pub async fn publish(&self, draft: &PublicationDraft) -> Result<PublishReceipt, StudioError> {
        self.require_user().await?;
        if draft.title.trim().is_empty() {
            return Err(StudioError::Validation("Title is required".to_string()));
        }

        let response: Value = self
            .api
            .post("/api/publish", &publication_body(draft))
            .await
            .map_err(|e| StudioError::Persistence(format!("Publish failed: {}", e)))?;
        let item_id = id_string(&response["item"]["id"]);
        info!("Published design {:?} as {:?}", item_id, draft.status);

        let mut event_submitted = false;
        if let (Some(event_id), Some(design_id)) = (&draft.event_id, &item_id) {
            let submission: Result<Value, _> = self
                .api
                .post(
                    "/api/event-submissions",
                    &json!({
                        "eventId": event_id,
                        "designId": design_id,
                        "imageUrl": draft.image_url,
                        "title": draft.title,
                        "description": draft.description,
                    }),
                )
                .await;
            match submission {
                Ok(_) => event_submitted = true,
                Err(e) => warn!("Event submission for {} failed: {}", design_id, e),
            }
        }

        Ok(PublishReceipt {
            item_id,
            status: draft.status,
            event_submitted,
        })
    }

    /// Proposes publication metadata for a generated image. Any failure of the
    /// image download or the analysis call falls back to spec-derived metadata.
    pub async fn generate_metadata(
        &self,
        image_url: &str,
        spec: Option<&FusionSpec>,
    ) -> GeneratedMetadata {
        let Some(spec) = spec else {
            return fallback_metadata(None);
        };
        match self.analyze_image(image_url).await {
            Ok(analysis) => {
                let metadata = metadata_from_analysis(&analysis, spec);
                info!("Generated metadata for {}: {:?}", image_url, metadata.title);
                metadata
            }
            Err(e) => {
                warn!("Metadata analysis failed, using spec fallback: {}", e);
                fallback_metadata(Some(spec))
            }
        }
    }

    async fn analyze_image(&self, image_url: &str) -> Result<Value, StudioError> {
        let response = self
            .api
            .http()
            .get(image_url)
            .send()
            .await
            .map_err(|e| StudioError::Http(format!("Failed to fetch {}: {}", image_url, e)))?;
        if !response.status().is_success() {
            return Err(StudioError::Http(format!(
                "Failed to fetch {}: {}",
                image_url,
                response.status()
            )));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .unwrap_or("image/png")
            .to_string();
        let data = response
            .bytes()
            .await
            .map_err(|e| StudioError::Http(format!("Failed to read {}: {}", image_url, e)))?;

        self.api
            .post(
                "/api/gemini/analyze-image",
                &json!({
                    "imageData": general_purpose::STANDARD.encode(&data),
                    "mimeType": mime_type,
                }),
            )
            .await
            .map_err(|e| StudioError::Analysis(format!("Metadata analysis failed: {}", e)))
    }

    /// Loads one of the current user's items into the edit form.
    pub async fn editable_item(&self, item_id: &str) -> Result<ItemEdit, StudioError> {
        let user = self.require_user().await?;
        let response: Value = self
            .api
            .get_with_query(
                "/api/user-gallery",
                &[("user_id", user.user_id.as_str()), ("type", "all")],
            )
            .await?;

        let item = response["images"]
            .as_array()
            .and_then(|images| images.iter().find(|i| id_matches(&i["id"], item_id)))
            .ok_or_else(|| StudioError::NotFound(format!("Item {}", item_id)))?;

        if item["user_id"].as_str() != Some(user.user_id.as_str()) {
            return Err(StudioError::Forbidden(format!("Item {}", item_id)));
        }

        let tags = item["tags"]
            .as_array()
            .or_else(|| item["metadata"]["design_tokens"]["tags"].as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        Ok(ItemEdit {
            title: item["title"].as_str().unwrap_or_default().to_string(),
            description: item["description"]
                .as_str()
                .or_else(|| item["metadata"]["description"].as_str())
                .unwrap_or_default()
                .to_string(),
            tags,
            is_public: item["type"] == "published" || item["is_published"].as_bool().unwrap_or(false),
        })
    }

    pub async fn update_item(&self, item_id: &str, edit: &ItemEdit) -> Result<(), StudioError> {
        self.require_user().await?;
        let _: Value = self
            .api
            .put(
                &format!("/api/user-gallery/{}", item_id),
                &json!({
                    "title": edit.title,
                    "description": edit.description,
                    "tags": parse_tags(&edit.tags),
                    "is_public": edit.is_public,
                }),
            )
            .await?;
        info!("Updated item {}", item_id);
        Ok(())
    }

    /// Looks an id up among published items first, then the catalog.
    pub async fn find_item(&self, item_id: &str) -> Result<DisplayItem, StudioError> {
        let (published, catalog) = futures_util::join!(
            self.api.fetch_published(SHOWCASE_LOOKUP_LIMIT),
            self.api.fetch_catalog()
        );

        let published = published.map(|raw| normalize(raw, ItemOrigin::Published));
        let catalog = catalog.map(|raw| normalize(raw, ItemOrigin::Catalog));
        if let (Err(e), Err(_)) = (&published, &catalog) {
            return Err(e.clone());
        }

        published
            .unwrap_or_default()
            .into_iter()
            .chain(catalog.unwrap_or_default())
            .find(|item| item.id == item_id)
            .ok_or_else(|| StudioError::NotFound(format!("Item {}", item_id)))
    }
}
