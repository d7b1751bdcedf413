// src/services/fusion_api.rs
use crate::errors::StudioError;
use crate::models::*;
use crate::services::api_client::ApiClient;
use crate::services::image_processor::AnalysisPayload;
use crate::services::spec_merge::spec_to_prompt;
use crate::services::storage::{ObjectStorage, new_object_key};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use futures_util::future::try_join_all;
use log::{error, info, warn};
use serde_json::{Map, Value, json};
use std::sync::Arc;

/// Remote AI analysis, generation and persistence.
#[async_trait]
pub trait FusionBackend: Send + Sync {
    /// Analyzes one image. The result is the raw spec object, merged later.
    async fn analyze(&self, payload: &AnalysisPayload) -> Result<Value, StudioError>;

    /// Generates a design and uploads its images.
    async fn generate(&self, spec: &FusionSpec, user_id: &str) -> Result<GeneratedDesign, StudioError>;

    /// Records the generation; returns its id.
    async fn persist(&self, design: &GeneratedDesign, user_id: &str) -> Result<String, StudioError>;

    async fn poll_variants(&self, generation_id: &str) -> VariantStatus;
}

pub struct HttpFusionBackend {
    api: Arc<ApiClient>,
    storage: Arc<dyn ObjectStorage>,
}

impl HttpFusionBackend {
    pub fn new(api: Arc<ApiClient>, storage: Arc<dyn ObjectStorage>) -> Self {
        Self { api, storage }
    }

    async fn upload_panel(
        &self,
        panel: &str,
        base64_data: &str,
        mime_type: &str,
        user_id: &str,
    ) -> Result<String, StudioError> {
        let data = decode_image(base64_data, panel)?;
        let key = new_object_key("fusion", Some(user_id), "jpg", Some(panel));
        self.storage.upload(data, &key, mime_type).await
    }
}

fn decode_image(base64_data: &str, label: &str) -> Result<Bytes, StudioError> {
    general_purpose::STANDARD
        .decode(base64_data)
        .map(Bytes::from)
        .map_err(|e| StudioError::Generation(format!("Failed to decode {} image: {}", label, e)))
}

fn panel<'a>(data: &'a Map<String, Value>, name: &str) -> Result<&'a str, StudioError> {
    data.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StudioError::Generation(format!("Missing {} panel data", name)))
}

#[async_trait]
impl FusionBackend for HttpFusionBackend {
    async fn analyze(&self, payload: &AnalysisPayload) -> Result<Value, StudioError> {
        let spec: Value = self
            .api
            .post(
                "/api/gemini/analyze-fusion",
                &json!({
                    "imageData": payload.base64,
                    "mimeType": payload.mime_type,
                    "generateInspiration": false,
                }),
            )
            .await
            .map_err(|e| StudioError::Analysis(e.to_string()))?;
        Ok(spec)
    }

    async fn generate(&self, spec: &FusionSpec, user_id: &str) -> Result<GeneratedDesign, StudioError> {
        let prompt = spec_to_prompt(spec);
        info!("Generating design, prompt length {}", prompt.len());

        let response: Value = self
            .api
            .post(
                "/api/nano/generate",
                &json!({
                    "prompt": prompt,
                    "enableTriptych": true,
                    "fusionConcept": spec.fusion_concept,
                    "dna": spec,
                    "userId": user_id,
                }),
            )
            .await
            .map_err(|e| StudioError::Generation(e.to_string()))?;

        if !response["success"].as_bool().unwrap_or(false) || response["imageData"].is_null() {
            return Err(StudioError::Generation(
                "Failed to generate image: No image data received".to_string(),
            ));
        }

        let mime_type = response["mimeType"]
            .as_str()
            .unwrap_or("image/jpeg")
            .to_string();
        let metadata = response["metadata"].clone();

        match &response["imageData"] {
            Value::Object(panels) if panels.contains_key("main") => {
                let names = ["main", "front", "side", "back"];
                let data = names
                    .iter()
                    .map(|name| panel(panels, name))
                    .collect::<Result<Vec<_>, _>>()?;
                let urls = try_join_all(
                    names
                        .iter()
                        .zip(data)
                        .map(|(name, b64)| self.upload_panel(name, b64, &mime_type, user_id)),
                )
                .await?;
                let views = QuadtychUrls {
                    main: urls[0].clone(),
                    front: urls[1].clone(),
                    side: urls[2].clone(),
                    back: urls[3].clone(),
                };
                Ok(GeneratedDesign {
                    image_key: self.storage.key_from_url(&views.main),
                    image_url: views.main.clone(),
                    mime_type,
                    prompt,
                    views: Some(ViewBundle::Quadtych(views)),
                    metadata,
                })
            }
            Value::Object(panels) => {
                let (front, side, back) = (
                    panel(panels, "front")?,
                    panel(panels, "side")?,
                    panel(panels, "back")?,
                );
                let (front, side, back) = futures_util::try_join!(
                    self.upload_panel("front", front, &mime_type, user_id),
                    self.upload_panel("side", side, &mime_type, user_id),
                    self.upload_panel("back", back, &mime_type, user_id),
                )?;
                Ok(GeneratedDesign {
                    image_key: self.storage.key_from_url(&front),
                    image_url: front.clone(),
                    mime_type,
                    prompt,
                    views: Some(ViewBundle::Triptych(TriptychUrls { front, side, back })),
                    metadata,
                })
            }
            Value::String(single) => {
                let data = decode_image(single, "generated")?;
                let extension = if mime_type.contains("webp") { "webp" } else { "jpg" };
                let key = new_object_key("generated", Some(user_id), extension, None);
                let url = self.storage.upload(data, &key, &mime_type).await?;
                Ok(GeneratedDesign {
                    image_url: url,
                    image_key: key,
                    mime_type,
                    prompt,
                    views: None,
                    metadata,
                })
            }
            other => Err(StudioError::Generation(format!(
                "Unexpected image data: {}",
                other
            ))),
        }
    }

    async fn persist(&self, design: &GeneratedDesign, user_id: &str) -> Result<String, StudioError> {
        let mut metadata = match &design.metadata {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        match &design.views {
            Some(ViewBundle::Triptych(views)) => {
                metadata.insert("triptych".into(), json!(true));
                metadata.insert("sideUrl".into(), json!(views.side));
                metadata.insert("backUrl".into(), json!(views.back));
            }
            Some(ViewBundle::Quadtych(views)) => {
                metadata.insert("quadtych_urls".into(), json!(views));
            }
            None => {}
        }

        let response: Value = self
            .api
            .post(
                "/api/save-generation",
                &json!({
                    "imageUrl": design.image_url,
                    "imageKey": design.image_key,
                    "metadata": metadata,
                    "userId": user_id,
                }),
            )
            .await
            .map_err(|e| {
                error!("save-generation failed: {}", e);
                StudioError::Persistence(e.to_string())
            })?;

        response["generationId"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| StudioError::Persistence("No generationId in response".to_string()))
    }

    async fn poll_variants(&self, generation_id: &str) -> VariantStatus {
        let response: Value = match self
            .api
            .get(&format!("/api/variants/{}/status", generation_id))
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to poll variant status: {}", e);
                return VariantStatus::default();
            }
        };

        let find = |kind: &str| {
            response["variants"].as_array().and_then(|variants| {
                variants
                    .iter()
                    .find(|v| v["variant_type"] == kind)
                    .and_then(|v| v["image_url"].as_str())
                    .filter(|u| !u.is_empty())
                    .map(str::to_string)
            })
        };

        VariantStatus {
            side: find("SIDE"),
            back: find("BACK"),
        }
    }
}
