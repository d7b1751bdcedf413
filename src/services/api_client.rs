// src/services/api_client.rs
use crate::errors::StudioError;
use crate::models::SimilarItem;
use crate::services::identity::IdentityProvider;
use log::{error, warn};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// JSON client for the marketplace REST API.
pub struct ApiClient {
    base_url: String,
    client: Client,
    identity: Arc<dyn IdentityProvider>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, client: Client, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            identity,
        }
    }

    pub fn build_http(timeout: Duration) -> Result<Client, StudioError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StudioError::Config(format!("Failed to build HTTP client: {}", e)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StudioError> {
        self.send::<T, Value>(Method::GET, path, &[], None).await
    }

    /// GET with query parameters, encoded by reqwest.
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, StudioError> {
        self.send::<T, Value>(Method::GET, path, query, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, StudioError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, StudioError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PUT, path, &[], Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, StudioError> {
        self.send::<T, Value>(Method::DELETE, path, &[], None).await
    }

    async fn send<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&B>,
    ) -> Result<T, StudioError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let mut request = self.client.request(method.clone(), self.url(path));

        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(session) = self.identity.current_user().await {
            request = request.bearer_auth(session.access_token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StudioError::Http(format!("{} {} failed: {}", method, path, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            self.handle_unauthorized().await;
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(StudioError::Http(format!(
                "{} {} returned {}: {}",
                method, path, status, error_text
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| StudioError::Http(format!("Failed to parse {} response: {}", path, e)))
    }

    /// Expired or invalid token: refresh once, sign out if that fails too.
    async fn handle_unauthorized(&self) {
        if let Err(e) = self.identity.refresh().await {
            warn!("Session refresh failed, signing out: {}", e);
            self.identity.sign_out().await;
        }
    }

    /// Vector search first, then tag overlap, then nothing.
    pub async fn similar_items(&self, item_id: &str, limit: usize) -> Vec<SimilarItem> {
        let vector: Result<Value, _> = self
            .post(
                "/api/vector-search",
                &json!({
                    "itemId": item_id,
                    "limit": limit,
                    "mode": "auto",
                    "threshold": 0.6,
                    "vectorWeight": 0.7,
                    "tagWeight": 0.3,
                }),
            )
            .await;

        match vector {
            Ok(body) => return parse_similar(&body),
            Err(e) => warn!("Vector search failed, falling back to tag search: {}", e),
        }

        let tags: Result<Value, _> = self
            .post(
                "/api/similar-items",
                &json!({ "itemId": item_id, "limit": limit }),
            )
            .await;

        match tags {
            Ok(body) => parse_similar(&body),
            Err(e) => {
                error!("Both vector and tag-based search failed: {}", e);
                Vec::new()
            }
        }
    }
}

fn parse_similar(body: &Value) -> Vec<SimilarItem> {
    body["similar_items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| serde_json::from_value(item.clone()).ok())
                .collect()
        })
        .unwrap_or_default()
}
