// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use log::info;
use std::sync::Arc;

mod config;
mod errors;
mod handlers;
mod models;
mod services;
#[cfg(test)]
mod test_support;

use crate::config::AppConfig;
use crate::errors::StudioError;
use crate::services::prefetch::{PrefetchOutcome, prefetch_all};
use crate::services::{
    ApiClient, EventBoard, FeedComposer, FeedSettings, FusionSessions, HttpFusionBackend,
    LikeTracker, ObjectStorage, PresignedStorage, Publisher, SessionIdentity, StudioContext,
};

const STARTUP_PREFETCH_COUNT: usize = 6;

#[derive(Clone)]
pub struct AppState {
    api: Arc<ApiClient>,
    session: Arc<SessionIdentity>,
    studio: Arc<StudioContext>,
    likes: Arc<LikeTracker>,
    publisher: Arc<Publisher>,
    events: Arc<EventBoard>,
    fusions: Arc<FusionSessions>,
    showcase_ratio: f64,
}

impl AppState {
    pub fn build(config: &AppConfig) -> Result<Self, StudioError> {
        let http = ApiClient::build_http(config.http_timeout)?;

        let session = Arc::new(SessionIdentity::new(
            config.auth_url.clone(),
            config.auth_anon_key.clone(),
            http.clone(),
        ));
        let api = Arc::new(ApiClient::new(
            config.api_base_url.clone(),
            http.clone(),
            session.clone(),
        ));
        let storage: Arc<dyn ObjectStorage> = Arc::new(PresignedStorage::new(
            http,
            config.api_base_url.clone(),
            config.public_asset_base_url.clone(),
        ));

        let composer = Arc::new(FeedComposer::new(api.clone()));
        let studio = Arc::new(StudioContext::new(
            composer,
            FeedSettings::studio(config.studio_ratio),
        ));
        let fusions = Arc::new(FusionSessions::new(
            Arc::new(HttpFusionBackend::new(api.clone(), storage.clone())),
            storage,
            session.clone(),
            config.reveal_delay,
            config.locale,
            config.fusion_session_ttl,
        ));

        Ok(Self {
            likes: Arc::new(LikeTracker::new(api.clone())),
            publisher: Arc::new(Publisher::new(api.clone())),
            events: Arc::new(EventBoard::new(api.clone())),
            api,
            session,
            studio,
            fusions,
            showcase_ratio: config.showcase_ratio,
        })
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting atelier-core...");

    let config = AppConfig::from_env()?;
    let app_state = AppState::build(&config)?;

    // Warm the studio feed and its first images; startup goes on whatever happens.
    let feed = app_state.studio.preload().await;
    let urls: Vec<String> = feed
        .items
        .iter()
        .take(STARTUP_PREFETCH_COUNT)
        .map(|item| item.thumbnail_url.clone().unwrap_or_else(|| item.image_url.clone()))
        .collect();
    let outcomes = prefetch_all(app_state.api.http(), &urls, config.prefetch_timeout).await;
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, PrefetchOutcome::Completed { .. }))
        .count();
    info!(
        "Studio feed preloaded: {} items, {}/{} images prefetched",
        feed.items.len(),
        completed,
        outcomes.len()
    );

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await?;

    Ok(())
}
