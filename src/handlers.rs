// src/handlers.rs
use crate::services::feed::{FeedOrdering, FeedSettings, paginate, search};
use crate::services::identity::{IdentityProvider, UserSession};
use crate::services::image_processor::content_type_for;
use crate::{AppState, errors::StudioError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use futures_util::TryStreamExt;
use serde::Deserialize;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: usize = 20;
const DEFAULT_SIMILAR_LIMIT: usize = 6;

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ShowcaseQuery {
    pub q: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub ordering: Option<FeedOrdering>,
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LikeRequest {
    /// Counter currently displayed for the item.
    #[serde(default)]
    pub likes: u64,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/feed/studio", web::get().to(studio_feed))
            .route("/feed/studio/refresh", web::post().to(refresh_studio_feed))
            .route("/feed/showcase", web::get().to(showcase_feed))
            .route("/items/{item_id}", web::get().to(get_item))
            .route("/items/{item_id}", web::put().to(update_item))
            .route("/items/{item_id}/edit", web::get().to(get_item_edit))
            .route("/items/{item_id}/similar", web::get().to(similar_items))
            .route("/items/{item_id}/like", web::post().to(toggle_like))
            .route("/publish", web::post().to(publish))
            .route("/publish/metadata", web::post().to(publication_metadata))
            .route("/events", web::get().to(list_events))
            .route("/events/{event_id}", web::get().to(get_event))
            .route("/session", web::put().to(set_session))
            .route("/session", web::delete().to(clear_session))
            .route("/fusion", web::post().to(open_fusion))
            .route("/fusion/{session_id}", web::get().to(fusion_snapshot))
            .route("/fusion/{session_id}", web::delete().to(close_fusion))
            .route(
                "/fusion/{session_id}/images/{slot}",
                web::put().to(select_fusion_image),
            )
            .route("/fusion/{session_id}/fuse", web::post().to(fuse))
            .route("/fusion/{session_id}/generate", web::post().to(generate))
            .route("/fusion/{session_id}/persist", web::post().to(retry_persist))
            .route("/fusion/{session_id}/reveal", web::post().to(complete_reveal))
            .route("/fusion/{session_id}/back", web::post().to(back_to_upload))
            .route("/fusion/{session_id}/reset", web::post().to(reset_fusion))
            .route("/fusion/{session_id}/variants", web::get().to(poll_variants)),
    )
    .route("/health", web::get().to(health_check));
}

pub async fn studio_feed(
    data: web::Data<AppState>,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse, Error> {
    let feed = data.studio.preload().await;
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "items": paginate(&feed.items, offset, limit),
        "state": feed.state,
        "total": feed.items.len(),
        "offset": offset
    })))
}

pub async fn refresh_studio_feed(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let feed = data.studio.refresh().await;
    Ok(HttpResponse::Ok().json(&*feed))
}

pub async fn showcase_feed(
    data: web::Data<AppState>,
    query: web::Query<ShowcaseQuery>,
) -> Result<HttpResponse, Error> {
    let settings = FeedSettings::showcase(data.showcase_ratio)
        .with_ordering(query.ordering.unwrap_or(FeedOrdering::Shuffle));
    let feed = data.studio.composer().compose(&settings).await;

    let matches = search(&feed.items, query.q.as_deref().unwrap_or(""));
    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "items": paginate(&matches, offset, limit),
        "state": feed.state,
        "total": matches.len(),
        "offset": offset
    })))
}

pub async fn get_item(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let item = data.publisher.find_item(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(&item))
}

pub async fn get_item_edit(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let edit = data.publisher.editable_item(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(&edit))
}

pub async fn update_item(
    path: web::Path<String>,
    data: web::Data<AppState>,
    body: web::Json<ItemEdit>,
) -> Result<HttpResponse, Error> {
    let item_id = path.into_inner();
    data.publisher.update_item(&item_id, &body).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "item_id": item_id,
        "updated": true
    })))
}

pub async fn similar_items(
    path: web::Path<String>,
    data: web::Data<AppState>,
    query: web::Query<SimilarQuery>,
) -> Result<HttpResponse, Error> {
    let items = data
        .api
        .similar_items(&path.into_inner(), query.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT))
        .await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "similar_items": items })))
}

pub async fn toggle_like(
    path: web::Path<String>,
    data: web::Data<AppState>,
    body: Option<web::Json<LikeRequest>>,
) -> Result<HttpResponse, Error> {
    let item_id = path.into_inner();
    let displayed = body.map(|b| b.likes).unwrap_or_default();

    match data.likes.toggle(&item_id, displayed).await {
        Ok(state) => Ok(HttpResponse::Ok().json(&state)),
        Err(StudioError::AlreadyProcessing(_)) => {
            Ok(HttpResponse::Accepted().json(data.likes.state(&item_id, displayed)))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn publish(
    data: web::Data<AppState>,
    body: web::Json<PublicationDraft>,
) -> Result<HttpResponse, Error> {
    let receipt = data.publisher.publish(&body).await?;
    Ok(HttpResponse::Ok().json(&receipt))
}

pub async fn publication_metadata(
    data: web::Data<AppState>,
    body: web::Json<MetadataRequest>,
) -> Result<HttpResponse, Error> {
    let metadata = data
        .publisher
        .generate_metadata(&body.image_url, body.fusion_spec.as_ref())
        .await;
    Ok(HttpResponse::Ok().json(&metadata))
}

pub async fn list_events(
    data: web::Data<AppState>,
    query: web::Query<EventQuery>,
) -> Result<HttpResponse, Error> {
    let events = data.events.list(query.q.as_deref().unwrap_or("")).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "events": events,
        "total": events.len()
    })))
}

pub async fn get_event(
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let event = data.events.detail(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(&event))
}

pub async fn set_session(
    data: web::Data<AppState>,
    body: web::Json<UserSession>,
) -> Result<HttpResponse, Error> {
    let session = body.into_inner();
    let user_id = session.user_id.clone();
    data.session.sign_in(session).await;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "user_id": user_id })))
}

pub async fn clear_session(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    data.session.sign_out().await;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn open_fusion(data: web::Data<AppState>) -> Result<HttpResponse, Error> {
    let (session_id, pipeline) = data.fusions.open();
    Ok(HttpResponse::Created().json(serde_json::json!({
        "session_id": session_id,
        "fusion": pipeline.snapshot()
    })))
}

pub async fn fusion_snapshot(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(pipeline.snapshot()))
}

pub async fn close_fusion(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    data.fusions.close(&path.into_inner())?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn select_fusion_image(
    path: web::Path<(Uuid, String)>,
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let (session_id, slot) = path.into_inner();
    let slot = ImageSlot::parse(&slot)
        .ok_or_else(|| StudioError::Validation(format!("Unknown image slot: {}", slot)))?;
    let pipeline = data.fusions.get(&session_id)?;

    let mut field = payload
        .try_next()
        .await?
        .ok_or_else(|| StudioError::Validation("No image provided".to_string()))?;

    let filename = field
        .content_disposition()
        .get_filename()
        .ok_or_else(|| StudioError::Validation("No filename provided".to_string()))?
        .to_string();

    let content_type = field
        .content_type()
        .map(|ct| ct.to_string())
        .filter(|ct| ct.starts_with("image/"))
        .unwrap_or_else(|| content_type_for(&filename).1);

    let mut image_data = Vec::new();
    while let Some(chunk) = field.try_next().await? {
        image_data.extend_from_slice(&chunk);
    }

    let snapshot = pipeline.select_image(
        slot,
        FusionImage {
            filename,
            content_type,
            data: image_data.into(),
        },
    )?;
    Ok(HttpResponse::Ok().json(&snapshot))
}

pub async fn fuse(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    let snapshot = pipeline.fuse().await?;
    Ok(HttpResponse::Ok().json(&snapshot))
}

pub async fn generate(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    let snapshot = pipeline.generate().await?;
    Ok(HttpResponse::Ok().json(&snapshot))
}

pub async fn retry_persist(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    let snapshot = pipeline.retry_persist().await?;
    Ok(HttpResponse::Ok().json(&snapshot))
}

pub async fn complete_reveal(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(pipeline.complete_reveal()?))
}

pub async fn back_to_upload(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(pipeline.back_to_upload()))
}

pub async fn reset_fusion(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(pipeline.reset()))
}

pub async fn poll_variants(
    path: web::Path<Uuid>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let pipeline = data.fusions.get(&path.into_inner())?;
    let status = pipeline.poll_variants().await?;
    Ok(HttpResponse::Ok().json(&status))
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "atelier-core",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
