// src/services/likes.rs
use crate::errors::StudioError;
use crate::models::LikeState;
use crate::services::api_client::ApiClient;
use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[async_trait]
pub trait LikeService: Send + Sync {
    async fn set_like(&self, item_id: &str, liked: bool) -> Result<(), StudioError>;
}

#[async_trait]
impl LikeService for ApiClient {
    async fn set_like(&self, item_id: &str, liked: bool) -> Result<(), StudioError> {
        let _: Value = self
            .post("/api/likes", &json!({ "itemId": item_id, "liked": liked }))
            .await?;
        Ok(())
    }
}

#[derive(Default)]
struct LikeBook {
    liked: HashSet<String>,
    counts: HashMap<String, u64>,
    processing: HashSet<String>,
}

impl LikeBook {
    fn state(&self, item_id: &str, fallback_count: u64) -> LikeState {
        LikeState {
            item_id: item_id.to_string(),
            liked: self.liked.contains(item_id),
            likes: self.counts.get(item_id).copied().unwrap_or(fallback_count),
        }
    }

    fn apply(&mut self, state: &LikeState) {
        if state.liked {
            self.liked.insert(state.item_id.clone());
        } else {
            self.liked.remove(&state.item_id);
        }
        self.counts.insert(state.item_id.clone(), state.likes);
    }
}

struct Processing<'a> {
    tracker: &'a LikeTracker,
    item_id: String,
}

impl Drop for Processing<'_> {
    fn drop(&mut self) {
        self.tracker.book().processing.remove(&self.item_id);
    }
}

/// Optimistic like toggles with rollback, one in flight per item.
pub struct LikeTracker {
    service: Arc<dyn LikeService>,
    book: Mutex<LikeBook>,
}

impl LikeTracker {
    pub fn new(service: Arc<dyn LikeService>) -> Self {
        Self {
            service,
            book: Mutex::new(LikeBook::default()),
        }
    }

    fn book(&self) -> MutexGuard<'_, LikeBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `fallback_count` is the counter the feed showed before this tracker saw the item.
    pub fn state(&self, item_id: &str, fallback_count: u64) -> LikeState {
        self.book().state(item_id, fallback_count)
    }

    pub fn is_processing(&self, item_id: &str) -> bool {
        self.book().processing.contains(item_id)
    }

    /// Flips the like locally, then confirms remotely. A failed call restores
    /// the value captured before the flip.
    pub async fn toggle(&self, item_id: &str, fallback_count: u64) -> Result<LikeState, StudioError> {
        let (original, tentative, _processing) = {
            let mut book = self.book();
            if !book.processing.insert(item_id.to_string()) {
                debug!("Like toggle for {} already in flight", item_id);
                return Err(StudioError::AlreadyProcessing(format!("like {}", item_id)));
            }
            let original = book.state(item_id, fallback_count);
            let tentative = LikeState {
                item_id: item_id.to_string(),
                liked: !original.liked,
                likes: if original.liked {
                    original.likes.saturating_sub(1)
                } else {
                    original.likes + 1
                },
            };
            book.apply(&tentative);
            let processing = Processing {
                tracker: self,
                item_id: item_id.to_string(),
            };
            (original, tentative, processing)
        };

        match self.service.set_like(item_id, tentative.liked).await {
            Ok(()) => Ok(tentative),
            Err(e) => {
                warn!("Like toggle for {} failed, rolling back: {}", item_id, e);
                self.book().apply(&original);
                Err(e)
            }
        }
    }
}
