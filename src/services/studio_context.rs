// src/services/studio_context.rs
use crate::services::feed::{Feed, FeedComposer, FeedSettings};
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

struct Slot {
    feed: Arc<Feed>,
    // Generation of the refresh that produced `feed`; 0 before the first load.
    generation: u64,
}

/// The studio feed preloaded at startup and shared with every request.
pub struct StudioContext {
    composer: Arc<FeedComposer>,
    settings: FeedSettings,
    slot: RwLock<Slot>,
    started: AtomicU64,
}

impl StudioContext {
    pub fn new(composer: Arc<FeedComposer>, settings: FeedSettings) -> Self {
        Self {
            composer,
            settings,
            slot: RwLock::new(Slot {
                feed: Arc::new(Feed::empty()),
                generation: 0,
            }),
            started: AtomicU64::new(0),
        }
    }

    pub fn composer(&self) -> &Arc<FeedComposer> {
        &self.composer
    }

    pub fn current(&self) -> Arc<Feed> {
        match self.slot.read() {
            Ok(slot) => slot.feed.clone(),
            Err(poisoned) => poisoned.into_inner().feed.clone(),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.generation() > 0
    }

    fn generation(&self) -> u64 {
        match self.slot.read() {
            Ok(slot) => slot.generation,
            Err(poisoned) => poisoned.into_inner().generation,
        }
    }

    /// Loads the feed once; later calls return what is already there.
    pub async fn preload(&self) -> Arc<Feed> {
        if self.is_loaded() {
            return self.current();
        }
        self.refresh().await
    }

    /// Recomposes and replaces the feed. When refreshes overlap, the one
    /// started last wins and older results are dropped.
    pub async fn refresh(&self) -> Arc<Feed> {
        let generation = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        let feed = Arc::new(self.composer.compose(&self.settings).await);

        let mut slot = match self.slot.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        if generation > slot.generation {
            info!(
                "Studio feed replaced: {} items (refresh #{})",
                feed.items.len(),
                generation
            );
            slot.feed = feed;
            slot.generation = generation;
        } else {
            debug!("Dropping superseded studio refresh #{}", generation);
        }
        slot.feed.clone()
    }
}
