// src/services/mod.rs
pub mod api_client;
pub mod events;
pub mod feed;
pub mod fusion;
pub mod fusion_api;
pub mod identity;
pub mod image_processor;
pub mod likes;
pub mod prefetch;
pub mod publishing;
pub mod spec_merge;
pub mod storage;
pub mod studio_context;

pub use api_client::ApiClient;
pub use events::EventBoard;
pub use feed::{FeedComposer, FeedSettings};
pub use fusion::FusionSessions;
pub use fusion_api::HttpFusionBackend;
pub use identity::SessionIdentity;
pub use likes::LikeTracker;
pub use publishing::Publisher;
pub use storage::{ObjectStorage, PresignedStorage};
pub use studio_context::StudioContext;
