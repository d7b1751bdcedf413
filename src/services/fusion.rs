// src/services/fusion.rs
use crate::errors::{Locale, StudioError};
use crate::models::*;
use crate::services::fusion_api::FusionBackend;
use crate::services::identity::{IdentityProvider, UserSession};
use crate::services::image_processor::{AnalysisPayload, ImageProcessor, content_type_for};
use crate::services::spec_merge::merge_specs;
use crate::services::storage::{ObjectStorage, new_object_key};
use bytes::Bytes;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct PipelineState {
    stage: FusionStage,
    image_a: Option<FusionImage>,
    image_b: Option<FusionImage>,
    fusion_spec: Option<FusionSpec>,
    design: Option<GeneratedDesign>,
    generation_id: Option<String>,
    error: Option<String>,
    // Bumped by every reset so late results of an abandoned attempt are dropped.
    epoch: u64,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            stage: FusionStage::Upload,
            image_a: None,
            image_b: None,
            fusion_spec: None,
            design: None,
            generation_id: None,
            error: None,
            epoch: 0,
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// Resizing and re-encoding a large image would stall the async worker.
async fn prepare_blocking(data: Bytes) -> Result<AnalysisPayload, StudioError> {
    tokio::task::spawn_blocking(move || ImageProcessor::new().prepare_for_analysis(&data))
        .await
        .map_err(|e| StudioError::ImageProcessing(format!("Image preparation aborted: {}", e)))?
}

/// Two-image fusion state machine for one screen visit.
pub struct FusionPipeline {
    backend: Arc<dyn FusionBackend>,
    storage: Arc<dyn ObjectStorage>,
    identity: Arc<dyn IdentityProvider>,
    processor: ImageProcessor,
    reveal_delay: Duration,
    locale: Locale,
    state: Mutex<PipelineState>,
    busy: AtomicBool,
}

impl FusionPipeline {
    pub fn new(
        backend: Arc<dyn FusionBackend>,
        storage: Arc<dyn ObjectStorage>,
        identity: Arc<dyn IdentityProvider>,
        reveal_delay: Duration,
        locale: Locale,
    ) -> Self {
        Self {
            backend,
            storage,
            identity,
            processor: ImageProcessor::new(),
            reveal_delay,
            locale,
            state: Mutex::new(PipelineState::default()),
            busy: AtomicBool::new(false),
        }
    }

    fn state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    fn begin(&self, action: &str) -> Result<BusyGuard<'_>, StudioError> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| BusyGuard(&self.busy))
            .map_err(|_| StudioError::AlreadyProcessing(action.to_string()))
    }

    async fn require_user(&self) -> Result<UserSession, StudioError> {
        self.identity.current_user().await.ok_or(StudioError::AuthRequired)
    }

    /// Applies `f` unless the attempt that started at `epoch` was abandoned.
    fn settle<F: FnOnce(&mut PipelineState)>(&self, epoch: u64, f: F) -> bool {
        let mut state = self.state();
        if state.epoch != epoch {
            info!("Discarding result of abandoned fusion attempt");
            return false;
        }
        f(&mut state);
        true
    }

    fn fail(&self, epoch: u64, stage: FusionStage, e: &StudioError) {
        error!("Fusion step failed, back to {:?}: {}", stage, e);
        let message = e.user_message(self.locale).to_string();
        self.settle(epoch, |state| {
            state.stage = stage;
            state.error = Some(message);
        });
    }

    pub fn snapshot(&self) -> FusionSnapshot {
        let state = self.state();
        FusionSnapshot {
            stage: state.stage,
            image_a: state.image_a.as_ref().map(SelectedImage::from),
            image_b: state.image_b.as_ref().map(SelectedImage::from),
            fusion_spec: state.fusion_spec.clone(),
            generated_image_url: state.design.as_ref().map(|d| d.image_url.clone()),
            generation_id: state.generation_id.clone(),
            views: state.design.as_ref().and_then(|d| d.views.clone()),
            pending_persist: state.design.is_some() && state.generation_id.is_none(),
            error: state.error.clone(),
        }
    }

    pub fn select_image(&self, slot: ImageSlot, image: FusionImage) -> Result<FusionSnapshot, StudioError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(StudioError::AlreadyProcessing("select_image".to_string()));
        }
        self.processor.validate_image(&image.data)?;
        {
            let mut state = self.state();
            if state.stage != FusionStage::Upload {
                return Err(StudioError::InvalidStage(format!(
                    "Images can only be selected in UPLOAD, not {:?}",
                    state.stage
                )));
            }
            match slot {
                ImageSlot::A => state.image_a = Some(image),
                ImageSlot::B => state.image_b = Some(image),
            }
            state.error = None;
        }
        Ok(self.snapshot())
    }

    /// UPLOAD → ANALYZING → PREVIEW. Remote failures land back in UPLOAD with
    /// an error message and the selections intact.
    pub async fn fuse(&self) -> Result<FusionSnapshot, StudioError> {
        let _guard = self.begin("fuse")?;

        let (image_a, image_b) = {
            let state = self.state();
            if state.stage != FusionStage::Upload {
                return Err(StudioError::InvalidStage(format!(
                    "Cannot fuse from {:?}",
                    state.stage
                )));
            }
            match (&state.image_a, &state.image_b) {
                (Some(a), Some(b)) => (a.clone(), b.clone()),
                _ => return Err(StudioError::Validation("Two images are required".to_string())),
            }
        };
        let user = self.require_user().await?;

        let epoch = {
            let mut state = self.state();
            state.stage = FusionStage::Analyzing;
            state.error = None;
            state.epoch
        };
        info!("Fusing {} and {}", image_a.filename, image_b.filename);

        match self.analyze_pair(&image_a, &image_b, &user.user_id).await {
            Ok(spec) => {
                self.settle(epoch, |state| {
                    state.stage = FusionStage::Preview;
                    state.fusion_spec = Some(spec);
                });
            }
            Err(e) => self.fail(epoch, FusionStage::Upload, &e),
        }
        Ok(self.snapshot())
    }

    async fn analyze_pair(
        &self,
        image_a: &FusionImage,
        image_b: &FusionImage,
        user_id: &str,
    ) -> Result<FusionSpec, StudioError> {
        let (uploaded_a, uploaded_b) = futures_util::join!(
            self.upload_source(image_a, user_id),
            self.upload_source(image_b, user_id),
        );
        uploaded_a?;
        uploaded_b?;

        let (payload_a, payload_b) = futures_util::join!(
            prepare_blocking(image_a.data.clone()),
            prepare_blocking(image_b.data.clone()),
        );
        let (payload_a, payload_b) = (payload_a?, payload_b?);

        let (spec_a, spec_b) = futures_util::join!(
            self.backend.analyze(&payload_a),
            self.backend.analyze(&payload_b),
        );
        merge_specs(&spec_a?, &spec_b?)
    }

    async fn upload_source(&self, image: &FusionImage, user_id: &str) -> Result<String, StudioError> {
        let (extension, _) = content_type_for(&image.filename);
        let key = new_object_key("fusion", Some(user_id), &extension, None);
        self.storage
            .upload(image.data.clone(), &key, &image.content_type)
            .await
    }

    /// PREVIEW → GENERATING → REVEALING. Generation failure returns to PREVIEW
    /// with the spec untouched; persistence failure also keeps the design.
    pub async fn generate(self: &Arc<Self>) -> Result<FusionSnapshot, StudioError> {
        let _guard = self.begin("generate")?;

        let spec = {
            let state = self.state();
            match (&state.stage, &state.fusion_spec) {
                (FusionStage::Preview, Some(spec)) => spec.clone(),
                _ => {
                    return Err(StudioError::InvalidStage(format!(
                        "Cannot generate from {:?}",
                        state.stage
                    )));
                }
            }
        };
        let user = self.require_user().await?;

        let epoch = {
            let mut state = self.state();
            state.stage = FusionStage::Generating;
            state.design = None;
            state.generation_id = None;
            state.error = None;
            state.epoch
        };

        let design = match self.backend.generate(&spec, &user.user_id).await {
            Ok(design) => design,
            Err(e) => {
                self.fail(epoch, FusionStage::Preview, &e);
                return Ok(self.snapshot());
            }
        };
        info!("Generated design {}", design.image_url);

        let stored = self.settle(epoch, |state| state.design = Some(design.clone()));
        if stored {
            self.persist(epoch, &design, &user.user_id).await;
        }
        Ok(self.snapshot())
    }

    /// Saves a design whose persistence failed, without regenerating it.
    pub async fn retry_persist(self: &Arc<Self>) -> Result<FusionSnapshot, StudioError> {
        let _guard = self.begin("persist")?;

        let (design, epoch) = {
            let state = self.state();
            match (&state.stage, &state.design, &state.generation_id) {
                (FusionStage::Preview, Some(design), None) => (design.clone(), state.epoch),
                _ => {
                    return Err(StudioError::InvalidStage(
                        "No generated design is waiting to be saved".to_string(),
                    ));
                }
            }
        };
        let user = self.require_user().await?;

        self.settle(epoch, |state| {
            state.stage = FusionStage::Generating;
            state.error = None;
        });
        self.persist(epoch, &design, &user.user_id).await;
        Ok(self.snapshot())
    }

    async fn persist(self: &Arc<Self>, epoch: u64, design: &GeneratedDesign, user_id: &str) {
        match self.backend.persist(design, user_id).await {
            Ok(generation_id) => {
                let revealed = self.settle(epoch, |state| {
                    state.generation_id = Some(generation_id);
                    state.stage = FusionStage::Revealing;
                });
                if revealed {
                    self.schedule_reveal(epoch);
                }
            }
            Err(e) => self.fail(epoch, FusionStage::Preview, &e),
        }
    }

    fn schedule_reveal(self: &Arc<Self>, epoch: u64) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(pipeline.reveal_delay).await;
            pipeline.settle(epoch, |state| {
                if state.stage == FusionStage::Revealing {
                    state.stage = FusionStage::Done;
                }
            });
        });
    }

    /// REVEALING → DONE without waiting for the timer.
    pub fn complete_reveal(&self) -> Result<FusionSnapshot, StudioError> {
        {
            let mut state = self.state();
            match state.stage {
                FusionStage::Revealing => state.stage = FusionStage::Done,
                FusionStage::Done => {}
                other => {
                    return Err(StudioError::InvalidStage(format!(
                        "Nothing to reveal in {:?}",
                        other
                    )));
                }
            }
        }
        Ok(self.snapshot())
    }

    /// Clears spec, result and error; selected images stay.
    pub fn back_to_upload(&self) -> FusionSnapshot {
        {
            let mut state = self.state();
            state.stage = FusionStage::Upload;
            state.fusion_spec = None;
            state.design = None;
            state.generation_id = None;
            state.error = None;
            state.epoch += 1;
        }
        self.snapshot()
    }

    /// Starts a new fusion on the same screen.
    pub fn reset(&self) -> FusionSnapshot {
        {
            let mut state = self.state();
            let epoch = state.epoch + 1;
            *state = PipelineState {
                epoch,
                ..PipelineState::default()
            };
        }
        self.snapshot()
    }

    pub async fn poll_variants(&self) -> Result<VariantStatus, StudioError> {
        let generation_id = self.state().generation_id.clone().ok_or_else(|| {
            StudioError::InvalidStage("No saved generation to poll".to_string())
        })?;
        Ok(self.backend.poll_variants(&generation_id).await)
    }
}

struct SessionEntry {
    pipeline: Arc<FusionPipeline>,
    last_touched: Instant,
}

/// One pipeline per screen visit, keyed by a session id. Sessions left idle
/// longer than `idle_ttl` are dropped on the next `open` or `get`.
pub struct FusionSessions {
    backend: Arc<dyn FusionBackend>,
    storage: Arc<dyn ObjectStorage>,
    identity: Arc<dyn IdentityProvider>,
    reveal_delay: Duration,
    locale: Locale,
    idle_ttl: Duration,
    pipelines: Mutex<HashMap<Uuid, SessionEntry>>,
}

impl FusionSessions {
    pub fn new(
        backend: Arc<dyn FusionBackend>,
        storage: Arc<dyn ObjectStorage>,
        identity: Arc<dyn IdentityProvider>,
        reveal_delay: Duration,
        locale: Locale,
        idle_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            storage,
            identity,
            reveal_delay,
            locale,
            idle_ttl,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    fn pipelines(&self) -> MutexGuard<'_, HashMap<Uuid, SessionEntry>> {
        self.pipelines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn open(&self) -> (Uuid, Arc<FusionPipeline>) {
        let now = Instant::now();
        self.evict_idle(now);

        let id = Uuid::new_v4();
        let pipeline = Arc::new(FusionPipeline::new(
            self.backend.clone(),
            self.storage.clone(),
            self.identity.clone(),
            self.reveal_delay,
            self.locale,
        ));
        self.pipelines().insert(
            id,
            SessionEntry {
                pipeline: pipeline.clone(),
                last_touched: now,
            },
        );
        info!("Opened fusion session {}", id);
        (id, pipeline)
    }

    pub fn get(&self, id: &Uuid) -> Result<Arc<FusionPipeline>, StudioError> {
        let now = Instant::now();
        self.evict_idle(now);

        let mut pipelines = self.pipelines();
        let entry = pipelines
            .get_mut(id)
            .ok_or_else(|| StudioError::NotFound(format!("Fusion session {}", id)))?;
        entry.last_touched = now;
        Ok(entry.pipeline.clone())
    }

    pub fn close(&self, id: &Uuid) -> Result<(), StudioError> {
        match self.pipelines().remove(id) {
            Some(_) => Ok(()),
            None => {
                warn!("Closing unknown fusion session {}", id);
                Err(StudioError::NotFound(format!("Fusion session {}", id)))
            }
        }
    }

    /// Drops sessions idle past the TTL as of `now`. A pipeline with a step
    /// still running is kept until that step settles.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut pipelines = self.pipelines();
        let before = pipelines.len();
        pipelines.retain(|id, entry| {
            let idle = now.saturating_duration_since(entry.last_touched);
            let keep = idle <= self.idle_ttl || entry.pipeline.is_busy();
            if !keep {
                info!("Evicting fusion session {} after {:?} idle", id, idle);
            }
            keep
        });
        before - pipelines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::image_processor::sample_png;
    use crate::test_support::{FakeIdentity, MemoryStorage};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeBackend {
        specs: Mutex<HashMap<String, Value>>,
        analyze_calls: AtomicUsize,
        generate_calls: AtomicUsize,
        persist_calls: AtomicUsize,
        analyze_fails: AtomicBool,
        generate_fails: AtomicBool,
        persist_fails: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl FusionBackend for FakeBackend {
        async fn analyze(&self, payload: &AnalysisPayload) -> Result<Value, StudioError> {
            self.analyze_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.analyze_fails.load(Ordering::SeqCst) {
                return Err(StudioError::Analysis("model overloaded".into()));
            }
            Ok(self
                .specs
                .lock()
                .unwrap()
                .get(&payload.base64)
                .cloned()
                .unwrap_or_else(|| json!({})))
        }

        async fn generate(&self, spec: &FusionSpec, _user_id: &str) -> Result<GeneratedDesign, StudioError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            if self.generate_fails.load(Ordering::SeqCst) {
                return Err(StudioError::Generation("no image data".into()));
            }
            Ok(GeneratedDesign {
                image_url: "https://assets.test/fusion/front.jpg".into(),
                image_key: "fusion/front.jpg".into(),
                mime_type: "image/jpeg".into(),
                prompt: spec.silhouette.clone(),
                views: Some(ViewBundle::Triptych(TriptychUrls {
                    front: "https://assets.test/fusion/front.jpg".into(),
                    side: "https://assets.test/fusion/side.jpg".into(),
                    back: "https://assets.test/fusion/back.jpg".into(),
                })),
                metadata: json!({}),
            })
        }

        async fn persist(&self, _design: &GeneratedDesign, _user_id: &str) -> Result<String, StudioError> {
            self.persist_calls.fetch_add(1, Ordering::SeqCst);
            if self.persist_fails.load(Ordering::SeqCst) {
                return Err(StudioError::Persistence("db down".into()));
            }
            Ok("gen-1".into())
        }

        async fn poll_variants(&self, _generation_id: &str) -> VariantStatus {
            VariantStatus {
                side: Some("side.png".into()),
                back: None,
            }
        }
    }

    fn image(name: &str, width: u32, height: u32) -> FusionImage {
        FusionImage {
            filename: name.into(),
            content_type: "image/png".into(),
            data: Bytes::from(sample_png(width, height)),
        }
    }

    fn spec_a() -> Value {
        json!({
            "palette": [{"name": "Red", "hex": "#F00", "weight": 1}],
            "silhouette": "boxy",
            "materials": ["wool"],
            "motif_abstractions": [{"source_cue": "stripe", "operation": "repeat", "placement": ["hem"], "style": "graphic", "scale": "small", "notes": ""}],
            "details": ["seam"]
        })
    }

    fn spec_b() -> Value {
        json!({
            "palette": [{"name": "Blue", "hex": "#00F", "weight": 1}],
            "silhouette": "",
            "materials": ["wool", "silk"],
            "motif_abstractions": [{"source_cue": "dot", "operation": "scatter", "placement": ["back"], "style": "soft", "scale": "large", "notes": ""}],
            "details": ["zipper"]
        })
    }

    struct Harness {
        pipeline: Arc<FusionPipeline>,
        backend: Arc<FakeBackend>,
        storage: Arc<MemoryStorage>,
        identity: Arc<FakeIdentity>,
    }

    fn harness_with(backend: FakeBackend, identity: FakeIdentity, reveal_delay: Duration) -> Harness {
        let processor = ImageProcessor::new();
        let a = image("a.png", 8, 4);
        let b = image("b.png", 4, 8);
        {
            let mut specs = backend.specs.lock().unwrap();
            specs.insert(processor.prepare_for_analysis(&a.data).unwrap().base64, spec_a());
            specs.insert(processor.prepare_for_analysis(&b.data).unwrap().base64, spec_b());
        }
        let backend = Arc::new(backend);
        let storage = Arc::new(MemoryStorage::default());
        let identity = Arc::new(identity);
        let pipeline = Arc::new(FusionPipeline::new(
            backend.clone(),
            storage.clone(),
            identity.clone(),
            reveal_delay,
            Locale::En,
        ));
        pipeline.select_image(ImageSlot::A, a).unwrap();
        pipeline.select_image(ImageSlot::B, b).unwrap();
        Harness {
            pipeline,
            backend,
            storage,
            identity,
        }
    }

    fn harness() -> Harness {
        harness_with(
            FakeBackend::default(),
            FakeIdentity::signed_in("u1", "t"),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn happy_path_reaches_preview_with_merged_spec() {
        let h = harness();
        let snapshot = h.pipeline.fuse().await.unwrap();

        assert_eq!(snapshot.stage, FusionStage::Preview);
        assert_eq!(snapshot.error, None);
        assert_eq!(h.storage.uploads().len(), 2);
        assert_eq!(h.backend.analyze_calls.load(Ordering::SeqCst), 2);

        let spec = snapshot.fusion_spec.unwrap();
        assert_eq!(spec.silhouette, "boxy");
        assert_eq!(spec.palette.len(), 2);
        assert!(spec.palette.iter().all(|c| (c.weight - 0.5).abs() < 1e-9));
        let mut materials = spec.materials.clone();
        materials.sort();
        assert_eq!(materials, vec!["silk", "wool"]);
        let mut details = spec.details.clone();
        details.sort();
        assert_eq!(details, vec!["seam", "zipper"]);
    }

    #[tokio::test]
    async fn fuse_requires_sign_in_before_any_network_call() {
        let h = harness_with(
            FakeBackend::default(),
            FakeIdentity::anonymous(),
            Duration::from_secs(60),
        );
        let result = h.pipeline.fuse().await;

        assert!(matches!(result, Err(StudioError::AuthRequired)));
        assert!(h.storage.uploads().is_empty());
        assert_eq!(h.backend.analyze_calls.load(Ordering::SeqCst), 0);
        let snapshot = h.pipeline.snapshot();
        assert_eq!(snapshot.stage, FusionStage::Upload);
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn fuse_needs_both_images() {
        let pipeline = FusionPipeline::new(
            Arc::new(FakeBackend::default()),
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeIdentity::signed_in("u1", "t")),
            Duration::from_secs(1),
            Locale::En,
        );
        pipeline.select_image(ImageSlot::A, image("a.png", 2, 2)).unwrap();
        assert!(matches!(pipeline.fuse().await, Err(StudioError::Validation(_))));
    }

    #[test]
    fn undecodable_selection_is_rejected() {
        let pipeline = FusionPipeline::new(
            Arc::new(FakeBackend::default()),
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeIdentity::anonymous()),
            Duration::from_secs(1),
            Locale::En,
        );
        let broken = FusionImage {
            filename: "x.png".into(),
            content_type: "image/png".into(),
            data: Bytes::from_static(b"nope"),
        };
        assert!(matches!(
            pipeline.select_image(ImageSlot::A, broken),
            Err(StudioError::ImageProcessing(_))
        ));
        assert!(pipeline.snapshot().image_a.is_none());
    }

    #[tokio::test]
    async fn upload_failure_reverts_to_upload_keeping_images() {
        let h = harness();
        h.storage.fail_uploads(true);
        let snapshot = h.pipeline.fuse().await.unwrap();

        assert_eq!(snapshot.stage, FusionStage::Upload);
        assert_eq!(snapshot.error.as_deref(), Some("Failed to upload the image"));
        assert!(snapshot.image_a.is_some() && snapshot.image_b.is_some());
        assert_eq!(h.backend.analyze_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn analysis_failure_reverts_to_upload() {
        let h = harness();
        h.backend.analyze_fails.store(true, Ordering::SeqCst);
        let snapshot = h.pipeline.fuse().await.unwrap();

        assert_eq!(snapshot.stage, FusionStage::Upload);
        assert!(snapshot.fusion_spec.is_none());
        assert_eq!(h.backend.analyze_calls.load(Ordering::SeqCst), 2);
        assert_eq!(snapshot.error.as_deref(), Some("Failed to analyze the images"));
    }

    #[tokio::test]
    async fn generation_failure_reverts_to_preview_and_keeps_spec() {
        let h = harness();
        let before = h.pipeline.fuse().await.unwrap().fusion_spec;
        h.backend.generate_fails.store(true, Ordering::SeqCst);

        let snapshot = h.pipeline.generate().await.unwrap();
        assert_eq!(snapshot.stage, FusionStage::Preview);
        assert_eq!(snapshot.fusion_spec, before);
        assert!(snapshot.error.is_some());
        assert!(snapshot.generated_image_url.is_none());
        assert_eq!(h.backend.persist_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn generation_reveals_then_finishes_after_delay() {
        let h = harness_with(
            FakeBackend::default(),
            FakeIdentity::signed_in("u1", "t"),
            Duration::from_millis(20),
        );
        h.pipeline.fuse().await.unwrap();
        let snapshot = h.pipeline.generate().await.unwrap();

        assert_eq!(snapshot.stage, FusionStage::Revealing);
        assert_eq!(snapshot.generation_id.as_deref(), Some("gen-1"));
        assert!(matches!(snapshot.views, Some(ViewBundle::Triptych(_))));
        assert!(!snapshot.pending_persist);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.pipeline.snapshot().stage, FusionStage::Done);
    }

    #[tokio::test]
    async fn back_to_upload_during_reveal_is_not_overwritten() {
        let h = harness_with(
            FakeBackend::default(),
            FakeIdentity::signed_in("u1", "t"),
            Duration::from_millis(20),
        );
        h.pipeline.fuse().await.unwrap();
        h.pipeline.generate().await.unwrap();

        let snapshot = h.pipeline.back_to_upload();
        assert_eq!(snapshot.stage, FusionStage::Upload);
        assert!(snapshot.fusion_spec.is_none());
        assert!(snapshot.generated_image_url.is_none());
        assert!(snapshot.image_a.is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.pipeline.snapshot().stage, FusionStage::Upload);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_design_for_retry() {
        let h = harness();
        h.pipeline.fuse().await.unwrap();
        h.backend.persist_fails.store(true, Ordering::SeqCst);

        let snapshot = h.pipeline.generate().await.unwrap();
        assert_eq!(snapshot.stage, FusionStage::Preview);
        assert!(snapshot.pending_persist);
        assert!(snapshot.generated_image_url.is_some());
        assert_eq!(snapshot.error.as_deref(), Some("Failed to save the design"));

        h.backend.persist_fails.store(false, Ordering::SeqCst);
        let snapshot = h.pipeline.retry_persist().await.unwrap();
        assert_eq!(snapshot.stage, FusionStage::Revealing);
        assert_eq!(snapshot.generation_id.as_deref(), Some("gen-1"));
        assert_eq!(h.backend.generate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.backend.persist_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_persist_without_pending_design_is_rejected() {
        let h = harness();
        assert!(matches!(
            h.pipeline.retry_persist().await,
            Err(StudioError::InvalidStage(_))
        ));
    }

    #[tokio::test]
    async fn second_fuse_while_analyzing_is_a_no_op() {
        let gate = Arc::new(Notify::new());
        let h = harness_with(
            FakeBackend {
                gate: Some(gate.clone()),
                ..FakeBackend::default()
            },
            FakeIdentity::signed_in("u1", "t"),
            Duration::from_secs(60),
        );

        let first = {
            let pipeline = h.pipeline.clone();
            tokio::spawn(async move { pipeline.fuse().await })
        };
        while h.backend.analyze_calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.pipeline.snapshot().stage, FusionStage::Analyzing);

        let second = h.pipeline.fuse().await;
        assert!(matches!(second, Err(StudioError::AlreadyProcessing(_))));
        assert_eq!(h.pipeline.snapshot().stage, FusionStage::Analyzing);
        assert_eq!(h.storage.uploads().len(), 2);

        gate.notify_waiters();
        let snapshot = first.await.unwrap().unwrap();
        assert_eq!(snapshot.stage, FusionStage::Preview);
        assert_eq!(h.backend.analyze_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn generate_requires_sign_in() {
        let h = harness();
        h.pipeline.fuse().await.unwrap();
        h.identity.sign_out().await;

        assert!(matches!(h.pipeline.generate().await, Err(StudioError::AuthRequired)));
        assert_eq!(h.backend.generate_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.pipeline.snapshot().stage, FusionStage::Preview);
    }

    #[tokio::test]
    async fn generate_outside_preview_is_rejected() {
        let h = harness();
        assert!(matches!(
            h.pipeline.generate().await,
            Err(StudioError::InvalidStage(_))
        ));
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let h = harness();
        h.pipeline.fuse().await.unwrap();
        let snapshot = h.pipeline.reset();
        assert_eq!(snapshot.stage, FusionStage::Upload);
        assert!(snapshot.image_a.is_none());
        assert!(snapshot.fusion_spec.is_none());
    }

    #[tokio::test]
    async fn complete_reveal_and_polling() {
        let h = harness();
        assert!(matches!(
            h.pipeline.poll_variants().await,
            Err(StudioError::InvalidStage(_))
        ));
        h.pipeline.fuse().await.unwrap();
        h.pipeline.generate().await.unwrap();

        assert_eq!(h.pipeline.complete_reveal().unwrap().stage, FusionStage::Done);
        let status = h.pipeline.poll_variants().await.unwrap();
        assert_eq!(status.side.as_deref(), Some("side.png"));
    }

    fn sessions() -> FusionSessions {
        FusionSessions::new(
            Arc::new(FakeBackend::default()),
            Arc::new(MemoryStorage::default()),
            Arc::new(FakeIdentity::anonymous()),
            Duration::from_secs(1),
            Locale::Ja,
            Duration::from_secs(60),
        )
    }

    #[test]
    fn sessions_open_get_and_close() {
        let sessions = sessions();
        let (id, pipeline) = sessions.open();
        assert!(Arc::ptr_eq(&pipeline, &sessions.get(&id).unwrap()));
        let (other, _) = sessions.open();
        assert_ne!(id, other);

        sessions.close(&id).unwrap();
        assert!(matches!(sessions.get(&id), Err(StudioError::NotFound(_))));
        assert!(sessions.close(&id).is_err());
    }

    #[test]
    fn idle_sessions_are_evicted_after_ttl() {
        let sessions = sessions();
        let (id, _) = sessions.open();

        assert_eq!(sessions.evict_idle(Instant::now() + Duration::from_secs(30)), 0);
        assert!(sessions.get(&id).is_ok());

        assert_eq!(sessions.evict_idle(Instant::now() + Duration::from_secs(61)), 1);
        assert!(matches!(sessions.get(&id), Err(StudioError::NotFound(_))));
    }

    #[test]
    fn busy_sessions_survive_eviction() {
        let sessions = sessions();
        let (id, pipeline) = sessions.open();
        pipeline.busy.store(true, Ordering::SeqCst);

        assert_eq!(sessions.evict_idle(Instant::now() + Duration::from_secs(120)), 0);
        pipeline.busy.store(false, Ordering::SeqCst);
        assert_eq!(sessions.evict_idle(Instant::now() + Duration::from_secs(120)), 1);
        assert!(sessions.get(&id).is_err());
    }
}
