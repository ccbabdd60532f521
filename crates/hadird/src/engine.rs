use hadir_core::{
    match_detection, EuclideanMatcher, FaceSelection, InferenceError, MatchResult, ModelLoadError, ModelLoader,
    ModelProvider, ReferenceSet, TieBreak,
};
use hadir_hw::{Camera, CameraError, Frame};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Frames with more than this share of near-black pixels are not analyzed.
const DARK_FRAME_PCT: f32 = 0.95;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("models are not loaded")]
    ModelsNotLoaded,
    #[error("camera is not open")]
    CameraClosed,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of one detection tick.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub result: MatchResult,
    /// JPEG data URL of the sampled frame; only taken on a match.
    pub snapshot: Option<String>,
}

/// An opened capture stream.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn capture(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// A camera that can be opened on demand. The stream is closed when dropped.
pub trait CameraDevice: Send + 'static {
    type Stream: FrameSource;
    fn open(&self) -> Result<Self::Stream, CameraError>;
}

#[derive(Debug, Clone)]
pub struct V4lCamera {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl CameraDevice for V4lCamera {
    type Stream = Camera;

    fn open(&self) -> Result<Camera, CameraError> {
        let camera = Camera::open(&self.device, self.width, self.height)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(camera)
    }
}

/// The blocking face work the controller drives: load models, own the
/// camera, sample frames.
pub trait FaceEngine: Clone + Send + Sync + 'static {
    fn load_models(&self, progress: mpsc::UnboundedSender<String>) -> impl Future<Output = Result<(), EngineError>> + Send;
    fn open_camera(&self) -> impl Future<Output = Result<(), EngineError>> + Send;
    /// Fire-and-forget; must be callable from `Drop`.
    fn close_camera(&self);
    fn sample(
        &self,
        references: Arc<ReferenceSet>,
        threshold: f32,
    ) -> impl Future<Output = Result<SampleOutcome, EngineError>> + Send;
}

/// Holds the camera open; closing happens on drop, so every open is paired
/// with exactly one close on all exit paths.
pub struct CameraLease<E: FaceEngine> {
    engine: E,
}

impl<E: FaceEngine> CameraLease<E> {
    pub async fn acquire(engine: E) -> Result<Self, EngineError> {
        engine.open_camera().await?;
        Ok(Self { engine })
    }
}

impl<E: FaceEngine> Drop for CameraLease<E> {
    fn drop(&mut self) {
        self.engine.close_camera();
    }
}

impl<E: FaceEngine> std::fmt::Debug for CameraLease<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CameraLease")
    }
}

/// Messages sent from the controller to the engine thread.
enum EngineRequest {
    LoadModels {
        progress: mpsc::UnboundedSender<String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    OpenCamera {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    CloseCamera,
    Sample {
        references: Arc<ReferenceSet>,
        threshold: f32,
        reply: oneshot::Sender<Result<SampleOutcome, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

impl FaceEngine for EngineHandle {
    async fn load_models(&self, progress: mpsc::UnboundedSender<String>) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::LoadModels { progress, reply }).await
    }

    async fn open_camera(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::OpenCamera { reply }).await
    }

    fn close_camera(&self) {
        let _ = self.tx.send(EngineRequest::CloseCamera);
    }

    async fn sample(&self, references: Arc<ReferenceSet>, threshold: f32) -> Result<SampleOutcome, EngineError> {
        self.call(|reply| EngineRequest::Sample {
            references,
            threshold,
            reply,
        })
        .await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub warmup_frames: usize,
    pub face_selection: FaceSelection,
    pub tie_break: TieBreak,
    pub snapshot_quality: u8,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            warmup_frames: 4,
            face_selection: FaceSelection::FirstDetected,
            tie_break: TieBreak::FirstEncountered,
            snapshot_quality: 80,
        }
    }
}

/// State owned by the engine thread.
struct Engine<C: CameraDevice, P: ModelProvider> {
    device: C,
    stream: Option<C::Stream>,
    holders: usize,
    models: ModelLoader<P>,
    matcher: EuclideanMatcher,
    options: EngineOptions,
}

impl<C: CameraDevice, P: ModelProvider> Engine<C, P> {
    fn new(device: C, provider: P, options: EngineOptions) -> Self {
        Self {
            device,
            stream: None,
            holders: 0,
            models: ModelLoader::new(provider),
            matcher: EuclideanMatcher { tie_break: options.tie_break },
            options,
        }
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::LoadModels { progress, reply } => {
                let result = self
                    .models
                    .load(|text| {
                        let _ = progress.send(text.to_string());
                    })
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::OpenCamera { reply } => {
                let _ = reply.send(self.open_camera());
            }
            EngineRequest::CloseCamera => self.close_camera(),
            EngineRequest::Sample {
                references,
                threshold,
                reply,
            } => {
                let _ = reply.send(self.sample(&references, threshold));
            }
        }
    }

    /// Opens are counted; the device is released when the last holder closes.
    fn open_camera(&mut self) -> Result<(), EngineError> {
        if self.stream.is_none() {
            let mut stream = self.device.open()?;
            for _ in 0..self.options.warmup_frames {
                let _ = stream.capture();
            }
            self.stream = Some(stream);
        }
        self.holders += 1;
        Ok(())
    }

    fn close_camera(&mut self) {
        self.holders = self.holders.saturating_sub(1);
        if self.holders == 0 && self.stream.take().is_some() {
            tracing::info!("camera closed");
        }
    }

    fn release_all(&mut self) {
        self.holders = 0;
        self.close_camera();
    }

    fn sample(&mut self, references: &ReferenceSet, threshold: f32) -> Result<SampleOutcome, EngineError> {
        let stream = self.stream.as_mut().ok_or(EngineError::CameraClosed)?;
        let pipeline = self.models.pipeline_mut().ok_or(EngineError::ModelsNotLoaded)?;

        let frame = stream.capture()?;
        if frame.is_dark(DARK_FRAME_PCT) {
            tracing::debug!(brightness = frame.avg_brightness(), "skipping dark frame");
            return Ok(SampleOutcome {
                result: MatchResult::NoFaceDetected,
                snapshot: None,
            });
        }

        let detection = pipeline.analyze(frame.view(), self.options.face_selection)?;
        let result = match_detection(&self.matcher, detection.as_ref(), references, threshold);
        tracing::debug!(?result, sequence = frame.sequence, "frame sampled");

        let snapshot = if result.is_match() {
            frame
                .to_jpeg_data_url(self.options.snapshot_quality)
                .map_err(|e| tracing::warn!(error = %e, "snapshot encoding failed; submitting without photo"))
                .ok()
        } else {
            None
        };

        Ok(SampleOutcome { result, snapshot })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Nothing is loaded or opened up front; the controller requests models
/// and the camera when face mode starts.
pub fn spawn_engine<C, P>(device: C, provider: P, options: EngineOptions) -> std::io::Result<EngineHandle>
where
    C: CameraDevice,
    P: ModelProvider + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<EngineRequest>();

    std::thread::Builder::new()
        .name("hadir-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let mut engine = Engine::new(device, provider, options);
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            engine.release_all();
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hadir_core::{
        AlignedFace, BoundingBox, Embedding, FaceDetector, FaceEmbedder, FaceLandmarker, FrameRef, IdentityId,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub struct Counters {
        pub opens: AtomicUsize,
        pub closes: AtomicUsize,
    }

    pub struct FakeDevice {
        pub counters: Arc<Counters>,
        pub brightness: u8,
    }

    pub struct FakeStream {
        counters: Arc<Counters>,
        brightness: u8,
    }

    impl FrameSource for FakeStream {
        fn capture(&mut self) -> Result<Frame, CameraError> {
            Ok(Frame {
                data: vec![self.brightness; 8 * 8 * 3],
                width: 8,
                height: 8,
                timestamp: std::time::Instant::now(),
                sequence: 0,
            })
        }
    }

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraDevice for FakeDevice {
        type Stream = FakeStream;

        fn open(&self) -> Result<FakeStream, CameraError> {
            self.counters.opens.fetch_add(1, Ordering::SeqCst);
            Ok(FakeStream {
                counters: self.counters.clone(),
                brightness: self.brightness,
            })
        }
    }

    /// Every frame has one face whose embedding is the frame's mean intensity.
    struct BrightnessFaces;

    impl FaceDetector for BrightnessFaces {
        fn detect(&mut self, _frame: FrameRef<'_>) -> Result<Vec<BoundingBox>, InferenceError> {
            Ok(vec![BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 8.0,
                height: 8.0,
                confidence: 0.9,
                landmarks: None,
            }])
        }
    }

    impl FaceLandmarker for BrightnessFaces {
        fn align(&mut self, frame: FrameRef<'_>, _face: &BoundingBox) -> Result<AlignedFace, InferenceError> {
            Ok(AlignedFace { data: frame.data.to_vec(), size: frame.width })
        }
    }

    impl FaceEmbedder for BrightnessFaces {
        fn embed(&mut self, face: &AlignedFace) -> Result<Embedding, InferenceError> {
            Ok(Embedding::new(vec![face.data[0] as f32 / 255.0, 0.0]))
        }
    }

    struct FakeModels;

    impl ModelProvider for FakeModels {
        fn load_detector(&self) -> Result<Box<dyn FaceDetector>, ModelLoadError> {
            Ok(Box::new(BrightnessFaces))
        }
        fn load_landmarker(&self) -> Result<Box<dyn FaceLandmarker>, ModelLoadError> {
            Ok(Box::new(BrightnessFaces))
        }
        fn load_embedder(&self) -> Result<Box<dyn FaceEmbedder>, ModelLoadError> {
            Ok(Box::new(BrightnessFaces))
        }
    }

    fn engine(brightness: u8) -> (Engine<FakeDevice, FakeModels>, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let device = FakeDevice { counters: counters.clone(), brightness };
        let options = EngineOptions { warmup_frames: 0, ..Default::default() };
        (Engine::new(device, FakeModels, options), counters)
    }

    fn references() -> ReferenceSet {
        let mut set = ReferenceSet::default();
        set.insert(IdentityId(7), "Bu Sari", Embedding::new(vec![200.0 / 255.0, 0.0]));
        set
    }

    #[test]
    fn test_sample_requires_camera_and_models() {
        let (mut engine, _) = engine(200);
        assert!(matches!(engine.sample(&references(), 0.6), Err(EngineError::CameraClosed)));
        engine.open_camera().unwrap();
        assert!(matches!(engine.sample(&references(), 0.6), Err(EngineError::ModelsNotLoaded)));
    }

    #[test]
    fn test_sample_match_carries_snapshot() {
        let (mut engine, _) = engine(200);
        engine.models.load(|_| {}).unwrap();
        engine.open_camera().unwrap();

        let outcome = engine.sample(&references(), 0.6).unwrap();
        assert_eq!(
            outcome.result,
            MatchResult::Matched { identity_id: IdentityId(7), distance: 0.0 }
        );
        assert!(outcome.snapshot.unwrap().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_dark_frame_is_no_face() {
        let (mut engine, _) = engine(0);
        engine.models.load(|_| {}).unwrap();
        engine.open_camera().unwrap();
        let outcome = engine.sample(&references(), 0.6).unwrap();
        assert_eq!(outcome.result, MatchResult::NoFaceDetected);
        assert!(outcome.snapshot.is_none());
    }

    #[test]
    fn test_camera_released_by_last_holder() {
        let (mut engine, counters) = engine(200);
        engine.open_camera().unwrap();
        engine.open_camera().unwrap();
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);

        engine.close_camera();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
        assert!(engine.stream.is_some());

        engine.close_camera();
        engine.close_camera();
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_lease_drop_closes_on_engine_thread() {
        let counters = Arc::new(Counters::default());
        let device = FakeDevice { counters: counters.clone(), brightness: 200 };
        let handle = spawn_engine(device, FakeModels, EngineOptions { warmup_frames: 2, ..Default::default() }).unwrap();

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        handle.load_models(progress_tx).await.unwrap();
        let mut steps = Vec::new();
        while let Some(step) = progress_rx.recv().await {
            steps.push(step);
        }
        assert!(!steps.is_empty());

        let lease = CameraLease::acquire(handle.clone()).await.unwrap();
        let outcome = handle.sample(Arc::new(references()), 0.6).await.unwrap();
        assert!(outcome.result.is_match());
        drop(lease);

        // Requests are processed in order, so a later reply means the close ran.
        assert!(matches!(
            handle.sample(Arc::new(references()), 0.6).await,
            Err(EngineError::CameraClosed)
        ));
        assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }
}
