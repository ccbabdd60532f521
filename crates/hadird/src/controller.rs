//! Kiosk attendance controller.
//!
//! A single task owns all state. Commands arrive over an mpsc channel and
//! status goes out over a `watch` channel. Slow work (model loading, frame
//! sampling, HTTP submissions, the cool-down timer) runs in spawned tasks
//! that report back as events tagged with the face-mode generation they
//! were started under. Leaving face mode bumps the generation, so anything
//! still in flight from the previous session is discarded when it lands.

use crate::config::Config;
use crate::engine::{CameraLease, EngineError, FaceEngine, SampleOutcome};
use crate::status::{KioskState, KioskStatus, StatusMessage};
use crate::submitter::{self, AttendanceBackend, Outcome, SESSION_EXPIRED};
use hadir_client::{ApiError, AttendanceSubmission};
use hadir_core::{MatchResult, ReferenceSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};

const HINT_LOADING: &str = "Memuat model pengenalan wajah...";
const HINT_NO_FACE: &str = "Wajah tidak terdeteksi";
const HINT_UNKNOWN_FACE: &str = "Wajah tidak dikenali";
const HINT_NO_REFERENCES: &str = "Belum ada wajah guru yang terdaftar";
const MISSING_LOCATION: &str = "Lokasi kiosk belum dikonfigurasi.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    EnterFaceMode,
    LeaveFaceMode,
    /// Raw card reader input; trimmed, ignored when empty.
    SubmitRfid(String),
    SubmitManual { teacher_id: u64 },
    /// Re-fetch the teacher list, e.g. after a new face was enrolled.
    RefreshIdentities,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct KioskSettings {
    pub threshold: f32,
    pub interval: Duration,
    pub cooldown: Duration,
    /// Kiosk coordinates attached to manual and face submissions.
    pub location: Option<(f64, f64)>,
    /// Descriptor length the live embedder produces.
    pub embedding_dim: Option<usize>,
}

impl From<&Config> for KioskSettings {
    fn from(config: &Config) -> Self {
        Self {
            threshold: config.match_threshold,
            interval: config.detect_interval,
            cooldown: config.cooldown,
            location: config.location,
            embedding_dim: config.embedding_dim,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Face { generation: u64 },
    /// RFID or manual entry; not tied to face mode.
    Desk,
}

#[derive(Error, Debug)]
enum PrepareError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to load teachers: {0}")]
    Api(#[from] ApiError),
}

impl PrepareError {
    fn is_auth(&self) -> bool {
        matches!(self, PrepareError::Api(ApiError::AuthExpired | ApiError::NotAuthenticated))
    }

    fn user_message(&self) -> &'static str {
        match self {
            PrepareError::Engine(EngineError::ModelLoad(_)) => "Gagal memuat model pengenalan wajah.",
            PrepareError::Engine(EngineError::Camera(e)) if e.is_permission_denied() => "Akses kamera ditolak.",
            PrepareError::Engine(EngineError::Camera(_)) => "Kamera tidak dapat dibuka.",
            PrepareError::Engine(_) => "Mesin pengenalan wajah tidak tersedia.",
            PrepareError::Api(_) => "Gagal memuat data guru.",
        }
    }
}

struct Prepared<E: FaceEngine> {
    lease: CameraLease<E>,
    references: ReferenceSet,
}

enum Event<E: FaceEngine> {
    Progress {
        generation: u64,
        text: String,
    },
    Prepared {
        generation: u64,
        result: Result<Prepared<E>, PrepareError>,
    },
    Sampled {
        generation: u64,
        result: Result<SampleOutcome, EngineError>,
    },
    Submitted {
        origin: Origin,
        outcome: Outcome,
    },
    IdentitiesLoaded {
        generation: u64,
        result: Result<ReferenceSet, ApiError>,
    },
    StatusExpired {
        seq: u64,
        rearm: Option<u64>,
    },
}

/// Handle used by the daemon's input sources and display.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<KioskStatus>,
}

impl ControllerHandle {
    /// Returns false once the controller has stopped.
    pub async fn send(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn status(&self) -> KioskStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<KioskStatus> {
        self.status.clone()
    }

    /// Handle with no controller behind it; commands land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::Receiver<Command>) {
        let (commands, rx) = mpsc::channel(16);
        let (_status_tx, status) = watch::channel(KioskStatus::default());
        (Self { commands, status }, rx)
    }
}

pub fn spawn_controller<E, B>(engine: E, backend: B, settings: KioskSettings) -> (ControllerHandle, JoinHandle<()>)
where
    E: FaceEngine,
    B: AttendanceBackend,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(KioskStatus::default());
    let controller = Controller::new(engine, backend, settings, status_tx);
    let task = tokio::spawn(controller.run(cmd_rx));
    (
        ControllerHandle {
            commands: cmd_tx,
            status: status_rx,
        },
        task,
    )
}

struct Controller<E: FaceEngine, B: AttendanceBackend> {
    engine: E,
    backend: B,
    settings: KioskSettings,
    status: KioskStatus,
    status_tx: watch::Sender<KioskStatus>,
    events_tx: mpsc::UnboundedSender<Event<E>>,
    events_rx: mpsc::UnboundedReceiver<Event<E>>,
    generation: u64,
    status_seq: u64,
    submitting: bool,
    lease: Option<CameraLease<E>>,
    references: Arc<ReferenceSet>,
    ticker: Interval,
}

impl<E: FaceEngine, B: AttendanceBackend> Controller<E, B> {
    fn new(engine: E, backend: B, settings: KioskSettings, status_tx: watch::Sender<KioskStatus>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut ticker = tokio::time::interval_at(Instant::now() + settings.interval, settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            engine,
            backend,
            settings,
            status: KioskStatus::default(),
            status_tx,
            events_tx,
            events_rx,
            generation: 0,
            status_seq: 0,
            submitting: false,
            lease: None,
            references: Arc::new(ReferenceSet::default()),
            ticker,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::info!("controller started");
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Shutdown) | None => break,
                    Some(cmd) => self.on_command(cmd),
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = self.ticker.tick(), if self.status.state == KioskState::Ready && !self.submitting => {
                    self.on_tick();
                }
            }
        }
        self.leave_face_mode();
        tracing::info!("controller stopped");
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status.clone());
    }

    fn set_state(&mut self, state: KioskState) {
        if self.status.state != state {
            tracing::debug!(from = ?self.status.state, to = ?state, "state change");
            self.status.state = state;
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::EnterFaceMode => self.enter_face_mode(),
            Command::LeaveFaceMode => self.leave_face_mode(),
            Command::SubmitRfid(raw) => {
                let uid = raw.trim();
                if uid.is_empty() {
                    return;
                }
                self.start_submission(AttendanceSubmission::rfid(uid), Origin::Desk);
            }
            Command::SubmitManual { teacher_id } => match self.settings.location {
                Some((lat, lon)) => {
                    self.start_submission(AttendanceSubmission::manual(teacher_id, lat, lon), Origin::Desk);
                }
                None => {
                    tracing::warn!(teacher_id, "manual attendance without a configured kiosk location");
                    self.show_timed(StatusMessage::error(MISSING_LOCATION), None);
                    self.publish();
                }
            },
            Command::RefreshIdentities => self.refresh_identities(),
            Command::Shutdown => {}
        }
    }

    fn enter_face_mode(&mut self) {
        if self.status.face_mode && self.status.state != KioskState::Failed {
            tracing::debug!("already in face mode");
            return;
        }
        self.generation += 1;
        self.lease = None;
        self.status.face_mode = true;
        self.status.message = None;
        self.status.hint = Some(HINT_LOADING.to_string());
        self.set_state(KioskState::Loading);
        self.publish();
        tracing::info!(generation = self.generation, "entering face mode");

        let engine = self.engine.clone();
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let generation = self.generation;
        let embedding_dim = self.settings.embedding_dim;
        tokio::spawn(async move {
            let result = prepare(engine, backend, generation, embedding_dim, &events).await;
            let _ = events.send(Event::Prepared { generation, result });
        });
    }

    /// Abandon face mode: release the camera and invalidate in-flight work.
    fn leave_face_mode(&mut self) {
        if !self.status.face_mode {
            return;
        }
        self.generation += 1;
        self.lease = None;
        self.status.face_mode = false;
        self.status.hint = None;
        self.set_state(KioskState::Idle);
        self.publish();
        tracing::info!(generation = self.generation, "left face mode");
    }

    fn refresh_identities(&mut self) {
        if !self.status.face_mode {
            return;
        }
        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        let generation = self.generation;
        let embedding_dim = self.settings.embedding_dim;
        tokio::spawn(async move {
            let result = backend
                .identities()
                .await
                .map(|records| ReferenceSet::build(&records, embedding_dim));
            let _ = events.send(Event::IdentitiesLoaded { generation, result });
        });
    }

    fn on_tick(&mut self) {
        self.set_state(KioskState::Matching);
        self.publish();

        let engine = self.engine.clone();
        let events = self.events_tx.clone();
        let references = self.references.clone();
        let threshold = self.settings.threshold;
        let generation = self.generation;
        tokio::spawn(async move {
            let result = engine.sample(references, threshold).await;
            let _ = events.send(Event::Sampled { generation, result });
        });
    }

    fn start_submission(&mut self, submission: AttendanceSubmission, origin: Origin) {
        if self.submitting {
            tracing::warn!(method = %submission.method, "submission already in flight; ignoring");
            return;
        }
        self.submitting = true;
        self.status.busy = true;
        if let Origin::Face { .. } = origin {
            self.set_state(KioskState::Submitting);
        }
        self.publish();

        let backend = self.backend.clone();
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let outcome = submitter::submit(&backend, submission).await;
            let _ = events.send(Event::Submitted { origin, outcome });
        });
    }

    /// Show `message` until the cool-down window passes. With `rearm`, the
    /// detection loop of that generation resumes when it does.
    fn show_timed(&mut self, message: StatusMessage, rearm: Option<u64>) {
        self.status_seq += 1;
        self.status.message = Some(message);

        let seq = self.status_seq;
        let events = self.events_tx.clone();
        let cooldown = self.settings.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let _ = events.send(Event::StatusExpired { seq, rearm });
        });
    }

    fn auth_expired(&mut self) {
        tracing::warn!("session expired; leaving face mode");
        self.leave_face_mode();
        self.show_timed(StatusMessage::error(SESSION_EXPIRED), None);
        self.publish();
    }

    fn fail_face_mode(&mut self, message: &str) {
        self.lease = None;
        self.status.hint = None;
        self.status.message = Some(StatusMessage::error(message));
        self.set_state(KioskState::Failed);
        self.publish();
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.status.face_mode
    }

    fn on_event(&mut self, event: Event<E>) {
        match event {
            Event::Progress { generation, text } => {
                if self.is_current(generation) && self.status.state == KioskState::Loading {
                    self.status.hint = Some(text);
                    self.publish();
                }
            }
            Event::Prepared { generation, result } => {
                if !self.is_current(generation) || self.status.state != KioskState::Loading {
                    tracing::debug!(generation, "discarding stale face-mode preparation");
                    return;
                }
                match result {
                    Ok(prepared) => {
                        tracing::info!(
                            identities = prepared.references.len(),
                            embeddings = prepared.references.embedding_count(),
                            "face mode ready"
                        );
                        self.status.hint = prepared
                            .references
                            .is_empty()
                            .then(|| HINT_NO_REFERENCES.to_string());
                        self.references = Arc::new(prepared.references);
                        self.lease = Some(prepared.lease);
                        self.set_state(KioskState::Ready);
                        self.ticker.reset();
                        self.publish();
                    }
                    Err(e) if e.is_auth() => self.auth_expired(),
                    Err(e) => {
                        tracing::error!(error = %e, "face mode unavailable");
                        self.fail_face_mode(e.user_message());
                    }
                }
            }
            Event::Sampled { generation, result } => {
                if !self.is_current(generation) || self.status.state != KioskState::Matching {
                    return;
                }
                self.on_sampled(generation, result);
            }
            Event::Submitted { origin, outcome } => {
                self.submitting = false;
                self.status.busy = false;
                self.on_submitted(origin, outcome);
            }
            Event::IdentitiesLoaded { generation, result } => {
                if !self.is_current(generation) {
                    return;
                }
                match result {
                    Ok(set) => {
                        tracing::info!(identities = set.len(), "reference set refreshed");
                        self.references = Arc::new(set);
                    }
                    Err(ApiError::AuthExpired | ApiError::NotAuthenticated) => self.auth_expired(),
                    Err(e) => tracing::warn!(error = %e, "teacher refresh failed; keeping previous set"),
                }
            }
            Event::StatusExpired { seq, rearm } => {
                if seq == self.status_seq {
                    self.status.message = None;
                }
                if let Some(generation) = rearm {
                    if self.is_current(generation) && self.status.state == KioskState::CoolingDown {
                        self.set_state(KioskState::Ready);
                        self.ticker.reset();
                    }
                }
                self.publish();
            }
        }
    }

    fn on_sampled(&mut self, generation: u64, result: Result<SampleOutcome, EngineError>) {
        match result {
            Ok(SampleOutcome { result, snapshot }) => match result {
                MatchResult::NoFaceDetected => {
                    self.status.hint = Some(HINT_NO_FACE.to_string());
                    self.set_state(KioskState::Ready);
                }
                MatchResult::Unmatched { best_distance } => {
                    tracing::debug!(best_distance, "face not recognized");
                    self.status.hint = Some(HINT_UNKNOWN_FACE.to_string());
                    self.set_state(KioskState::Ready);
                }
                MatchResult::Matched { identity_id, distance } => {
                    let name = self.references.name_of(identity_id).map(str::to_string);
                    tracing::info!(%identity_id, distance, name = ?name, "face matched");
                    self.status.hint = name;
                    if self.submitting {
                        self.set_state(KioskState::Ready);
                    } else {
                        let mut submission = AttendanceSubmission::face(identity_id.0, snapshot);
                        if let Some((lat, lon)) = self.settings.location {
                            submission = submission.with_location(lat, lon);
                        }
                        self.start_submission(submission, Origin::Face { generation });
                        return;
                    }
                }
            },
            Err(EngineError::Camera(e)) => {
                tracing::error!(error = %e, "camera failed during detection");
                let message = if e.is_permission_denied() {
                    "Akses kamera ditolak."
                } else {
                    "Kamera terputus."
                };
                self.fail_face_mode(message);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame analysis failed");
                self.set_state(KioskState::Ready);
            }
        }
        self.publish();
    }

    fn on_submitted(&mut self, origin: Origin, outcome: Outcome) {
        if let Origin::Face { generation } = origin {
            if !self.is_current(generation) {
                tracing::debug!(generation, ?outcome, "discarding outcome from abandoned face session");
                self.publish();
                return;
            }
        }
        if outcome == Outcome::AuthExpired {
            self.auth_expired();
            return;
        }

        let message = outcome.status_message();
        match origin {
            Origin::Face { generation } => {
                self.set_state(KioskState::CoolingDown);
                self.show_timed(message, Some(generation));
            }
            Origin::Desk => self.show_timed(message, None),
        }
        self.publish();
    }
}

/// Load models, fetch the teacher list and open the camera, in that order.
async fn prepare<E: FaceEngine, B: AttendanceBackend>(
    engine: E,
    backend: B,
    generation: u64,
    embedding_dim: Option<usize>,
    events: &mpsc::UnboundedSender<Event<E>>,
) -> Result<Prepared<E>, PrepareError> {
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
    let forward = async {
        while let Some(text) = progress_rx.recv().await {
            let _ = events.send(Event::Progress { generation, text });
        }
    };
    let (loaded, ()) = tokio::join!(engine.load_models(progress_tx), forward);
    loaded?;

    let records = backend.identities().await?;
    let references = ReferenceSet::build(&records, embedding_dim);

    let lease = CameraLease::acquire(engine).await?;
    Ok(Prepared { lease, references })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::StatusKind;
    use hadir_client::{AttendanceMethod, AttendanceReceipt};
    use hadir_core::{IdentityId, IdentityRecord, ModelLoadError, ModelStage};
    use hadir_hw::CameraError;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::{sleep, sleep_until};

    #[derive(Default)]
    struct EngineInner {
        script: Mutex<VecDeque<MatchResult>>,
        samples: Mutex<Vec<Instant>>,
        /// Reference ids visible to each sample.
        seen: Mutex<Vec<Vec<u64>>>,
        opens: AtomicUsize,
        closes: AtomicUsize,
        open_delay: Duration,
        deny_camera: bool,
        fail_models: bool,
    }

    #[derive(Clone, Default)]
    struct FakeEngine {
        inner: Arc<EngineInner>,
    }

    impl FakeEngine {
        fn scripted(script: Vec<MatchResult>) -> Self {
            Self::build(script, Duration::ZERO, false)
        }

        fn build(script: Vec<MatchResult>, open_delay: Duration, deny_camera: bool) -> Self {
            Self {
                inner: Arc::new(EngineInner {
                    script: Mutex::new(script.into()),
                    open_delay,
                    deny_camera,
                    ..Default::default()
                }),
            }
        }

        fn without_models() -> Self {
            Self {
                inner: Arc::new(EngineInner {
                    fail_models: true,
                    ..Default::default()
                }),
            }
        }

        fn seen(&self) -> Vec<Vec<u64>> {
            self.inner.seen.lock().unwrap().clone()
        }

        fn samples(&self) -> Vec<Instant> {
            self.inner.samples.lock().unwrap().clone()
        }

        fn opens(&self) -> usize {
            self.inner.opens.load(Ordering::SeqCst)
        }

        fn closes(&self) -> usize {
            self.inner.closes.load(Ordering::SeqCst)
        }
    }

    impl FaceEngine for FakeEngine {
        async fn load_models(&self, progress: mpsc::UnboundedSender<String>) -> Result<(), EngineError> {
            let _ = progress.send("loading face detector".into());
            if self.inner.fail_models {
                return Err(ModelLoadError {
                    stage: ModelStage::Detector,
                    reason: "det_10g.onnx not found".into(),
                }
                .into());
            }
            Ok(())
        }

        async fn open_camera(&self) -> Result<(), EngineError> {
            if !self.inner.open_delay.is_zero() {
                sleep(self.inner.open_delay).await;
            }
            if self.inner.deny_camera {
                return Err(CameraError::PermissionDenied("/dev/video0".into()).into());
            }
            self.inner.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn close_camera(&self) {
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
        }

        async fn sample(&self, references: Arc<ReferenceSet>, _threshold: f32) -> Result<SampleOutcome, EngineError> {
            self.inner.samples.lock().unwrap().push(Instant::now());
            let ids = references.entries().iter().map(|e| e.id.0).collect();
            self.inner.seen.lock().unwrap().push(ids);
            let result = self
                .inner
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MatchResult::NoFaceDetected);
            let snapshot = result.is_match().then(|| "data:image/jpeg;base64,AAAA".to_string());
            Ok(SampleOutcome { result, snapshot })
        }
    }

    #[derive(Clone, Copy)]
    enum Reply {
        Receipt(bool, &'static str),
        Unauthorized,
    }

    struct BackendInner {
        reply: Reply,
        delay: Duration,
        submissions: Mutex<Vec<(Instant, AttendanceSubmission)>>,
        /// `None` makes the teacher fetch fail.
        roster: Mutex<Option<Vec<IdentityRecord>>>,
    }

    #[derive(Clone)]
    struct FakeBackend {
        inner: Arc<BackendInner>,
    }

    impl FakeBackend {
        fn new(reply: Reply, delay: Duration) -> Self {
            Self {
                inner: Arc::new(BackendInner {
                    reply,
                    delay,
                    submissions: Mutex::new(Vec::new()),
                    roster: Mutex::new(Some(vec![teacher(7, "Bu Sari")])),
                }),
            }
        }

        fn set_roster(&self, roster: Option<Vec<IdentityRecord>>) {
            *self.inner.roster.lock().unwrap() = roster;
        }

        fn submissions(&self) -> Vec<(Instant, AttendanceSubmission)> {
            self.inner.submissions.lock().unwrap().clone()
        }
    }

    impl AttendanceBackend for FakeBackend {
        async fn submit(&self, submission: AttendanceSubmission) -> Result<AttendanceReceipt, ApiError> {
            self.inner.submissions.lock().unwrap().push((Instant::now(), submission));
            sleep(self.inner.delay).await;
            match self.inner.reply {
                Reply::Receipt(success, message) => Ok(AttendanceReceipt {
                    success,
                    message: Some(message.to_string()),
                }),
                Reply::Unauthorized => Err(ApiError::AuthExpired),
            }
        }

        async fn identities(&self) -> Result<Vec<IdentityRecord>, ApiError> {
            self.inner
                .roster
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ApiError::Network("connection refused".into()))
        }
    }

    fn teacher(id: u64, name: &str) -> IdentityRecord {
        IdentityRecord {
            id: IdentityId(id),
            name: name.into(),
            descriptor: Some(serde_json::json!("[0.1,0.2]")),
        }
    }

    fn settings() -> KioskSettings {
        KioskSettings {
            threshold: 0.6,
            interval: Duration::from_secs(1),
            cooldown: Duration::from_secs(4),
            location: Some((-6.2, 106.8)),
            embedding_dim: Some(2),
        }
    }

    fn matched(id: u64) -> MatchResult {
        MatchResult::Matched { identity_id: IdentityId(id), distance: 0.3 }
    }

    fn ok_backend() -> FakeBackend {
        FakeBackend::new(Reply::Receipt(true, "Absensi berhasil"), Duration::ZERO)
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_ticks_submit_once_then_cool_down() {
        let engine = FakeEngine::scripted(vec![
            MatchResult::NoFaceDetected,
            MatchResult::Unmatched { best_distance: 0.9 },
            matched(7),
        ]);
        let backend = ok_backend();
        let (handle, _task) = spawn_controller(engine.clone(), backend.clone(), settings());
        let start = Instant::now();

        assert!(handle.send(Command::EnterFaceMode).await);
        sleep_until(start + Duration::from_millis(3500)).await;

        assert_eq!(engine.samples().len(), 3);
        let subs = backend.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].1.method, AttendanceMethod::Face);
        assert_eq!(subs[0].1.teacher_id, Some(7));
        assert!(subs[0].1.photo.is_some());
        assert_eq!((subs[0].1.latitude, subs[0].1.longitude), (Some(-6.2), Some(106.8)));

        let status = handle.status();
        assert_eq!(status.state, KioskState::CoolingDown);
        assert_eq!(status.message.map(|m| m.kind), Some(StatusKind::Success));

        sleep_until(start + Duration::from_millis(6900)).await;
        assert_eq!(engine.samples().len(), 3, "no tick during cool-down");

        sleep_until(start + Duration::from_millis(8500)).await;
        let samples = engine.samples();
        assert_eq!(samples.len(), 4);
        assert!(samples[3] - subs[0].0 >= Duration::from_secs(4));
        assert!(handle.status().message.is_none());
        assert_eq!(backend.submissions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_closed_when_leaving_face_mode() {
        let engine = FakeEngine::scripted(vec![]);
        let (handle, _task) = spawn_controller(engine.clone(), ok_backend(), settings());

        handle.send(Command::EnterFaceMode).await;
        sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.status().state, KioskState::Ready);
        assert_eq!((engine.opens(), engine.closes()), (1, 0));

        handle.send(Command::LeaveFaceMode).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status().state, KioskState::Idle);
        assert_eq!((engine.opens(), engine.closes()), (1, 1));

        let before = engine.samples().len();
        sleep(Duration::from_secs(3)).await;
        assert_eq!(engine.samples().len(), before, "detection loop stopped");
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_closed_when_leaving_during_cool_down() {
        let engine = FakeEngine::scripted(vec![matched(7)]);
        let backend = ok_backend();
        let (handle, _task) = spawn_controller(engine.clone(), backend.clone(), settings());
        let start = Instant::now();

        handle.send(Command::EnterFaceMode).await;
        sleep_until(start + Duration::from_secs(2)).await;
        assert_eq!(handle.status().state, KioskState::CoolingDown);
        assert_eq!(backend.submissions().len(), 1);

        handle.send(Command::LeaveFaceMode).await;
        sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.status().state, KioskState::Idle);
        assert_eq!((engine.opens(), engine.closes()), (1, 1));

        sleep_until(start + Duration::from_secs(10)).await;
        assert_eq!(handle.status().state, KioskState::Idle, "cool-down expiry must not re-arm");
        assert_eq!(engine.samples().len(), 1);
        assert_eq!(backend.submissions().len(), 1);
        assert_eq!((engine.opens(), engine.closes()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_load_failure_never_ticks() {
        let engine = FakeEngine::without_models();
        let (handle, _task) = spawn_controller(engine.clone(), ok_backend(), settings());

        handle.send(Command::EnterFaceMode).await;
        sleep(Duration::from_secs(5)).await;

        let status = handle.status();
        assert_eq!(status.state, KioskState::Failed);
        assert_eq!(status.message, Some(StatusMessage::error("Gagal memuat model pengenalan wajah.")));
        assert!(engine.samples().is_empty());
        assert_eq!((engine.opens(), engine.closes()), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_replaces_reference_set() {
        let engine = FakeEngine::scripted(vec![]);
        let backend = ok_backend();
        let (handle, _task) = spawn_controller(engine.clone(), backend.clone(), settings());
        let start = Instant::now();

        handle.send(Command::EnterFaceMode).await;
        sleep_until(start + Duration::from_millis(1500)).await;
        backend.set_roster(Some(vec![teacher(7, "Bu Sari"), teacher(9, "Pak Budi")]));
        handle.send(Command::RefreshIdentities).await;

        sleep_until(start + Duration::from_millis(2500)).await;
        assert_eq!(engine.seen(), vec![vec![7], vec![7, 9]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_previous_set() {
        let engine = FakeEngine::scripted(vec![]);
        let backend = ok_backend();
        let (handle, _task) = spawn_controller(engine.clone(), backend.clone(), settings());
        let start = Instant::now();

        handle.send(Command::EnterFaceMode).await;
        sleep_until(start + Duration::from_millis(1500)).await;
        backend.set_roster(None);
        handle.send(Command::RefreshIdentities).await;

        sleep_until(start + Duration::from_millis(2500)).await;
        assert_eq!(engine.seen(), vec![vec![7], vec![7]]);
        let status = handle.status();
        assert!(status.face_mode);
        assert_eq!(status.state, KioskState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_closed_on_shutdown() {
        let engine = FakeEngine::scripted(vec![]);
        let (handle, task) = spawn_controller(engine.clone(), ok_backend(), settings());

        handle.send(Command::EnterFaceMode).await;
        sleep(Duration::from_millis(500)).await;
        handle.send(Command::Shutdown).await;
        task.await.unwrap();

        assert_eq!((engine.opens(), engine.closes()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_opened_after_leaving_is_released() {
        let engine = FakeEngine::build(vec![], Duration::from_secs(1), false);
        let (handle, _task) = spawn_controller(engine.clone(), ok_backend(), settings());

        handle.send(Command::EnterFaceMode).await;
        sleep(Duration::from_millis(200)).await;
        assert_eq!(handle.status().state, KioskState::Loading);
        handle.send(Command::LeaveFaceMode).await;

        sleep(Duration::from_secs(2)).await;
        assert_eq!(handle.status().state, KioskState::Idle);
        assert_eq!((engine.opens(), engine.closes()), (1, 1));
        assert!(engine.samples().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_camera_denied_fails_without_retry() {
        let engine = FakeEngine::build(vec![], Duration::ZERO, true);
        let (handle, _task) = spawn_controller(engine.clone(), ok_backend(), settings());

        handle.send(Command::EnterFaceMode).await;
        sleep(Duration::from_secs(3)).await;

        let status = handle.status();
        assert_eq!(status.state, KioskState::Failed);
        assert_eq!(status.message, Some(StatusMessage::error("Akses kamera ditolak.")));
        assert!(engine.samples().is_empty());
        assert_eq!((engine.opens(), engine.closes()), (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_matches_submit_once() {
        let engine = FakeEngine::scripted(vec![matched(7); 10]);
        let backend = FakeBackend::new(Reply::Receipt(true, "ok"), Duration::from_millis(2500));
        let (handle, _task) = spawn_controller(engine.clone(), backend.clone(), settings());
        let start = Instant::now();

        handle.send(Command::EnterFaceMode).await;
        sleep_until(start + Duration::from_millis(1500)).await;
        assert!(handle.status().busy);
        handle.send(Command::SubmitRfid("0042".into())).await;

        sleep_until(start + Duration::from_millis(3400)).await;
        assert_eq!(backend.submissions().len(), 1);
        assert_eq!(engine.samples().len(), 1);

        sleep_until(start + Duration::from_secs(9)).await;
        let subs = backend.submissions();
        assert_eq!(subs.len(), 2);
        assert!(subs.iter().all(|(_, s)| s.method == AttendanceMethod::Face));
        assert!(subs[1].0 - subs[0].0 >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_outcome_discarded_after_leaving() {
        let engine = FakeEngine::scripted(vec![matched(7)]);
        let backend = FakeBackend::new(Reply::Receipt(true, "ok"), Duration::from_secs(2));
        let (handle, _task) = spawn_controller(engine.clone(), backend.clone(), settings());
        let start = Instant::now();

        handle.send(Command::EnterFaceMode).await;
        sleep_until(start + Duration::from_millis(1500)).await;
        assert_eq!(handle.status().state, KioskState::Submitting);
        handle.send(Command::LeaveFaceMode).await;

        sleep_until(start + Duration::from_secs(5)).await;
        let status = handle.status();
        assert_eq!(status.state, KioskState::Idle);
        assert!(status.message.is_none());
        assert!(!status.busy);
        assert_eq!(backend.submissions().len(), 1);
        assert_eq!((engine.opens(), engine.closes()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_expired_abandons_face_mode() {
        let engine = FakeEngine::scripted(vec![matched(7)]);
        let backend = FakeBackend::new(Reply::Unauthorized, Duration::ZERO);
        let (handle, _task) = spawn_controller(engine.clone(), backend, settings());

        handle.send(Command::EnterFaceMode).await;
        sleep(Duration::from_millis(1500)).await;

        let status = handle.status();
        assert_eq!(status.state, KioskState::Idle);
        assert!(!status.face_mode);
        assert_eq!(status.message, Some(StatusMessage::error(SESSION_EXPIRED)));
        assert_eq!((engine.opens(), engine.closes()), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rfid_already_recorded_shows_warning() {
        let backend = FakeBackend::new(Reply::Receipt(false, "Sudah absen"), Duration::ZERO);
        let (handle, _task) = spawn_controller(FakeEngine::default(), backend.clone(), settings());

        handle.send(Command::SubmitRfid("   ".into())).await;
        handle.send(Command::SubmitRfid("  0042\n".into())).await;
        sleep(Duration::from_millis(100)).await;

        let subs = backend.submissions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].1.rfid_uid.as_deref(), Some("0042"));
        assert!(subs[0].1.photo.is_none());
        assert_eq!(handle.status().message, Some(StatusMessage::warning("Sudah absen")));

        sleep(Duration::from_secs(4)).await;
        assert!(handle.status().message.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_requires_location() {
        let backend = ok_backend();
        let mut no_location = settings();
        no_location.location = None;
        let (handle, _task) = spawn_controller(FakeEngine::default(), backend.clone(), no_location);

        handle.send(Command::SubmitManual { teacher_id: 3 }).await;
        sleep(Duration::from_millis(100)).await;

        assert!(backend.submissions().is_empty());
        assert_eq!(handle.status().message, Some(StatusMessage::error(MISSING_LOCATION)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_attaches_kiosk_location() {
        let backend = ok_backend();
        let (handle, _task) = spawn_controller(FakeEngine::default(), backend.clone(), settings());

        handle.send(Command::SubmitManual { teacher_id: 3 }).await;
        sleep(Duration::from_millis(100)).await;

        let subs = backend.submissions();
        assert_eq!(subs[0].1, AttendanceSubmission::manual(3, -6.2, 106.8));
        assert_eq!(handle.status().message.map(|m| m.kind), Some(StatusKind::Success));
    }
}
