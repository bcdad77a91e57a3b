//! ScanPipeline — permission → capture → analysis → persistence, with
//! partial-failure recovery and one operation in flight at a time.
//!
//! Flow:
//! 1. Permission check (prompt once when undetermined)
//! 2. Capture a still image (user may cancel)
//! 3. Submit to the analysis service, mint the record id on success
//! 4. Append the record to the signed-in user's profile
//! 5. Jump the wizard to the results step and recompute health stats

use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::types::{ErrorReport, PipelineEvent, PipelineState, PipelineStatus, ScanOutcome};
use crate::analysis::AnalysisService;
use crate::auth::AuthSession;
use crate::capture::{CaptureOutcome, CaptureSource, CapturedImage, PermissionStatus};
use crate::clock::Clock;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, StoreError};
use crate::onboarding::{Step, WizardController};
use crate::profile::{HealthStats, TongueAnalysisRecord, recompute_stats};
use crate::store::ProfileStore;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct Shared {
    state: PipelineState,
    last_error: Option<PipelineError>,
    latest_record: Option<TongueAnalysisRecord>,
}

/// Collaborators the pipeline drives.
pub struct PipelineDeps {
    pub capture: Arc<dyn CaptureSource>,
    pub analysis: Arc<dyn AnalysisService>,
    pub store: Arc<dyn ProfileStore>,
    pub auth: Arc<dyn AuthSession>,
    pub clock: Arc<dyn Clock>,
}

pub struct ScanPipeline {
    capture: Arc<dyn CaptureSource>,
    analysis: Arc<dyn AnalysisService>,
    store: Arc<dyn ProfileStore>,
    auth: Arc<dyn AuthSession>,
    clock: Arc<dyn Clock>,
    wizard: WizardController,
    config: PipelineConfig,
    /// Held for the whole of every operation; `try_lock` failure means busy.
    in_flight: Mutex<()>,
    shared: RwLock<Shared>,
    events: broadcast::Sender<PipelineEvent>,
    stats_task: Mutex<Option<JoinHandle<()>>>,
}

impl ScanPipeline {
    pub fn new(deps: PipelineDeps, wizard: WizardController, config: PipelineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            capture: deps.capture,
            analysis: deps.analysis,
            store: deps.store,
            auth: deps.auth,
            clock: deps.clock,
            wizard,
            config,
            in_flight: Mutex::new(()),
            shared: RwLock::new(Shared::default()),
            events,
            stats_task: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub async fn status(&self) -> PipelineStatus {
        let shared = self.shared.read().await;
        let pending_result = match &shared.state {
            PipelineState::Analyzed { record, .. } | PipelineState::Persisting { record, .. } => {
                Some(record.result.clone())
            }
            _ => None,
        };
        PipelineStatus {
            state: shared.state.label(),
            loading: shared.state.is_loading(),
            image_id: shared.state.image().map(|i| i.id),
            pending_result,
            last_error: shared.last_error.as_ref().map(ErrorReport::from),
            latest_record: shared.latest_record.clone(),
        }
    }

    /// Run the whole flow. Allowed from idle, after a permission denial, or
    /// with an image already captured (retake).
    pub async fn start_scan(&self) -> Result<ScanOutcome, PipelineError> {
        let _flight = self.in_flight.try_lock().map_err(|_| PipelineError::Busy)?;
        self.expect_state("start a scan", |s| {
            matches!(
                s,
                PipelineState::Idle | PipelineState::PermissionDenied | PipelineState::Captured { .. }
            )
        })
        .await?;

        info!("Starting tongue scan");
        self.clear_error().await;
        // Dropping any previous image here.
        self.set_state(PipelineState::PermissionPending).await;

        let mut permission = self.capture.check_permission().await;
        if permission == PermissionStatus::NotDetermined {
            debug!("Camera permission undetermined, prompting");
            permission = self.capture.request_permission().await;
        }
        if permission != PermissionStatus::Granted {
            self.set_state(PipelineState::PermissionDenied).await;
            return Err(self.fail(PipelineError::PermissionDenied).await);
        }

        self.set_state(PipelineState::Capturing).await;
        let image = match self.capture.capture().await {
            Ok(CaptureOutcome::Captured(image)) => image,
            Ok(CaptureOutcome::Cancelled) => {
                info!("Capture cancelled by user");
                self.set_state(PipelineState::Idle).await;
                return Ok(ScanOutcome::Cancelled);
            }
            Err(e) => {
                self.set_state(PipelineState::Idle).await;
                return Err(self.fail(PipelineError::CaptureFailed(e.to_string())).await);
            }
        };
        info!(image_id = %image.id, bytes = image.bytes.len(), "Image captured");
        self.set_state(PipelineState::Captured {
            image: image.clone(),
        })
        .await;

        let (image, record) = self.analyze(image).await?;
        self.persist(image, record).await.map(ScanOutcome::Persisted)
    }

    /// Re-submit the captured image after a failed analysis.
    pub async fn retry_analysis(&self) -> Result<TongueAnalysisRecord, PipelineError> {
        let _flight = self.in_flight.try_lock().map_err(|_| PipelineError::Busy)?;
        let image = match &self.shared.read().await.state {
            PipelineState::Captured { image } => image.clone(),
            other => return Err(invalid_state("retry analysis", other)),
        };
        info!(image_id = %image.id, "Retrying analysis");
        self.clear_error().await;

        let (image, record) = self.analyze(image).await?;
        self.persist(image, record).await
    }

    /// Save the retained result again. Never calls the analysis service.
    pub async fn retry_persistence(&self) -> Result<TongueAnalysisRecord, PipelineError> {
        let _flight = self.in_flight.try_lock().map_err(|_| PipelineError::Busy)?;
        let (image, record) = match &self.shared.read().await.state {
            PipelineState::Analyzed { image, record } => (image.clone(), record.clone()),
            other => return Err(invalid_state("retry saving", other)),
        };
        info!(record_id = %record.id, "Retrying persistence");
        self.clear_error().await;
        self.persist(image, record).await
    }

    /// Abandon the current flow and any retained image or result.
    pub async fn reset(&self) -> Result<(), PipelineError> {
        let _flight = self.in_flight.try_lock().map_err(|_| PipelineError::Busy)?;
        self.clear_error().await;
        self.set_state(PipelineState::Idle).await;
        info!("Scan pipeline reset");
        Ok(())
    }

    /// Current user's stats, after any pending recompute has finished.
    /// `None` without a signed-in user or profile.
    pub async fn health_stats(&self) -> Result<Option<HealthStats>, StoreError> {
        {
            // Held across the await so no new recompute slips in unchained.
            let mut slot = self.stats_task.lock().await;
            if let Some(handle) = slot.take()
                && let Err(e) = handle.await
            {
                warn!(error = %e, "Stats recompute task failed");
            }
        }

        let Some(user_id) = self.auth.current_user_id() else {
            return Ok(None);
        };
        match self.store.read_profile(&user_id).await {
            Ok(profile) => Ok(Some(profile.health_stats)),
            Err(StoreError::ProfileNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // ── Stages ──────────────────────────────────────────────────────

    async fn analyze(
        &self,
        image: CapturedImage,
    ) -> Result<(CapturedImage, TongueAnalysisRecord), PipelineError> {
        self.set_state(PipelineState::Analyzing {
            image: image.clone(),
        })
        .await;
        debug!(image_id = %image.id, service = self.analysis.name(), "Submitting for analysis");

        let outcome =
            tokio::time::timeout(self.config.analysis_timeout, self.analysis.analyze(&image)).await;
        let error = match outcome {
            Ok(Ok(result)) => {
                let record =
                    TongueAnalysisRecord::new(result, image.reference.clone(), self.clock.now());
                info!(
                    image_id = %image.id,
                    record_id = %record.id,
                    confidence = record.result.confidence,
                    "Analysis succeeded"
                );
                self.set_state(PipelineState::Analyzed {
                    image: image.clone(),
                    record: record.clone(),
                })
                .await;
                return Ok((image, record));
            }
            Ok(Err(e)) => PipelineError::AnalysisFailed(e.to_string()),
            Err(_) => PipelineError::analysis_timeout(self.config.analysis_timeout),
        };

        self.set_state(PipelineState::Captured { image }).await;
        Err(self.fail(error).await)
    }

    async fn persist(
        &self,
        image: CapturedImage,
        record: TongueAnalysisRecord,
    ) -> Result<TongueAnalysisRecord, PipelineError> {
        let Some(user_id) = self.auth.current_user_id() else {
            return Err(self.fail(PipelineError::NotAuthenticated).await);
        };

        self.set_state(PipelineState::Persisting {
            image: image.clone(),
            record: record.clone(),
        })
        .await;

        let outcome = tokio::time::timeout(
            self.config.persistence_timeout,
            self.store.append_diagnosis_record(&user_id, &record),
        )
        .await;
        let error = match outcome {
            Ok(Ok(())) => {
                info!(user_id = %user_id, record_id = %record.id, "Analysis record saved");
                {
                    let mut shared = self.shared.write().await;
                    shared.latest_record = Some(record.clone());
                }
                self.set_state(PipelineState::Idle).await;
                let _ = self.events.send(PipelineEvent::Persisted {
                    record: record.clone(),
                });
                self.spawn_stats_recompute(user_id).await;
                self.wizard.jump_to(Step::ScanResults).await;
                return Ok(record);
            }
            Ok(Err(e)) => PipelineError::PersistenceFailed(e.to_string()),
            Err(_) => PipelineError::persistence_timeout(self.config.persistence_timeout),
        };

        self.set_state(PipelineState::Analyzed { image, record }).await;
        Err(self.fail(error).await)
    }

    /// Recomputes run one after another: each waits for the previous one
    /// before reading, so the last write always reflects the full history
    /// and awaiting the newest handle covers every earlier one.
    async fn spawn_stats_recompute(&self, user_id: String) {
        let store = self.store.clone();
        let clock = self.clock.clone();
        let limit = self.config.persistence_timeout;
        let mut slot = self.stats_task.lock().await;
        let previous = slot.take();
        let handle = tokio::spawn(async move {
            if let Some(previous) = previous
                && let Err(e) = previous.await
            {
                warn!(error = %e, "Previous stats recompute task failed");
            }
            let recompute = recompute_stats(store.as_ref(), &user_id, clock.as_ref());
            match tokio::time::timeout(limit, recompute).await {
                Ok(Ok(stats)) => debug!(
                    user_id = %user_id,
                    streak = stats.streak_days,
                    total = stats.total_check_ins,
                    "Health stats recomputed"
                ),
                Ok(Err(e)) => warn!(user_id = %user_id, error = %e, "Health stats recompute failed"),
                Err(_) => warn!(
                    user_id = %user_id,
                    timeout_secs = limit.as_secs(),
                    "Health stats recompute timed out"
                ),
            }
        });
        *slot = Some(handle);
    }

    // ── State helpers ───────────────────────────────────────────────

    async fn expect_state<F>(&self, action: &str, allowed: F) -> Result<(), PipelineError>
    where
        F: Fn(&PipelineState) -> bool,
    {
        let shared = self.shared.read().await;
        if allowed(&shared.state) {
            Ok(())
        } else {
            Err(invalid_state(action, &shared.state))
        }
    }

    async fn set_state(&self, state: PipelineState) {
        let (label, loading) = (state.label(), state.is_loading());
        {
            let mut shared = self.shared.write().await;
            debug!(from = %shared.state, to = label, "Pipeline state changed");
            shared.state = state;
        }
        let _ = self
            .events
            .send(PipelineEvent::StateChanged { state: label, loading });
    }

    async fn clear_error(&self) {
        self.shared.write().await.last_error = None;
    }

    /// Record `error` as the visible error and hand it back.
    async fn fail(&self, error: PipelineError) -> PipelineError {
        warn!(kind = error.kind(), error = %error, "Scan step failed");
        self.shared.write().await.last_error = Some(error.clone());
        let _ = self.events.send(PipelineEvent::Failed {
            error: ErrorReport::from(&error),
        });
        error
    }
}

fn invalid_state(action: &str, state: &PipelineState) -> PipelineError {
    PipelineError::InvalidState {
        action: action.to_string(),
        state: state.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use tokio::sync::Notify;

    use crate::analysis::DiagnosisResult;
    use crate::auth::LocalAuthSession;
    use crate::clock::FixedClock;
    use crate::error::{AnalysisServiceError, CaptureError, ErrorAffordance};
    use crate::onboarding::StepForm;
    use crate::profile::{ProfileFields, UserProfile};
    use crate::store::InMemoryProfileStore;

    // ── Mocks ───────────────────────────────────────────────────────

    struct MockCapture {
        permission: std::sync::Mutex<PermissionStatus>,
        grant_on_request: bool,
        cancel: AtomicBool,
        broken: AtomicBool,
    }

    impl MockCapture {
        fn granted() -> Self {
            Self::with(PermissionStatus::Granted, true)
        }

        fn with(permission: PermissionStatus, grant_on_request: bool) -> Self {
            Self {
                permission: std::sync::Mutex::new(permission),
                grant_on_request,
                cancel: AtomicBool::new(false),
                broken: AtomicBool::new(false),
            }
        }

        fn set_permission(&self, status: PermissionStatus) {
            *self.permission.lock().unwrap() = status;
        }
    }

    #[async_trait]
    impl CaptureSource for MockCapture {
        async fn check_permission(&self) -> PermissionStatus {
            *self.permission.lock().unwrap()
        }

        async fn request_permission(&self) -> PermissionStatus {
            let mut permission = self.permission.lock().unwrap();
            if *permission == PermissionStatus::NotDetermined {
                *permission = if self.grant_on_request {
                    PermissionStatus::Granted
                } else {
                    PermissionStatus::Denied
                };
            }
            *permission
        }

        async fn capture(&self) -> Result<CaptureOutcome, CaptureError> {
            if self.broken.load(Ordering::SeqCst) {
                return Err(CaptureError::DeviceUnavailable("camera busy".into()));
            }
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(CaptureOutcome::Cancelled);
            }
            Ok(CaptureOutcome::Captured(
                CapturedImage::new(vec![0xFF, 0xD8, 0xFF], "image/jpeg").with_reference("mem://tongue"),
            ))
        }
    }

    #[derive(Default)]
    struct MockAnalysis {
        calls: AtomicUsize,
        failures_left: AtomicUsize,
        hang: AtomicBool,
        /// When set, `analyze` signals `started` and waits for `release`.
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl MockAnalysis {
        fn failing(times: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(times),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnalysisService for MockAnalysis {
        fn name(&self) -> &str {
            "mock"
        }

        async fn analyze(
            &self,
            _image: &CapturedImage,
        ) -> Result<DiagnosisResult, AnalysisServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some((started, release)) = &self.gate {
                started.notify_one();
                release.notified().await;
            }
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AnalysisServiceError::RequestFailed("connection reset".into()));
            }
            Ok(DiagnosisResult {
                diagnosis: "Balanced".into(),
                confidence: 0.9,
                image_quality: "good".into(),
                recommendations: vec!["Keep hydrated".into()],
                ..Default::default()
            })
        }
    }

    /// In-memory store whose appends can be made to fail and whose writes
    /// can be held up.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryProfileStore,
        append_failures_left: AtomicUsize,
        appends: AtomicUsize,
        /// Holds the first stats write: signals `.0`, waits for `.1`.
        stats_gate: Option<(Arc<Notify>, Arc<Notify>)>,
        stats_writes: AtomicUsize,
        /// Wizard answer writes (anything but stats) never complete.
        hang_answer_writes: AtomicBool,
        answer_write_started: Notify,
    }

    #[async_trait]
    impl ProfileStore for FlakyStore {
        async fn create_profile(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError> {
            self.inner.create_profile(user_id, fields).await
        }

        async fn update_fields(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError> {
            if fields.health_stats.is_some() {
                if self.stats_writes.fetch_add(1, Ordering::SeqCst) == 0
                    && let Some((started, release)) = &self.stats_gate
                {
                    started.notify_one();
                    release.notified().await;
                }
            } else if self.hang_answer_writes.load(Ordering::SeqCst) {
                self.answer_write_started.notify_one();
                std::future::pending::<()>().await;
            }
            self.inner.update_fields(user_id, fields).await
        }

        async fn append_diagnosis_record(
            &self,
            user_id: &str,
            record: &TongueAnalysisRecord,
        ) -> Result<(), StoreError> {
            self.appends.fetch_add(1, Ordering::SeqCst);
            if self
                .append_failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::Connection("write timed out".into()));
            }
            self.inner.append_diagnosis_record(user_id, record).await
        }

        async fn read_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
            self.inner.read_profile(user_id).await
        }
    }

    struct Harness {
        pipeline: Arc<ScanPipeline>,
        capture: Arc<MockCapture>,
        analysis: Arc<MockAnalysis>,
        store: Arc<FlakyStore>,
        auth: Arc<LocalAuthSession>,
        wizard: WizardController,
    }

    async fn harness_with(
        capture: MockCapture,
        analysis: MockAnalysis,
        store: FlakyStore,
        config: PipelineConfig,
    ) -> Harness {
        let capture = Arc::new(capture);
        let analysis = Arc::new(analysis);
        let store = Arc::new(store);
        let auth = Arc::new(LocalAuthSession::signed_in("u1"));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::utc(
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap(),
        ));
        store
            .create_profile("u1", &ProfileFields::default())
            .await
            .unwrap();

        let wizard =
            WizardController::new(Step::TongueScan, store.clone(), auth.clone(), clock.clone());
        let pipeline = Arc::new(ScanPipeline::new(
            PipelineDeps {
                capture: capture.clone(),
                analysis: analysis.clone(),
                store: store.clone(),
                auth: auth.clone(),
                clock,
            },
            wizard.clone(),
            config,
        ));
        Harness {
            pipeline,
            capture,
            analysis,
            store,
            auth,
            wizard,
        }
    }

    async fn harness(analysis: MockAnalysis, store: FlakyStore) -> Harness {
        harness_with(MockCapture::granted(), analysis, store, PipelineConfig::default()).await
    }

    async fn history_len(h: &Harness) -> usize {
        h.store.read_profile("u1").await.unwrap().analysis_history.len()
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn happy_path_persists_and_jumps_to_results() {
        let h = harness(MockAnalysis::default(), FlakyStore::default()).await;
        let mut events = h.pipeline.subscribe();

        let outcome = h.pipeline.start_scan().await.unwrap();
        let ScanOutcome::Persisted(record) = outcome else {
            panic!("expected a persisted record");
        };
        assert_eq!(record.result.diagnosis, "Balanced");
        assert_eq!(record.image_ref.as_deref(), Some("mem://tongue"));

        let status = h.pipeline.status().await;
        assert_eq!(status.state, "idle");
        assert!(!status.loading);
        assert!(status.last_error.is_none());
        assert_eq!(status.latest_record.as_ref().map(|r| r.id), Some(record.id));

        assert_eq!(h.wizard.current_step().await, Step::ScanResults);
        assert_eq!(history_len(&h).await, 1);

        let stats = h.pipeline.health_stats().await.unwrap().unwrap();
        assert_eq!(stats.total_check_ins, 1);
        assert_eq!(stats.streak_days, 1);

        let mut saw_persisted = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, PipelineEvent::Persisted { .. }) {
                saw_persisted = true;
            }
        }
        assert!(saw_persisted);
    }

    #[tokio::test]
    async fn analysis_failure_then_retry_stores_one_record() {
        let h = harness(MockAnalysis::failing(1), FlakyStore::default()).await;

        let err = h.pipeline.start_scan().await.unwrap_err();
        assert!(matches!(err, PipelineError::AnalysisFailed(_)));
        let status = h.pipeline.status().await;
        assert_eq!(status.state, "captured");
        let report = status.last_error.unwrap();
        assert_eq!(report.kind, "analysis_failed");
        assert_eq!(report.affordance, ErrorAffordance::Retry);
        assert_eq!(history_len(&h).await, 0);
        assert_eq!(h.wizard.current_step().await, Step::TongueScan);

        h.pipeline.retry_analysis().await.unwrap();
        assert_eq!(h.analysis.calls(), 2);
        assert_eq!(history_len(&h).await, 1);
        assert!(h.pipeline.status().await.last_error.is_none());
    }

    #[tokio::test]
    async fn persistence_failure_then_retry_reuses_result() {
        let store = FlakyStore {
            append_failures_left: AtomicUsize::new(1),
            ..Default::default()
        };
        let h = harness(MockAnalysis::default(), store).await;

        let err = h.pipeline.start_scan().await.unwrap_err();
        assert!(matches!(err, PipelineError::PersistenceFailed(_)));
        let status = h.pipeline.status().await;
        assert_eq!(status.state, "analyzed");
        assert_eq!(
            status.pending_result.map(|r| r.diagnosis),
            Some("Balanced".to_string())
        );

        let record = h.pipeline.retry_persistence().await.unwrap();
        assert_eq!(h.analysis.calls(), 1);
        assert_eq!(h.store.appends.load(Ordering::SeqCst), 2);
        let history = h.store.read_profile("u1").await.unwrap().analysis_history;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, record.id);
    }

    #[tokio::test]
    async fn not_authenticated_skips_store_and_keeps_result() {
        let h = harness(MockAnalysis::default(), FlakyStore::default()).await;
        h.auth.sign_out();

        let err = h.pipeline.start_scan().await.unwrap_err();
        assert_eq!(err, PipelineError::NotAuthenticated);
        assert_eq!(err.affordance(), ErrorAffordance::SignIn);
        assert_eq!(h.store.appends.load(Ordering::SeqCst), 0);
        assert_eq!(h.pipeline.status().await.state, "analyzed");

        h.auth.sign_in("u1");
        h.pipeline.retry_persistence().await.unwrap();
        assert_eq!(h.analysis.calls(), 1);
        assert_eq!(history_len(&h).await, 1);
    }

    #[tokio::test]
    async fn permission_denied_then_granted_allows_fresh_scan() {
        let h = harness_with(
            MockCapture::with(PermissionStatus::NotDetermined, false),
            MockAnalysis::default(),
            FlakyStore::default(),
            PipelineConfig::default(),
        )
        .await;

        let err = h.pipeline.start_scan().await.unwrap_err();
        assert_eq!(err, PipelineError::PermissionDenied);
        let status = h.pipeline.status().await;
        assert_eq!(status.state, "permission_denied");
        assert_eq!(
            status.last_error.unwrap().affordance,
            ErrorAffordance::OpenSettings
        );
        assert_eq!(h.analysis.calls(), 0);

        // User flips the switch in settings.
        h.capture.set_permission(PermissionStatus::Granted);
        assert!(matches!(
            h.pipeline.start_scan().await.unwrap(),
            ScanOutcome::Persisted(_)
        ));
    }

    #[tokio::test]
    async fn cancelled_capture_returns_to_idle() {
        let h = harness(MockAnalysis::default(), FlakyStore::default()).await;
        h.capture.cancel.store(true, Ordering::SeqCst);

        assert_eq!(h.pipeline.start_scan().await.unwrap(), ScanOutcome::Cancelled);
        let status = h.pipeline.status().await;
        assert_eq!(status.state, "idle");
        assert!(status.last_error.is_none());
        assert_eq!(h.analysis.calls(), 0);
    }

    #[tokio::test]
    async fn capture_device_failure_is_reported() {
        let h = harness(MockAnalysis::default(), FlakyStore::default()).await;
        h.capture.broken.store(true, Ordering::SeqCst);

        let err = h.pipeline.start_scan().await.unwrap_err();
        assert!(matches!(err, PipelineError::CaptureFailed(_)));
        assert_eq!(h.pipeline.status().await.state, "idle");
    }

    #[tokio::test]
    async fn second_operation_while_analyzing_is_busy() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let analysis = MockAnalysis {
            gate: Some((started.clone(), release.clone())),
            ..Default::default()
        };
        let h = harness(analysis, FlakyStore::default()).await;

        let pipeline = h.pipeline.clone();
        let first = tokio::spawn(async move { pipeline.start_scan().await });
        started.notified().await;

        let status = h.pipeline.status().await;
        assert_eq!(status.state, "analyzing");
        assert!(status.loading);
        assert_eq!(h.pipeline.start_scan().await, Err(PipelineError::Busy));
        assert_eq!(h.pipeline.reset().await, Err(PipelineError::Busy));
        assert_eq!(h.pipeline.retry_analysis().await, Err(PipelineError::Busy));

        release.notify_one();
        assert!(matches!(
            first.await.unwrap().unwrap(),
            ScanOutcome::Persisted(_)
        ));
        assert_eq!(h.analysis.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_analysis_times_out() {
        let analysis = MockAnalysis::default();
        analysis.hang.store(true, Ordering::SeqCst);
        let config = PipelineConfig {
            analysis_timeout: Duration::from_secs(3),
            ..Default::default()
        };
        let h = harness_with(MockCapture::granted(), analysis, FlakyStore::default(), config).await;

        let err = h.pipeline.start_scan().await.unwrap_err();
        assert_eq!(err, PipelineError::analysis_timeout(Duration::from_secs(3)));
        assert_eq!(h.pipeline.status().await.state, "captured");
        assert!(!h.pipeline.status().await.loading);
    }

    #[tokio::test]
    async fn overlapping_stats_recomputes_end_on_full_history() {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let store = FlakyStore {
            stats_gate: Some((started.clone(), release.clone())),
            ..Default::default()
        };
        let h = harness(MockAnalysis::default(), store).await;

        h.pipeline.start_scan().await.unwrap();
        // First recompute has read a one-record history and is stuck writing.
        started.notified().await;
        h.pipeline.start_scan().await.unwrap();
        release.notify_one();

        let stats = h.pipeline.health_stats().await.unwrap().unwrap();
        assert_eq!(stats.total_check_ins, 2);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let profile = h.store.read_profile("u1").await.unwrap();
        assert_eq!(profile.analysis_history.len(), 2);
        assert_eq!(profile.health_stats.total_check_ins, 2);
        assert_eq!(h.store.stats_writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scan_completes_while_wizard_answer_write_hangs() {
        let store = FlakyStore::default();
        store.hang_answer_writes.store(true, Ordering::SeqCst);
        let h = harness(MockAnalysis::default(), store).await;
        let wizard = h.wizard.clone().with_write_timeout(Duration::from_secs(2));
        wizard.jump_to(Step::Name).await;
        wizard
            .update_form(StepForm::Name { name: "Ana".into() })
            .await
            .unwrap();
        let advance = tokio::spawn(async move { wizard.advance().await });
        h.store.answer_write_started.notified().await;

        let outcome = tokio::time::timeout(Duration::from_secs(30), h.pipeline.start_scan())
            .await
            .expect("scan stuck behind the wizard");
        assert!(matches!(outcome, Ok(ScanOutcome::Persisted(_))));
        assert!(advance.await.unwrap().is_ok());
        assert_eq!(h.wizard.current_step().await, Step::ScanResults);
        assert_eq!(h.pipeline.status().await.state, "idle");
    }

    #[tokio::test]
    async fn retries_require_matching_state() {
        let h = harness(MockAnalysis::default(), FlakyStore::default()).await;
        assert!(matches!(
            h.pipeline.retry_persistence().await,
            Err(PipelineError::InvalidState { .. })
        ));
        assert!(matches!(
            h.pipeline.retry_analysis().await,
            Err(PipelineError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn retake_discards_captured_image() {
        let h = harness(MockAnalysis::failing(1), FlakyStore::default()).await;
        h.pipeline.start_scan().await.unwrap_err();
        assert!(h.pipeline.status().await.image_id.is_some());

        h.pipeline.start_scan().await.unwrap();
        assert_eq!(h.analysis.calls(), 2);
        let history = h.store.read_profile("u1").await.unwrap().analysis_history;
        assert_eq!(history.len(), 1);
        assert!(h.pipeline.status().await.image_id.is_none());
    }

    #[tokio::test]
    async fn reset_clears_retained_result() {
        let store = FlakyStore {
            append_failures_left: AtomicUsize::new(1),
            ..Default::default()
        };
        let h = harness(MockAnalysis::default(), store).await;
        h.pipeline.start_scan().await.unwrap_err();

        h.pipeline.reset().await.unwrap();
        let status = h.pipeline.status().await;
        assert_eq!(status.state, "idle");
        assert!(status.pending_result.is_none());
        assert!(status.last_error.is_none());
    }
}
