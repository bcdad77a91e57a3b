//! WebSocket stream + REST endpoints for the onboarding wizard and scan.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use super::controller::{WizardController, WizardEvent, WizardSnapshot};
use super::form::StepForm;
use crate::error::{ErrorAffordance, PipelineError, StoreError, WizardError};
use crate::pipeline::{PipelineEvent, PipelineStatus, ScanOutcome, ScanPipeline};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub wizard: WizardController,
    pub pipeline: Arc<ScanPipeline>,
}

/// Build the router with the WebSocket stream and REST routes.
pub fn app_routes(wizard: WizardController, pipeline: Arc<ScanPipeline>) -> Router {
    let state = AppState { wizard, pipeline };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/onboarding/status", get(onboarding_status))
        .route("/api/onboarding/form", put(update_form))
        .route("/api/onboarding/advance", post(advance))
        .route("/api/onboarding/retreat", post(retreat))
        .route("/api/onboarding/skip", post(skip))
        .route("/api/onboarding/jump", post(jump))
        .route("/api/scan/status", get(scan_status))
        .route("/api/scan/start", post(start_scan))
        .route("/api/scan/retry-analysis", post(retry_analysis))
        .route("/api/scan/retry-persist", post(retry_persist))
        .route("/api/scan/reset", post(reset_scan))
        .route("/api/profile/stats", get(profile_stats))
        .with_state(state)
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Handler error, rendered as `{"error", "kind", "affordance"}`.
#[derive(Debug)]
pub enum ApiError {
    Wizard(WizardError),
    Pipeline(PipelineError),
    Store(StoreError),
}

impl From<WizardError> for ApiError {
    fn from(e: WizardError) -> Self {
        Self::Wizard(e)
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, affordance, message) = match &self {
            Self::Wizard(e) => {
                let (status, kind) = match e {
                    WizardError::InvalidStep { .. } => (StatusCode::BAD_REQUEST, "invalid_step"),
                    WizardError::AtTerminalStep => (StatusCode::CONFLICT, "at_terminal_step"),
                    WizardError::GateClosed { .. } => (StatusCode::CONFLICT, "gate_closed"),
                    WizardError::FormMismatch { .. } => {
                        (StatusCode::UNPROCESSABLE_ENTITY, "form_mismatch")
                    }
                };
                (status, kind, ErrorAffordance::None, e.to_string())
            }
            Self::Pipeline(e) => {
                let status = match e {
                    PipelineError::PermissionDenied => StatusCode::FORBIDDEN,
                    PipelineError::NotAuthenticated => StatusCode::UNAUTHORIZED,
                    PipelineError::Busy | PipelineError::InvalidState { .. } => StatusCode::CONFLICT,
                    PipelineError::CaptureFailed(_) | PipelineError::AnalysisFailed(_) => {
                        StatusCode::BAD_GATEWAY
                    }
                    PipelineError::PersistenceFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
                };
                (status, e.kind(), e.affordance(), e.to_string())
            }
            Self::Store(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "store",
                ErrorAffordance::Retry,
                e.to_string(),
            ),
        };

        (
            status,
            Json(serde_json::json!({
                "error": message,
                "kind": kind,
                "affordance": affordance,
            })),
        )
            .into_response()
    }
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tongue-check"
    }))
}

// ── Onboarding ──────────────────────────────────────────────────────────

async fn onboarding_status(State(state): State<AppState>) -> Json<WizardSnapshot> {
    Json(state.wizard.snapshot().await)
}

async fn update_form(
    State(state): State<AppState>,
    Json(form): Json<StepForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let can_advance = state.wizard.update_form(form).await?;
    Ok(Json(serde_json::json!({ "can_advance": can_advance })))
}

async fn advance(State(state): State<AppState>) -> Result<Json<WizardSnapshot>, ApiError> {
    state.wizard.advance().await?;
    Ok(Json(state.wizard.snapshot().await))
}

async fn retreat(State(state): State<AppState>) -> Json<WizardSnapshot> {
    state.wizard.retreat().await;
    Json(state.wizard.snapshot().await)
}

async fn skip(State(state): State<AppState>) -> Json<WizardSnapshot> {
    state.wizard.skip_to_main().await;
    Json(state.wizard.snapshot().await)
}

#[derive(Debug, Deserialize)]
struct JumpRequest {
    step: u8,
}

async fn jump(
    State(state): State<AppState>,
    Json(body): Json<JumpRequest>,
) -> Result<Json<WizardSnapshot>, ApiError> {
    state.wizard.jump_to_id(body.step).await?;
    Ok(Json(state.wizard.snapshot().await))
}

// ── Scan ────────────────────────────────────────────────────────────────

async fn scan_status(State(state): State<AppState>) -> Json<PipelineStatus> {
    Json(state.pipeline.status().await)
}

async fn start_scan(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let body = match state.pipeline.start_scan().await? {
        ScanOutcome::Cancelled => serde_json::json!({ "outcome": "cancelled" }),
        ScanOutcome::Persisted(record) => {
            serde_json::json!({ "outcome": "persisted", "record": record })
        }
    };
    Ok(Json(body))
}

async fn retry_analysis(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.pipeline.retry_analysis().await?;
    Ok(Json(serde_json::json!({ "outcome": "persisted", "record": record })))
}

async fn retry_persist(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let record = state.pipeline.retry_persistence().await?;
    Ok(Json(serde_json::json!({ "outcome": "persisted", "record": record })))
}

async fn reset_scan(State(state): State<AppState>) -> Result<Json<PipelineStatus>, ApiError> {
    state.pipeline.reset().await?;
    Ok(Json(state.pipeline.status().await))
}

async fn profile_stats(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.pipeline.health_stats().await? {
        Some(stats) => Ok(Json(stats).into_response()),
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "No profile for the current user"})),
        )
            .into_response()),
    }
}

// ── WebSocket ───────────────────────────────────────────────────────────

/// Server → client frames.
#[derive(Debug, Serialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum WsMessage {
    Sync {
        wizard: WizardSnapshot,
        scan: PipelineStatus,
    },
    Wizard {
        event: WizardEvent,
    },
    Scan {
        event: PipelineEvent,
    },
}

/// Client → server frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientAction {
    UpdateForm { form: StepForm },
    Advance,
    Retreat,
    StartScan,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn sync_message(state: &AppState) -> WsMessage {
    WsMessage::Sync {
        wizard: state.wizard.snapshot().await,
        scan: state.pipeline.status().await,
    }
}

async fn send_json(socket: &mut WebSocket, msg: &WsMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS message");
            true
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("WebSocket client connected");

    // Subscribe before the initial sync so nothing falls in between.
    let mut wizard_rx = state.wizard.subscribe();
    let mut scan_rx = state.pipeline.subscribe();

    if !send_json(&mut socket, &sync_message(&state).await).await {
        warn!("Failed to send initial sync, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = wizard_rx.recv() => {
                let msg = match result {
                    Ok(event) => WsMessage::Wizard { event },
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind wizard events");
                        sync_message(&state).await
                    }
                    Err(RecvError::Closed) => {
                        debug!("Wizard event channel closed");
                        break;
                    }
                };
                if !send_json(&mut socket, &msg).await {
                    debug!("Client disconnected during send");
                    break;
                }
            }

            result = scan_rx.recv() => {
                let msg = match result {
                    Ok(event) => WsMessage::Scan { event },
                    Err(RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind scan events");
                        sync_message(&state).await
                    }
                    Err(RecvError::Closed) => {
                        debug!("Scan event channel closed");
                        break;
                    }
                };
                if !send_json(&mut socket, &msg).await {
                    debug!("Client disconnected during send");
                    break;
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &state);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

/// Apply a client action. Runs detached so a long scan never stalls the
/// event stream; results arrive as broadcast events.
fn handle_client_message(text: &str, state: &AppState) {
    let action = match serde_json::from_str::<ClientAction>(text) {
        Ok(action) => action,
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
            return;
        }
    };

    let state = state.clone();
    tokio::spawn(async move {
        match action {
            ClientAction::UpdateForm { form } => {
                if let Err(e) = state.wizard.update_form(form).await {
                    warn!(error = %e, "Form update via WS rejected");
                }
            }
            ClientAction::Advance => {
                if let Err(e) = state.wizard.advance().await {
                    warn!(error = %e, "Advance via WS rejected");
                }
            }
            ClientAction::Retreat => {
                state.wizard.retreat().await;
            }
            ClientAction::StartScan => {
                if let Err(e) = state.pipeline.start_scan().await {
                    warn!(kind = e.kind(), error = %e, "Scan via WS failed");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisService, DiagnosisResult};
    use crate::auth::LocalAuthSession;
    use crate::capture::{CapturedImage, FileCaptureSource, PermissionStatus};
    use crate::clock::{Clock, FixedClock};
    use crate::config::PipelineConfig;
    use crate::error::AnalysisServiceError;
    use crate::onboarding::Step;
    use crate::pipeline::PipelineDeps;
    use crate::store::{InMemoryProfileStore, ProfileStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use tower::ServiceExt;

    struct UnreachableAnalysis;

    #[async_trait]
    impl AnalysisService for UnreachableAnalysis {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn analyze(&self, _: &CapturedImage) -> Result<DiagnosisResult, AnalysisServiceError> {
            Err(AnalysisServiceError::RequestFailed("connection refused".into()))
        }
    }

    fn app(entry: Step, capture: FileCaptureSource) -> Router {
        let store: Arc<dyn ProfileStore> = Arc::new(InMemoryProfileStore::new());
        let auth = Arc::new(LocalAuthSession::signed_in("u1"));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::utc(
            Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
        ));
        let wizard = WizardController::new(entry, store.clone(), auth.clone(), clock.clone());
        let pipeline = Arc::new(ScanPipeline::new(
            PipelineDeps {
                capture: Arc::new(capture),
                analysis: Arc::new(UnreachableAnalysis),
                store,
                auth,
                clock,
            },
            wizard.clone(),
            PipelineConfig::default(),
        ));
        app_routes(wizard, pipeline)
    }

    fn missing_capture() -> FileCaptureSource {
        FileCaptureSource::new("/nonexistent/tongue.jpg").with_permission(PermissionStatus::Granted)
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(app(Step::SignInChoice, missing_capture()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn status_shows_entry_step() {
        let (status, body) = call(
            app(Step::SignInChoice, missing_capture()),
            "GET",
            "/api/onboarding/status",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current"], "sign_in_choice");
        assert_eq!(body["step_id"], 0);
        assert_eq!(body["can_advance"], false);
        assert_eq!(body["form"]["step"], "sign_in_choice");
    }

    #[tokio::test]
    async fn advance_with_closed_gate_conflicts() {
        let (status, body) = call(
            app(Step::Name, missing_capture()),
            "POST",
            "/api/onboarding/advance",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "gate_closed");
    }

    #[tokio::test]
    async fn form_for_wrong_step_is_unprocessable() {
        let (status, body) = call(
            app(Step::Name, missing_capture()),
            "PUT",
            "/api/onboarding/form",
            Some(r#"{"step": "phone", "number": "5551234567"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "form_mismatch");
    }

    #[tokio::test]
    async fn form_update_then_advance() {
        let app = app(Step::Name, missing_capture());
        let (status, body) = call(
            app.clone(),
            "PUT",
            "/api/onboarding/form",
            Some(r#"{"step": "name", "name": "Ana"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["can_advance"], true);

        let (status, body) = call(app, "POST", "/api/onboarding/advance", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current"], "birth_date");
        assert_eq!(body["history"][0], "name");
    }

    #[tokio::test]
    async fn jump_validates_step_id() {
        let app = app(Step::SignInChoice, missing_capture());
        let (status, body) = call(app.clone(), "POST", "/api/onboarding/jump", Some(r#"{"step": 42}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "invalid_step");

        let (status, body) = call(app, "POST", "/api/onboarding/jump", Some(r#"{"step": 7}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current"], "scan_intro");
    }

    #[tokio::test]
    async fn skip_lands_on_main_app() {
        let (_, body) = call(app(Step::Goals, missing_capture()), "POST", "/api/onboarding/skip", None).await;
        assert_eq!(body["current"], "main_app");
        assert_eq!(body["complete"], true);
    }

    #[tokio::test]
    async fn cancelled_scan_is_not_an_error() {
        let app = app(Step::TongueScan, missing_capture());
        let (status, body) = call(app.clone(), "POST", "/api/scan/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "cancelled");

        let (_, body) = call(app, "GET", "/api/scan/status", None).await;
        assert_eq!(body["state"], "idle");
        assert_eq!(body["loading"], false);
    }

    #[tokio::test]
    async fn analysis_failure_maps_to_bad_gateway_with_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tongue.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xE0]).unwrap();
        let capture = FileCaptureSource::new(&path).with_permission(PermissionStatus::Granted);
        let app = app(Step::TongueScan, capture);

        let (status, body) = call(app.clone(), "POST", "/api/scan/start", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["kind"], "analysis_failed");
        assert_eq!(body["affordance"], "retry");

        let (_, body) = call(app.clone(), "GET", "/api/scan/status", None).await;
        assert_eq!(body["state"], "captured");
        assert_eq!(body["last_error"]["kind"], "analysis_failed");

        let (status, body) = call(app, "POST", "/api/scan/retry-persist", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "invalid_state");
    }

    #[tokio::test]
    async fn stats_without_profile_is_not_found() {
        let (status, _) = call(app(Step::MainApp, missing_capture()), "GET", "/api/profile/stats", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
