use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;

use tongue_check::analysis::HttpAnalysisService;
use tongue_check::auth::{AuthSession, LocalAuthSession};
use tongue_check::capture::FileCaptureSource;
use tongue_check::clock::{Clock, SystemClock};
use tongue_check::config::AppConfig;
use tongue_check::error::StoreError;
use tongue_check::onboarding::{CachedHints, WizardController, app_routes, resolve_entry_step};
use tongue_check::pipeline::{PipelineDeps, ScanPipeline};
use tongue_check::profile::ProfileFields;
use tongue_check::store::{InMemoryProfileStore, LibSqlProfileStore, ProfileStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let analysis_url = config.require_analysis_url()?.to_string();

    eprintln!("👅 Tongue Check v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Analysis: {}", analysis_url);
    eprintln!("   Capture:  {}", config.capture_path.display());
    eprintln!("   API:      http://0.0.0.0:{}/api/onboarding/status", config.listen_port);
    eprintln!("   WS:       ws://0.0.0.0:{}/ws", config.listen_port);

    // ── Profile store ───────────────────────────────────────────────────
    let store: Arc<dyn ProfileStore> = if config.db_path == ":memory:" {
        eprintln!("   Database: in-memory (profiles are lost on exit)");
        Arc::new(InMemoryProfileStore::new())
    } else {
        let store = LibSqlProfileStore::new_local(Path::new(&config.db_path))
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path))?;
        eprintln!("   Database: {}", config.db_path);
        Arc::new(store)
    };

    // ── Session ─────────────────────────────────────────────────────────
    let auth = Arc::new(match config.user_id.clone() {
        Some(user_id) => LocalAuthSession::signed_in(user_id),
        None => LocalAuthSession::new(),
    });

    let mut hints = CachedHints::default();
    if let Some(user_id) = auth.current_user_id() {
        match store.create_profile(&user_id, &ProfileFields::default()).await {
            Ok(()) => tracing::info!(user_id = %user_id, "Created empty profile"),
            Err(StoreError::ProfileExists { .. }) => {
                let profile = store.read_profile(&user_id).await?;
                hints.name = profile.name;
                hints.phone = profile.phone;
            }
            Err(e) => return Err(e).context("Failed to prepare user profile"),
        }
        eprintln!("   User:     {}", user_id);
    } else {
        eprintln!("   User:     (signed out)");
    }

    // ── Wizard + pipeline ───────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let entry = resolve_entry_step(auth.as_ref(), &hints, config.auth_timeout).await;
    eprintln!("   Entry:    {}", entry.display_name());

    let wizard = WizardController::new(entry, Arc::clone(&store), auth.clone(), Arc::clone(&clock))
        .with_write_timeout(config.pipeline.persistence_timeout);
    let pipeline = Arc::new(ScanPipeline::new(
        PipelineDeps {
            capture: Arc::new(FileCaptureSource::new(config.capture_path.clone())),
            analysis: Arc::new(HttpAnalysisService::new(
                analysis_url,
                config.analysis_api_key.clone(),
            )),
            store,
            auth,
            clock,
        },
        wizard.clone(),
        config.pipeline.clone(),
    ));

    // ── Server ──────────────────────────────────────────────────────────
    let app = app_routes(wizard, pipeline).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.listen_port))?;
    tracing::info!(port = config.listen_port, "Server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
