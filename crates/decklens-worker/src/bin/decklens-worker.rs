//! decklens-worker - GPU worker process for DeckLens deck analysis.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use decklens_core::{defaults, Template, WorkerRegistry};
use decklens_db::Database;
use decklens_inference::{OllamaGenerationBackend, OllamaVisionBackend};
use decklens_worker::{
    DeckPipeline, FallbackClassifier, PdfAnalysisHandler, PdftoppmRenderer, ProgressNotifier,
    SpecializedAnalysisHandler, TaskWorker, WorkerConfig,
};

fn load_template() -> anyhow::Result<Option<Template>> {
    let Ok(path) = std::env::var(defaults::ENV_TEMPLATE_PATH) else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read template file {}", path))?;
    let template: Template = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid template JSON in {}", path))?;
    Ok(Some(template))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    //
    // Environment variables:
    //   RUST_LOG - standard env filter (default: "decklens_worker=debug,decklens_db=debug")
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "decklens_worker=debug,decklens_db=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = std::env::var(defaults::ENV_DATABASE_URL)
        .unwrap_or_else(|_| "postgres://localhost/decklens".to_string());

    let db = Database::connect(&database_url).await?;
    db.migrate().await?;
    info!("Database connected and migrated");

    // Inference backends. Vision and analysis models are required; the
    // scoring model falls back to the analysis model when unset.
    let Some(vision) = OllamaVisionBackend::from_env() else {
        bail!("{} must be set", defaults::ENV_VISION_MODEL);
    };
    let Some(analysis) = OllamaGenerationBackend::from_env(defaults::ENV_ANALYSIS_MODEL) else {
        bail!("{} must be set", defaults::ENV_ANALYSIS_MODEL);
    };
    let scoring = OllamaGenerationBackend::from_env(defaults::ENV_SCORING_MODEL)
        .unwrap_or_else(|| {
            OllamaGenerationBackend::from_env(defaults::ENV_ANALYSIS_MODEL)
                .expect("analysis model checked above")
                .with_timeout_secs(defaults::SCORING_TIMEOUT_SECS)
        });

    let mut renderer = PdftoppmRenderer::new();
    if let Ok(slide_dir) = std::env::var(defaults::ENV_SLIDE_DIR) {
        renderer = renderer.with_slide_dir(slide_dir);
    }
    if !renderer.health_check().await {
        bail!("pdftoppm is not available on this host");
    }

    let mut pipeline = DeckPipeline::new(
        Arc::new(db.visual_cache.clone()),
        Arc::new(db.results.clone()),
        Arc::new(vision),
        Arc::new(analysis),
        Arc::new(scoring),
        Arc::new(renderer),
        Arc::new(FallbackClassifier::from_env()),
    );
    if let Some(template) = load_template()? {
        info!(template = %template.name, "Review template loaded");
        pipeline = pipeline.with_template(template);
    }
    if let Some(notifier) = ProgressNotifier::from_env() {
        pipeline = pipeline.with_progress_notifier(notifier);
    }
    let pipeline = Arc::new(pipeline);

    let config = WorkerConfig::from_env();
    let server_id = config.server_id.clone();
    let registry = db.workers.clone();

    let worker = TaskWorker::new(
        Arc::new(db.tasks.clone()),
        Arc::new(db.workers.clone()),
        config,
    );
    worker
        .register_handler(PdfAnalysisHandler::new(pipeline.clone()))
        .await;
    worker
        .register_handler(SpecializedAnalysisHandler::new(pipeline))
        .await;

    let handle = worker.start();
    info!(%server_id, "Worker running, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown().await?;
    // Deregister so our tasks become recoverable immediately instead of
    // waiting out the liveness window.
    registry.remove(&server_id).await?;
    info!("Worker stopped");
    Ok(())
}
