use anyhow::{Context, Result};
use rollcall_core::{enroll, Config, CooldownTracker, Orchestrator};
use rollcall_hw::Camera;
use rollcall_models::OnnxEmbedder;
use tracing_subscriber::EnvFilter;

mod engine;

use engine::{EngineSettings, EngineStatus};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let mut embedder = OnnxEmbedder::load(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("loading face models")?;

    // Fail fast: no recognition is meaningful without enrolled identities.
    let gallery = enroll::load_gallery(&config.enrollment_dir, &mut embedder)
        .context("enrolling known faces")?;

    let camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening camera {}", config.camera_device))?;

    let orchestrator = Orchestrator::new(
        gallery,
        embedder,
        config.match_tolerance,
        CooldownTracker::from_secs(config.cooldown_seconds),
    );
    let settings = EngineSettings {
        ledger_dir: config.ledger_dir.clone(),
        date: chrono::Local::now().date_naive(),
        warmup_frames: config.warmup_frames,
    };

    let (handle, mut done) = engine::spawn_engine(camera, orchestrator, settings);
    tracing::info!(
        cooldown_secs = config.cooldown_seconds,
        ledger_dir = %config.ledger_dir.display(),
        "rollcalld ready"
    );

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("rollcalld shutting down");
            if let Ok(status) = handle.status().await {
                tracing::info!(status = %status_json(&status), "final live status");
            }
            // The engine may already be gone; `done` still carries its result.
            let _ = handle.stop().await;
            done.await
        }
        result = &mut done => result,
    };

    let status = outcome
        .context("engine thread vanished")?
        .context("attendance engine failed")?;
    tracing::info!(status = %status_json(&status), "rollcalld stopped");
    Ok(())
}

fn status_json(status: &EngineStatus) -> String {
    serde_json::to_string(status).unwrap_or_default()
}
