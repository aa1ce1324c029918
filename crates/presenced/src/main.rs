use anyhow::{Context, Result};
use presence_core::{
    BudgetedOracle, DetectionSource, RecognitionOracle, Reconciler, ReplaySource, Roster,
    RosterOracle, ZoneMap,
};
use presence_ledger::{PresenceLedger, SessionStore};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod render;

use config::Config;
use engine::Pipeline;
use render::LogRenderer;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        roster = %config.roster_path.display(),
        max_match_distance = config.max_match_distance,
        eviction_threshold = config.eviction_threshold,
        accept_distance = config.accept_distance,
        "configuration loaded"
    );

    let roster = Roster::load(&config.roster_path)
        .with_context(|| format!("loading roster {}", config.roster_path.display()))?;
    if roster.is_empty() {
        tracing::warn!("roster is empty; everyone will be tracked as Unknown");
    }

    let oracle: Box<dyn RecognitionOracle + Send> = match config.recognition_budget() {
        Some(budget) => Box::new(BudgetedOracle::spawn(
            move || RosterOracle::new(roster.clone()),
            budget,
        )?),
        None => Box::new(RosterOracle::new(roster)),
    };

    let mut reconciler = Reconciler::new(config.reconciler_config(), oracle);
    if let Some(path) = &config.zones_path {
        let zones = ZoneMap::load(path)
            .with_context(|| format!("loading zone map {}", path.display()))?;
        reconciler = reconciler.with_zones(Box::new(zones));
    }

    let store = SessionStore::open(&config.db_path)
        .with_context(|| format!("opening ledger {}", config.db_path.display()))?;
    let ledger = PresenceLedger::open(store, chrono::Utc::now())?;

    let source: Box<dyn DetectionSource + Send> = match &config.source_path {
        Some(path) => Box::new(ReplaySource::open(path)?.with_nms_overlap(config.nms_overlap())),
        None => {
            tracing::info!("reading detections from stdin");
            Box::new(
                ReplaySource::new(std::io::BufReader::new(std::io::stdin()))
                    .with_nms_overlap(config.nms_overlap()),
            )
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let (reply_tx, reply_rx) = oneshot::channel();
    engine::spawn_engine(
        Pipeline::new(reconciler, ledger, LogRenderer),
        source,
        stop.clone(),
        config.frame_interval(),
        reply_tx,
    )?;

    tracing::info!("presenced ready");

    // Stop is observed between frames; the engine closes open sessions on its way out.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop signal received");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let summary = reply_rx.await.context("engine thread exited")??;
    tracing::info!(
        frames = summary.frames,
        dropped = summary.dropped_detections,
        anomalies = summary.anomalies,
        closed_at_shutdown = summary.closed_at_shutdown,
        "presenced shutting down"
    );

    Ok(())
}
