//! Herdwatch sampling service binary.
//!
//! Wires the barn camera feed, the detection client, the dashboard state
//! and the sampling pipeline together, serves the read-only status API,
//! and runs until interrupted.
//!
//! # Architecture
//!
//! ```text
//! Video feed -> GstVideoFeed -> SamplingPipeline -> HttpDetectClient -> Detection service
//!                                      |
//!                                      v
//!                              DashboardState <- status API (web dashboard)
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with HERDWATCH_)
//!
//! See `config.rs` for detailed configuration options.

use herdwatch::api::{start_api_server, ApiState};
use herdwatch::config::{HerdwatchConfig, LoggingConfig};
use herdwatch::detect_client::HttpDetectClient;
use herdwatch::feed::GstVideoFeed;
use herdwatch::pipeline::SamplingPipeline;
use herdwatch::state::DashboardState;

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "herdwatch",
        version = env!("CARGO_PKG_VERSION"),
        feed_id = %config.feed.feed_id,
        "Starting sampling service"
    );

    // Validate configuration
    config.validate()?;

    // Run the service
    match run(config).await {
        Ok(()) => {
            info!("Sampling service completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Sampling service failed");
            Err(e)
        }
    }
}

/// Load and validate configuration.
fn load_config() -> anyhow::Result<HerdwatchConfig> {
    // Try loading from files first, fall back to environment
    let config = HerdwatchConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        HerdwatchConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("herdwatch={}", level).parse()?)
        .add_directive("gstreamer=warn".parse()?)
        .add_directive("reqwest=info".parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Run the sampling service until shutdown.
async fn run(config: HerdwatchConfig) -> anyhow::Result<()> {
    // Shared dashboard state
    let state = Arc::new(DashboardState::new(
        config.dashboard.status_log_capacity,
        config.sampling.reject_stale_results,
    ));

    // Start the video feed
    info!(
        uri = %config.feed.uri,
        feed_id = %config.feed.feed_id,
        "Starting video feed..."
    );
    let feed = Arc::new(GstVideoFeed::new(
        config.feed.clone(),
        config.sampling.target_width,
        config.sampling.target_height,
    )?);
    feed.start().await?;

    // Detection client
    let client = Arc::new(HttpDetectClient::new(&config.detector)?);

    // Sampling pipeline
    let pipeline = Arc::new(SamplingPipeline::new(
        feed.clone(),
        client.clone(),
        state.clone(),
        &config.sampling,
    ));
    state.push_status("video feed started, beginning frame sampling");
    pipeline.start();

    // Status API
    let api_handle = if config.dashboard.enabled {
        let api_state = ApiState {
            dashboard: state.clone(),
        };
        let dashboard_config = config.dashboard.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = start_api_server(api_state, &dashboard_config).await {
                error!(error = %e, "Status API server failed");
            }
        }))
    } else {
        None
    };

    // Periodic stats logging
    let monitor_handle = tokio::spawn({
        let feed = feed.clone();
        let client = client.clone();
        let pipeline = pipeline.clone();
        let interval = config.dashboard.stats_interval();

        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;

                let feed_stats = feed.stats();
                info!(
                    frames_decoded = feed_stats.frames_decoded,
                    frames_sampled = feed_stats.frames_sampled,
                    fps = format!("{:.2}", feed_stats.current_fps),
                    loops_completed = feed_stats.loops_completed,
                    "Feed stats"
                );

                let client_stats = client.stats();
                info!(
                    submissions_sent = client_stats.submissions_sent,
                    submissions_accepted = client_stats.submissions_accepted,
                    submissions_failed = client_stats.submissions_failed,
                    avg_latency_ms = format!("{:.2}", client_stats.avg_latency_ms),
                    "Detection client stats"
                );

                let pipeline_stats = pipeline.stats();
                info!(
                    ticks = pipeline_stats.ticks,
                    skipped_not_ready = pipeline_stats.cycles_skipped_not_ready,
                    results_applied = pipeline_stats.results_applied,
                    "Pipeline stats"
                );
            }
        }
    });

    // Wait for shutdown signal
    signal::ctrl_c().await?;
    info!("Received shutdown signal, initiating graceful shutdown...");

    // Stop the clock; in-flight submissions can no longer mutate the counts
    pipeline.stop().await;

    // Stop the feed
    feed.stop();

    // Stop auxiliary tasks
    monitor_handle.abort();
    if let Some(handle) = api_handle {
        handle.abort();
    }

    // Log final statistics
    log_final_stats(&feed, &client, &pipeline);

    info!("Shutdown complete");
    Ok(())
}

/// Log final statistics on shutdown.
fn log_final_stats(feed: &GstVideoFeed, client: &HttpDetectClient, pipeline: &SamplingPipeline) {
    info!("=== Final Statistics ===");

    let feed_stats = feed.stats();
    info!(
        frames_decoded = feed_stats.frames_decoded,
        bytes_decoded = feed_stats.bytes_decoded,
        frames_sampled = feed_stats.frames_sampled,
        loops_completed = feed_stats.loops_completed,
        "Feed final stats"
    );

    let client_stats = client.stats();
    info!(
        submissions_sent = client_stats.submissions_sent,
        submissions_accepted = client_stats.submissions_accepted,
        submissions_failed = client_stats.submissions_failed,
        avg_latency_ms = format!("{:.2}", client_stats.avg_latency_ms),
        "Detection client final stats"
    );

    let pipeline_stats = pipeline.stats();
    info!(
        ticks = pipeline_stats.ticks,
        skipped_not_ready = pipeline_stats.cycles_skipped_not_ready,
        encode_failures = pipeline_stats.encode_failures,
        results_applied = pipeline_stats.results_applied,
        submission_failures = pipeline_stats.submission_failures,
        "Pipeline final stats"
    );
}
