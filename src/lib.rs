//! Herdwatch - barn camera sampling service for cow posture analytics
//!
//! This library drives a timer-based sampling pipeline over a continuous
//! video feed. At a fixed interval it:
//!
//! - checks feed readiness and captures one still frame,
//! - encodes the frame to JPEG,
//! - submits it to an external cow-detection endpoint as a multipart POST,
//! - folds the returned counts (total / standing / laying) into a shared
//!   dashboard state with a status log and a coarse progress gauge.
//!
//! # Example
//!
//! ```rust,no_run
//! use herdwatch::{DashboardState, HerdwatchConfig, HttpDetectClient, SamplingPipeline};
//! use herdwatch::feed::GstVideoFeed;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HerdwatchConfig::load()?;
//!     config.validate()?;
//!
//!     let feed = Arc::new(GstVideoFeed::new(
//!         config.feed.clone(),
//!         config.sampling.target_width,
//!         config.sampling.target_height,
//!     )?);
//!     feed.start().await?;
//!
//!     let state = Arc::new(DashboardState::new(
//!         config.dashboard.status_log_capacity,
//!         config.sampling.reject_stale_results,
//!     ));
//!     let client = Arc::new(HttpDetectClient::new(&config.detector)?);
//!     let pipeline = Arc::new(SamplingPipeline::new(
//!         feed,
//!         client,
//!         state,
//!         &config.sampling,
//!     ));
//!     pipeline.start();
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod detect_client;
pub mod encoder;
pub mod feed;
pub mod pipeline;
pub mod state;

// Re-export main types
pub use config::{
    ConfigValidationError, DashboardConfig, DetectorConfig, FeedConfig, HerdwatchConfig,
    LoggingConfig, SamplingConfig,
};
pub use detect_client::{ClientStats, DetectClient, DetectError, DetectionResult, HttpDetectClient};
pub use encoder::{EncodeError, FrameEncoder, ImagePayload};
pub use feed::{FeedError, FeedState, FeedStats, GstVideoFeed, RawFrame, VideoFeed};
pub use pipeline::{PipelineStats, SamplingPipeline};
pub use state::{
    ApplyOutcome, CowCounts, DashboardState, StateSnapshot, StatusEntry, PROGRESS_COMPLETED,
    PROGRESS_ENCODED, PROGRESS_IDLE, PROGRESS_SUBMITTED,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::HerdwatchConfig;
    pub use crate::detect_client::{DetectClient, DetectionResult, HttpDetectClient};
    pub use crate::feed::{GstVideoFeed, VideoFeed};
    pub use crate::pipeline::SamplingPipeline;
    pub use crate::state::DashboardState;
}
