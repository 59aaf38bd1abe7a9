//! Video feed abstraction and the GStreamer-backed barn camera feed.
//!
//! The sampling pipeline only talks to the [`VideoFeed`] trait: a readiness
//! predicate, the frame size, and synchronous extraction of the most recent
//! frame. [`GstVideoFeed`] implements it on top of a `uridecodebin`
//! pipeline that keeps the latest decoded RGB frame in a shared slot.

use crate::config::FeedConfig;
use backoff::{backoff::Backoff, ExponentialBackoff};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that can occur during feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("GStreamer initialization failed: {0}")]
    GstreamerInit(String),

    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    #[error("Pipeline element not found: {0}")]
    ElementNotFound(String),

    #[error("Feed connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Feed disconnected")]
    Disconnected,

    #[error("Maximum connection attempts exceeded")]
    MaxConnectAttemptsExceeded,

    #[error("Pipeline state change failed: {0}")]
    StateChangeFailed(String),

    #[error("No frame buffered yet")]
    NotReady,
}

/// A raster frame extracted from the feed.
///
/// Pixel data is tightly packed RGB24 at `width` x `height`.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Frame data as bytes
    pub data: Vec<u8>,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frame sequence number
    pub sequence: u64,

    /// Timestamp when the frame was decoded
    pub captured_at: Instant,
}

/// Statistics for the video feed.
#[derive(Debug, Default, Clone)]
pub struct FeedStats {
    pub frames_decoded: u64,
    pub bytes_decoded: u64,
    pub frames_sampled: u64,
    pub connect_attempts: u32,
    pub loops_completed: u64,
    pub last_frame_at: Option<Instant>,
    pub stream_start: Option<Instant>,
    pub current_fps: f64,
}

/// State of the feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Playing,
    Failed,
}

/// A readable video source the sampler can pull still frames from.
///
/// The feed is an external collaborator: the pipeline never owns it, only
/// holds a shared handle and queries it on each tick.
pub trait VideoFeed: Send + Sync {
    /// Whether enough data is buffered to extract a frame right now.
    fn is_ready(&self) -> bool;

    /// Size of the frames this feed produces, if known yet.
    fn frame_size(&self) -> Option<(u32, u32)>;

    /// Extract the most recent raster frame. Must not block.
    fn sample_frame(&self) -> Result<RawFrame, FeedError>;
}

/// GStreamer-backed feed decoding a local or network media URI.
pub struct GstVideoFeed {
    config: FeedConfig,
    target_width: u32,
    target_height: u32,
    pipeline: Mutex<Option<gst::Pipeline>>,
    state: Arc<RwLock<FeedState>>,
    running: Arc<AtomicBool>,
    frame_sequence: Arc<AtomicU64>,
    latest_frame: Arc<RwLock<Option<RawFrame>>>,
    stats: Arc<RwLock<FeedStats>>,
}

impl GstVideoFeed {
    /// Create a new feed with the given configuration and target frame size.
    pub fn new(config: FeedConfig, target_width: u32, target_height: u32) -> Result<Self, FeedError> {
        gst::init().map_err(|e| FeedError::GstreamerInit(e.to_string()))?;

        Ok(Self {
            config,
            target_width,
            target_height,
            pipeline: Mutex::new(None),
            state: Arc::new(RwLock::new(FeedState::Disconnected)),
            running: Arc::new(AtomicBool::new(false)),
            frame_sequence: Arc::new(AtomicU64::new(0)),
            latest_frame: Arc::new(RwLock::new(None)),
            stats: Arc::new(RwLock::new(FeedStats::default())),
        })
    }

    /// Get the current feed state.
    pub fn state(&self) -> FeedState {
        *self.state.read()
    }

    /// Get current feed statistics.
    pub fn stats(&self) -> FeedStats {
        self.stats.read().clone()
    }

    /// Check if the feed is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start decoding the feed.
    pub async fn start(&self) -> Result<(), FeedError> {
        self.running.store(true, Ordering::SeqCst);
        self.connect_with_retry().await?;
        self.start_bus_watch();
        Ok(())
    }

    /// Stop the feed.
    pub fn stop(&self) {
        info!(feed_id = %self.config.feed_id, "Stopping video feed");
        self.running.store(false, Ordering::SeqCst);

        if let Some(pipeline) = self.pipeline.lock().take() {
            let _ = pipeline.set_state(gst::State::Null);
        }

        *self.state.write() = FeedState::Disconnected;
        *self.latest_frame.write() = None;
    }

    /// Connect to the feed with exponential backoff retry.
    async fn connect_with_retry(&self) -> Result<(), FeedError> {
        let mut backoff = ExponentialBackoff {
            initial_interval: self.config.connect_base_delay(),
            max_interval: self.config.connect_max_delay(),
            max_elapsed_time: None,
            ..Default::default()
        };

        let mut attempts = 0u32;
        let max_attempts = self.config.max_connect_attempts;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                return Err(FeedError::Disconnected);
            }

            *self.state.write() = FeedState::Connecting;

            match self.create_and_start_pipeline() {
                Ok(()) => {
                    *self.state.write() = FeedState::Playing;
                    info!(
                        feed_id = %self.config.feed_id,
                        uri = %self.config.uri,
                        attempts = attempts,
                        "Video feed playing"
                    );
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    self.stats.write().connect_attempts = attempts;

                    if max_attempts > 0 && attempts >= max_attempts {
                        *self.state.write() = FeedState::Failed;
                        error!(
                            feed_id = %self.config.feed_id,
                            attempts = attempts,
                            error = %e,
                            "Max connection attempts exceeded"
                        );
                        return Err(FeedError::MaxConnectAttemptsExceeded);
                    }

                    if let Some(delay) = backoff.next_backoff() {
                        warn!(
                            feed_id = %self.config.feed_id,
                            attempt = attempts,
                            delay_ms = delay.as_millis(),
                            error = %e,
                            "Feed connection failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        backoff.reset();
                    }
                }
            }
        }
    }

    /// Create and start the GStreamer pipeline.
    fn create_and_start_pipeline(&self) -> Result<(), FeedError> {
        let pipeline_str = self.build_pipeline_string();
        debug!(pipeline = %pipeline_str, "Creating GStreamer pipeline");

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| FeedError::PipelineCreation(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| FeedError::PipelineCreation("Failed to cast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| FeedError::ElementNotFound("appsink".to_string()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| FeedError::ElementNotFound("Could not cast to AppSink".to_string()))?;

        self.configure_appsink(&appsink);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| FeedError::StateChangeFailed(e.to_string()))?;

        // Wait for the state change to complete
        let (result, _state, _pending) = pipeline.state(gst::ClockTime::from_seconds(
            self.config.connection_timeout_secs,
        ));

        if result.is_err() {
            let _ = pipeline.set_state(gst::State::Null);
            return Err(FeedError::ConnectionFailed(
                "Timeout waiting for pipeline to start".to_string(),
            ));
        }

        *self.pipeline.lock() = Some(pipeline);
        self.stats.write().stream_start = Some(Instant::now());

        Ok(())
    }

    /// Build the GStreamer pipeline string.
    fn build_pipeline_string(&self) -> String {
        format!(
            "uridecodebin uri={uri} \
             ! videoconvert ! videoscale \
             ! video/x-raw,format=RGB,width={width},height={height} \
             ! appsink name=sink emit-signals=true sync=true max-buffers=2 drop=true",
            uri = self.config.uri,
            width = self.target_width,
            height = self.target_height,
        )
    }

    /// Configure the appsink to store decoded frames in the shared slot.
    fn configure_appsink(&self, appsink: &gst_app::AppSink) {
        let latest = self.latest_frame.clone();
        let sequence = self.frame_sequence.clone();
        let stats = self.stats.clone();
        let running = self.running.clone();

        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    if !running.load(Ordering::SeqCst) {
                        return Err(gst::FlowError::Eos);
                    }

                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Error)?;
                    let buffer = sample.buffer().ok_or(gst::FlowError::Error)?;
                    let caps = sample.caps().ok_or(gst::FlowError::Error)?;

                    let video_info = gst_video::VideoInfo::from_caps(caps)
                        .map_err(|_| gst::FlowError::Error)?;

                    let map = buffer.map_readable().map_err(|_| gst::FlowError::Error)?;
                    let data = map.as_slice().to_vec();

                    let seq = sequence.fetch_add(1, Ordering::SeqCst);

                    let frame = RawFrame {
                        data,
                        width: video_info.width(),
                        height: video_info.height(),
                        sequence: seq,
                        captured_at: Instant::now(),
                    };

                    {
                        let mut s = stats.write();
                        s.frames_decoded += 1;
                        s.bytes_decoded += frame.data.len() as u64;
                        s.last_frame_at = Some(Instant::now());

                        if let Some(start) = s.stream_start {
                            let elapsed = start.elapsed().as_secs_f64();
                            if elapsed > 0.0 {
                                s.current_fps = s.frames_decoded as f64 / elapsed;
                            }
                        }
                    }

                    *latest.write() = Some(frame);
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
    }

    /// Watch the pipeline bus for errors and end-of-stream.
    fn start_bus_watch(&self) {
        let pipeline = match self.pipeline.lock().as_ref() {
            Some(p) => p.clone(),
            None => return,
        };

        let state = self.state.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();
        let feed_id = self.config.feed_id.clone();
        let loop_playback = self.config.loop_playback;

        tokio::spawn(async move {
            let bus = match pipeline.bus() {
                Some(b) => b,
                None => return,
            };

            loop {
                if !running.load(Ordering::SeqCst) {
                    break;
                }

                if let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(100)) {
                    match msg.view() {
                        gst::MessageView::Error(err) => {
                            error!(
                                feed_id = %feed_id,
                                error = %err.error(),
                                debug = ?err.debug(),
                                "GStreamer pipeline error"
                            );
                            *state.write() = FeedState::Disconnected;
                            break;
                        }
                        gst::MessageView::Eos(_) => {
                            if loop_playback {
                                debug!(feed_id = %feed_id, "End of stream, restarting playback");
                                stats.write().loops_completed += 1;
                                if pipeline
                                    .seek_simple(
                                        gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT,
                                        gst::ClockTime::ZERO,
                                    )
                                    .is_err()
                                {
                                    warn!(feed_id = %feed_id, "Seek to start failed");
                                    *state.write() = FeedState::Disconnected;
                                    break;
                                }
                            } else {
                                info!(feed_id = %feed_id, "End of stream");
                                *state.write() = FeedState::Disconnected;
                                break;
                            }
                        }
                        gst::MessageView::Warning(w) => {
                            warn!(
                                feed_id = %feed_id,
                                warning = %w.error(),
                                "GStreamer warning"
                            );
                        }
                        _ => {}
                    }
                }

                tokio::task::yield_now().await;
            }
        });
    }
}

impl VideoFeed for GstVideoFeed {
    fn is_ready(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && *self.state.read() == FeedState::Playing
            && self.latest_frame.read().is_some()
    }

    fn frame_size(&self) -> Option<(u32, u32)> {
        self.latest_frame.read().as_ref().map(|f| (f.width, f.height))
    }

    fn sample_frame(&self) -> Result<RawFrame, FeedError> {
        let frame = self
            .latest_frame
            .read()
            .as_ref()
            .cloned()
            .ok_or(FeedError::NotReady)?;
        self.stats.write().frames_sampled += 1;
        Ok(frame)
    }
}

impl Drop for GstVideoFeed {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(pipeline) = self.pipeline.get_mut().take() {
            let _ = pipeline.set_state(gst::State::Null);
        }
    }
}
