//! The sampling pipeline: a timer-driven loop that captures a frame from
//! the feed, encodes it, submits it for detection and folds the result
//! into the dashboard state.
//!
//! Capture and encode run synchronously on the clock task; the submission
//! is spawned, so a slow response does not delay the next tick and
//! several requests may be in flight at once. Their completions land on
//! the state in arrival order.

use crate::config::SamplingConfig;
use crate::detect_client::DetectClient;
use crate::encoder::FrameEncoder;
use crate::feed::VideoFeed;
use crate::state::{ApplyOutcome, DashboardState};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Statistics for the sampling pipeline.
#[derive(Debug, Default, Clone)]
pub struct PipelineStats {
    pub ticks: u64,
    pub cycles_skipped_not_ready: u64,
    pub capture_failures: u64,
    pub encode_failures: u64,
    pub submissions_spawned: u64,
    pub results_applied: u64,
    pub results_discarded_stale: u64,
    pub results_discarded_inactive: u64,
    pub submission_failures: u64,
}

/// Timer-driven sampling pipeline.
pub struct SamplingPipeline {
    feed: Arc<dyn VideoFeed>,
    client: Arc<dyn DetectClient>,
    state: Arc<DashboardState>,
    encoder: FrameEncoder,
    interval: Duration,
    cycle_counter: AtomicU64,
    cancel: CancellationToken,
    clock_task: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<RwLock<PipelineStats>>,
}

impl SamplingPipeline {
    /// Create a new pipeline over the given collaborators.
    pub fn new(
        feed: Arc<dyn VideoFeed>,
        client: Arc<dyn DetectClient>,
        state: Arc<DashboardState>,
        config: &SamplingConfig,
    ) -> Self {
        Self {
            feed,
            client,
            state,
            encoder: FrameEncoder::new(config.jpeg_quality),
            interval: config.interval(),
            cycle_counter: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            clock_task: Mutex::new(None),
            stats: Arc::new(RwLock::new(PipelineStats::default())),
        }
    }

    /// Get current pipeline statistics.
    pub fn stats(&self) -> PipelineStats {
        self.stats.read().clone()
    }

    /// Start the sampling clock.
    ///
    /// The first tick fires one full interval after start. Calling start
    /// on an already-running pipeline is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.clock_task.lock();
        if task.is_some() {
            warn!("Sampling clock already running");
            return;
        }

        let this = self.clone();
        *task = Some(tokio::spawn(async move {
            this.run_clock().await;
        }));
    }

    /// Stop the sampling clock.
    ///
    /// Idempotent. When this returns, the clock task has exited and no
    /// further tick will fire. In-flight submissions are not cancelled,
    /// but their results can no longer mutate the displayed counts.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.state.deactivate();

        let task = self.clock_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Sampling clock task panicked");
            }
        }
        info!("Sampling pipeline stopped");
    }

    async fn run_clock(self: Arc<Self>) {
        info!(interval_ms = self.interval.as_millis() as u64, "Sampling clock started");

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.run_cycle(),
            }
        }

        info!("Sampling clock stopped");
    }

    /// Run one sampling cycle: readiness check, capture, encode, and an
    /// asynchronous submission.
    fn run_cycle(&self) {
        let cycle = self.cycle_counter.fetch_add(1, Ordering::SeqCst);
        self.stats.write().ticks += 1;

        if !self.feed.is_ready() {
            self.stats.write().cycles_skipped_not_ready += 1;
            self.state
                .push_status(format!("cycle {}: feed not ready, skipping frame capture", cycle));
            debug!(cycle = cycle, "Feed not ready, skipping cycle");
            return;
        }

        self.state.begin_cycle();
        self.state
            .push_status(format!("cycle {}: capturing frame from feed", cycle));

        let frame = match self.feed.sample_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.write().capture_failures += 1;
                self.state
                    .push_status(format!("cycle {}: frame capture failed: {}", cycle, e));
                warn!(cycle = cycle, error = %e, "Frame capture failed");
                return;
            }
        };

        let payload = match self.encoder.encode(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.write().encode_failures += 1;
                self.state.push_status(format!(
                    "cycle {}: encoding failed, no payload produced: {}",
                    cycle, e
                ));
                warn!(cycle = cycle, error = %e, "Frame encoding failed");
                return;
            }
        };

        self.state.mark_encoded();
        self.state.push_status(format!(
            "cycle {}: encoded frame ({} bytes)",
            cycle,
            payload.data.len()
        ));

        self.state
            .push_status(format!("cycle {}: submitting frame to detection endpoint", cycle));
        self.state.mark_submitted();
        self.stats.write().submissions_spawned += 1;

        let client = self.client.clone();
        let state = self.state.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            match client.submit(payload).await {
                Ok(result) => match state.apply_result(cycle, &result) {
                    ApplyOutcome::Applied => {
                        state.mark_completed();
                        stats.write().results_applied += 1;
                        state.push_status(format!(
                            "cycle {}: received counts: total={} standing={} laying={}",
                            cycle, result.total, result.standing, result.laying
                        ));
                        info!(
                            cycle = cycle,
                            total = result.total,
                            standing = result.standing,
                            laying = result.laying,
                            "Detection result applied"
                        );
                    }
                    ApplyOutcome::Stale => {
                        stats.write().results_discarded_stale += 1;
                        state.push_status(format!("cycle {}: stale result discarded", cycle));
                        debug!(cycle = cycle, "Stale detection result discarded");
                    }
                    ApplyOutcome::Inactive => {
                        stats.write().results_discarded_inactive += 1;
                        state.push_status(format!(
                            "cycle {}: result arrived after shutdown, discarded",
                            cycle
                        ));
                        debug!(cycle = cycle, "Detection result arrived after shutdown");
                    }
                },
                Err(e) => {
                    stats.write().submission_failures += 1;
                    state.push_status(format!("cycle {}: submission failed: {}", cycle, e));
                    warn!(cycle = cycle, error = %e, "Submission failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect_client::{DetectError, DetectionResult};
    use crate::encoder::ImagePayload;
    use crate::feed::{FeedError, RawFrame};
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::time::Instant;

    struct FakeFeed {
        ready: AtomicBool,
        broken_buffer: AtomicBool,
        width: u32,
        height: u32,
    }

    impl FakeFeed {
        fn new() -> Self {
            Self {
                ready: AtomicBool::new(true),
                broken_buffer: AtomicBool::new(false),
                width: 8,
                height: 8,
            }
        }
    }

    impl VideoFeed for FakeFeed {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn frame_size(&self) -> Option<(u32, u32)> {
            Some((self.width, self.height))
        }

        fn sample_frame(&self) -> Result<RawFrame, FeedError> {
            let size = if self.broken_buffer.load(Ordering::SeqCst) {
                3
            } else {
                (self.width * self.height * 3) as usize
            };
            Ok(RawFrame {
                data: vec![100u8; size],
                width: self.width,
                height: self.height,
                sequence: 0,
                captured_at: Instant::now(),
            })
        }
    }

    enum ScriptedReply {
        Ok {
            result: DetectionResult,
            delay: Duration,
        },
        Fail {
            status: StatusCode,
        },
    }

    struct ScriptedClient {
        replies: Mutex<VecDeque<ScriptedReply>>,
        /// Progress gauge value observed at each submit call
        observed_progress: Mutex<Vec<u8>>,
        state: Arc<DashboardState>,
    }

    impl ScriptedClient {
        fn new(state: Arc<DashboardState>, replies: Vec<ScriptedReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                observed_progress: Mutex::new(Vec::new()),
                state,
            }
        }
    }

    #[async_trait]
    impl DetectClient for ScriptedClient {
        async fn submit(&self, _payload: ImagePayload) -> Result<DetectionResult, DetectError> {
            self.observed_progress.lock().push(self.state.progress());
            let reply = self.replies.lock().pop_front();
            match reply {
                Some(ScriptedReply::Ok { result, delay }) => {
                    tokio::time::sleep(delay).await;
                    Ok(result)
                }
                Some(ScriptedReply::Fail { status }) => Err(DetectError::Transport { status }),
                None => Err(DetectError::Transport {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                }),
            }
        }
    }

    fn ok_reply(total: u32, standing: u32, laying: u32, delay_ms: u64) -> ScriptedReply {
        ScriptedReply::Ok {
            result: DetectionResult {
                total,
                standing,
                laying,
            },
            delay: Duration::from_millis(delay_ms),
        }
    }

    fn build_pipeline(
        state: Arc<DashboardState>,
        replies: Vec<ScriptedReply>,
    ) -> (Arc<SamplingPipeline>, Arc<FakeFeed>, Arc<ScriptedClient>) {
        let feed = Arc::new(FakeFeed::new());
        let client = Arc::new(ScriptedClient::new(state.clone(), replies));
        let config = SamplingConfig {
            interval_ms: 20,
            target_width: 8,
            target_height: 8,
            jpeg_quality: 85,
            reject_stale_results: false,
        };
        let pipeline = Arc::new(SamplingPipeline::new(
            feed.clone(),
            client.clone(),
            state,
            &config,
        ));
        (pipeline, feed, client)
    }

    async fn wait_until(mut predicate: impl FnMut() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached within timeout");
    }

    fn capture_entries(state: &DashboardState) -> usize {
        state
            .snapshot()
            .status_log
            .iter()
            .filter(|e| e.message.contains("capturing frame"))
            .count()
    }

    #[tokio::test]
    async fn test_successful_cycle() {
        let state = Arc::new(DashboardState::new(0, false));
        let (pipeline, _feed, client) =
            build_pipeline(state.clone(), vec![ok_reply(5, 3, 2, 0)]);

        pipeline.run_cycle();
        wait_until(|| state.progress() == 100).await;

        let counts = state.counts();
        assert_eq!(counts.total, 5);
        assert_eq!(counts.standing, 3);
        assert_eq!(counts.laying, 2);

        // Submission was dispatched at the 75 checkpoint
        assert_eq!(client.observed_progress.lock().as_slice(), &[75]);

        let log = state.snapshot().status_log;
        let messages: Vec<&str> = log.iter().map(|e| e.message.as_str()).collect();
        assert!(messages[0].contains("capturing frame"));
        assert!(messages[1].contains("encoded frame"));
        assert!(messages[2].contains("submitting frame"));
        assert!(messages[3].contains("received counts"));

        let stats = pipeline.stats();
        assert_eq!(stats.results_applied, 1);
        assert_eq!(stats.submission_failures, 0);
    }

    #[tokio::test]
    async fn test_not_ready_skips_cycle() {
        let state = Arc::new(DashboardState::new(0, false));
        let (pipeline, feed, _client) =
            build_pipeline(state.clone(), vec![ok_reply(5, 3, 2, 0)]);

        // Reach a completed cycle first so progress is non-zero
        pipeline.run_cycle();
        wait_until(|| state.progress() == 100).await;
        let captures_before = capture_entries(&state);

        feed.ready.store(false, Ordering::SeqCst);
        pipeline.run_cycle();

        // Skipped cycle: progress untouched, no capture entry, skip logged
        assert_eq!(state.progress(), 100);
        assert_eq!(capture_entries(&state), captures_before);
        let log = state.snapshot().status_log;
        assert!(log.last().unwrap().message.contains("feed not ready"));
        assert_eq!(pipeline.stats().cycles_skipped_not_ready, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_counts_unchanged() {
        let state = Arc::new(DashboardState::new(0, false));
        let (pipeline, _feed, _client) = build_pipeline(
            state.clone(),
            vec![
                ok_reply(5, 3, 2, 0),
                ScriptedReply::Fail {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                },
            ],
        );

        pipeline.run_cycle();
        wait_until(|| state.progress() == 100).await;

        pipeline.run_cycle();
        wait_until(|| pipeline.stats().submission_failures == 1).await;

        // Counts keep their prior values, progress stays at the
        // submitted checkpoint, the failure is logged
        assert_eq!(state.counts().total, 5);
        assert_eq!(state.progress(), 75);
        let log = state.snapshot().status_log;
        assert!(log.last().unwrap().message.contains("submission failed"));
    }

    #[tokio::test]
    async fn test_encode_failure_terminates_cycle() {
        let state = Arc::new(DashboardState::new(0, false));
        let (pipeline, feed, _client) =
            build_pipeline(state.clone(), vec![ok_reply(5, 3, 2, 0)]);

        pipeline.run_cycle();
        wait_until(|| state.progress() == 100).await;

        feed.broken_buffer.store(true, Ordering::SeqCst);
        pipeline.run_cycle();

        assert_eq!(state.progress(), 0);
        let log = state.snapshot().status_log;
        assert!(log
            .last()
            .unwrap()
            .message
            .contains("encoding failed, no payload produced"));
        assert_eq!(pipeline.stats().encode_failures, 1);
        assert_eq!(state.counts().total, 5);
    }

    #[tokio::test]
    async fn test_overlapping_cycles_last_arrival_wins() {
        let state = Arc::new(DashboardState::new(0, false));
        // Cycle 0 resolves slowly with total=5, cycle 1 quickly with total=9
        let (pipeline, _feed, _client) = build_pipeline(
            state.clone(),
            vec![ok_reply(5, 3, 2, 80), ok_reply(9, 5, 4, 10)],
        );

        pipeline.run_cycle();
        pipeline.run_cycle();
        wait_until(|| pipeline.stats().results_applied == 2).await;

        // The stale cycle 0 result arrived last and overwrote cycle 1's
        assert_eq!(state.counts().total, 5);
    }

    #[tokio::test]
    async fn test_stale_guard_keeps_newest_result() {
        let state = Arc::new(DashboardState::new(0, true));
        let feed = Arc::new(FakeFeed::new());
        let client = Arc::new(ScriptedClient::new(
            state.clone(),
            vec![ok_reply(5, 3, 2, 80), ok_reply(9, 5, 4, 10)],
        ));
        let config = SamplingConfig {
            interval_ms: 20,
            target_width: 8,
            target_height: 8,
            jpeg_quality: 85,
            reject_stale_results: true,
        };
        let pipeline = Arc::new(SamplingPipeline::new(feed, client, state.clone(), &config));

        pipeline.run_cycle();
        pipeline.run_cycle();
        wait_until(|| pipeline.stats().results_discarded_stale == 1).await;

        assert_eq!(state.counts().total, 9);
        let log = state.snapshot().status_log;
        assert!(log
            .iter()
            .any(|e| e.message.contains("stale result discarded")));
    }

    #[tokio::test]
    async fn test_clock_fires_and_stop_halts_ticks() {
        let state = Arc::new(DashboardState::new(0, false));
        let replies = (0..20).map(|_| ok_reply(1, 1, 0, 0)).collect();
        let (pipeline, _feed, _client) = build_pipeline(state.clone(), replies);

        pipeline.start();
        wait_until(|| capture_entries(&state) >= 2).await;

        pipeline.stop().await;
        let captures_at_stop = capture_entries(&state);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(capture_entries(&state), captures_at_stop);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let state = Arc::new(DashboardState::new(0, false));
        let (pipeline, _feed, _client) = build_pipeline(state.clone(), vec![]);

        pipeline.start();
        pipeline.stop().await;
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn test_result_after_stop_is_discarded() {
        let state = Arc::new(DashboardState::new(0, false));
        let (pipeline, _feed, _client) =
            build_pipeline(state.clone(), vec![ok_reply(9, 5, 4, 100)]);

        // Submission in flight while the pipeline shuts down
        pipeline.run_cycle();
        pipeline.stop().await;
        wait_until(|| pipeline.stats().results_discarded_inactive == 1).await;

        assert_eq!(state.counts().total, 0);
        let log = state.snapshot().status_log;
        assert!(log
            .last()
            .unwrap()
            .message
            .contains("result arrived after shutdown"));
    }
}
