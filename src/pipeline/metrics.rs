use std::time::{Duration, Instant};

/// Frames between periodic log lines
pub const DEFAULT_LOG_INTERVAL: u64 = 30;

/// Latency and throughput of processed frames
#[derive(Debug, Clone)]
pub struct PerformanceMetrics {
    log_interval: u64,
    frame_count: u64,
    total_latency: Duration,
    first_frame: Option<Instant>,
    last_frame: Option<Instant>,

    // Since the last log line
    window_frames: u64,
    window_latency: Duration,
    window_start: Option<Instant>,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}

impl PerformanceMetrics {
    pub fn new(log_interval: u64) -> Self {
        Self {
            log_interval: log_interval.max(1),
            frame_count: 0,
            total_latency: Duration::ZERO,
            first_frame: None,
            last_frame: None,
            window_frames: 0,
            window_latency: Duration::ZERO,
            window_start: None,
        }
    }

    /// Record a frame submitted at `started` and finished now
    ///
    /// Logs windowed averages every `log_interval` frames.
    pub fn update(&mut self, started: Instant) {
        let now = Instant::now();
        if self.record(now.saturating_duration_since(started), started, now) {
            self.log_window(now);
            self.window_frames = 0;
            self.window_latency = Duration::ZERO;
            self.window_start = Some(now);
        }
    }

    /// Returns true when a log line is due
    pub fn record(&mut self, latency: Duration, started: Instant, now: Instant) -> bool {
        self.frame_count += 1;
        self.total_latency += latency;
        self.first_frame.get_or_insert(started);
        self.last_frame = Some(now);

        self.window_frames += 1;
        self.window_latency += latency;
        self.window_start.get_or_insert(started);

        self.window_frames >= self.log_interval
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn average_latency(&self) -> Duration {
        if self.frame_count == 0 {
            return Duration::ZERO;
        }
        self.total_latency / self.frame_count as u32
    }

    /// Frames per second from the first submission to the last completion
    pub fn fps(&self) -> f64 {
        match (self.first_frame, self.last_frame) {
            (Some(first), Some(last)) => {
                let secs = last.saturating_duration_since(first).as_secs_f64();
                if secs > 0.0 {
                    self.frame_count as f64 / secs
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    fn log_window(&self, now: Instant) {
        let latency_ms =
            self.window_latency.as_secs_f64() * 1000.0 / self.window_frames.max(1) as f64;
        let fps = self
            .window_start
            .map(|start| now.saturating_duration_since(start).as_secs_f64())
            .filter(|secs| *secs > 0.0)
            .map(|secs| self.window_frames as f64 / secs)
            .unwrap_or(0.0);

        tracing::info!(
            "Frame {}: latency={:.1}ms, fps={:.1}",
            self.frame_count,
            latency_ms,
            fps
        );
    }

    pub fn log_summary(&self) {
        tracing::info!(
            "Processed {} frames: mean latency={:.1}ms, fps={:.1}",
            self.frame_count,
            self.average_latency().as_secs_f64() * 1000.0,
            self.fps()
        );
    }
}
