//! Live transfer feedback for a single download.
//!
//! The copy loop and the terminal renderer never share more than one atomic
//! counter. The copy loop adds to it after every chunk; a separate tokio task
//! wakes up on its own interval, reads the counter, updates the smoothed rate
//! and redraws. A slow terminal can therefore skip frames but never slows the
//! transfer down, and the last frame is always drawn from the final count.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::metadata::{ContentLength, format_duration};

const DEFAULT_TICK: Duration = Duration::from_millis(120);
/// Roughly the last few seconds of samples at the default tick.
const RATE_WINDOW_SAMPLES: f64 = 40.0;

/// Where the renderer draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressDraw {
    Terminal,
    Hidden,
}

impl ProgressDraw {
    fn target(self) -> ProgressDrawTarget {
        match self {
            ProgressDraw::Terminal => ProgressDrawTarget::stderr(),
            ProgressDraw::Hidden => ProgressDrawTarget::hidden(),
        }
    }
}

/// Cumulative bytes written for the active transfer.
#[derive(Debug, Default)]
pub struct ProgressState {
    transferred: AtomicU64,
}

impl ProgressState {
    fn add(&self, bytes: u64) {
        self.transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn load(&self) -> u64 {
        self.transferred.load(Ordering::Relaxed)
    }
}

/// Exponentially weighted transfer rate.
#[derive(Debug, Clone)]
pub struct RateEstimator {
    smoothing: f64,
    rate: Option<f64>,
    last_bytes: u64,
}

impl RateEstimator {
    /// `window` is the number of samples that dominate the average.
    pub fn with_window(window: f64) -> Self {
        Self {
            smoothing: 2.0 / (window.max(1.0) + 1.0),
            rate: None,
            last_bytes: 0,
        }
    }

    /// Feeds the running byte total observed `elapsed` after the previous
    /// sample. Zero-length intervals carry no information and are ignored.
    pub fn observe(&mut self, total_bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let delta = total_bytes.saturating_sub(self.last_bytes);
        self.last_bytes = total_bytes;

        let sample = delta as f64 / secs;
        self.rate = Some(match self.rate {
            None => sample,
            Some(rate) => self.smoothing * sample + (1.0 - self.smoothing) * rate,
        });
    }

    pub fn bytes_per_second(&self) -> f64 {
        self.rate.unwrap_or_default()
    }

    /// Time left for `remaining` bytes at the smoothed rate.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        if rate <= f64::EPSILON {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    Abandoned,
}

/// Byte counter plus the renderer task that displays it.
pub struct ProgressTracker {
    state: Arc<ProgressState>,
    total: ContentLength,
    stop: Option<oneshot::Sender<Outcome>>,
    renderer: JoinHandle<()>,
}

impl ProgressTracker {
    /// Spawns the renderer. Must be called from within a tokio runtime.
    pub fn start(label: &str, total: ContentLength, draw: ProgressDraw) -> Self {
        Self::with_tick(label, total, draw, DEFAULT_TICK)
    }

    pub fn with_tick(label: &str, total: ContentLength, draw: ProgressDraw, tick: Duration) -> Self {
        let state = Arc::new(ProgressState::default());
        let (stop, stop_rx) = oneshot::channel();
        let bar = build_bar(label, total, draw);
        let renderer = tokio::spawn(render_loop(bar, Arc::clone(&state), total, stop_rx, tick));

        Self {
            state,
            total,
            stop: Some(stop),
            renderer,
        }
    }

    /// Called by the copy loop after each chunk lands on disk.
    pub fn record(&self, bytes: u64) {
        self.state.add(bytes);
    }

    pub fn transferred(&self) -> u64 {
        self.state.load()
    }

    pub fn total(&self) -> ContentLength {
        self.total
    }

    /// Draws the final count, marks the bar complete and waits for the
    /// renderer to exit. Returns the bytes recorded.
    pub async fn finish(self) -> u64 {
        self.shutdown(Outcome::Completed).await
    }

    /// Like [`finish`](Self::finish) but leaves the bar marked as interrupted.
    pub async fn abandon(self) -> u64 {
        self.shutdown(Outcome::Abandoned).await
    }

    async fn shutdown(mut self, outcome: Outcome) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(outcome);
        }
        if let Err(err) = self.renderer.await {
            warn!(error = %err, "progress renderer did not exit cleanly");
        }
        self.state.load()
    }
}

fn build_bar(label: &str, total: ContentLength, draw: ProgressDraw) -> ProgressBar {
    let template = match total {
        ContentLength::Exact(_) => {
            "{prefix:>5} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {percent:>3}% | {msg}"
        }
        ContentLength::Estimated(_) => {
            "{prefix:>5} [{bar:40.cyan/blue}] {bytes}/~{total_bytes} {percent:>3}% | {msg}"
        }
        ContentLength::Unknown => "{prefix:>5} {spinner:.green} {bytes} | {msg}",
    };
    let style = ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");

    let bar = ProgressBar::with_draw_target(total.bytes(), draw.target());
    bar.set_style(style);
    bar.set_prefix(label.to_owned());
    bar
}

async fn render_loop(
    bar: ProgressBar,
    state: Arc<ProgressState>,
    total: ContentLength,
    mut stop: oneshot::Receiver<Outcome>,
    tick: Duration,
) {
    let mut ticker = tokio::time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut rate = RateEstimator::with_window(RATE_WINDOW_SAMPLES);
    let mut last_sample = Instant::now();

    let outcome = loop {
        tokio::select! {
            outcome = &mut stop => break outcome.unwrap_or(Outcome::Abandoned),
            _ = ticker.tick() => {
                let now = Instant::now();
                let transferred = state.load();
                rate.observe(transferred, now.duration_since(last_sample));
                last_sample = now;
                draw(&bar, transferred, total, &rate);
            }
        }
    };

    draw(&bar, state.load(), total, &rate);
    match outcome {
        Outcome::Completed => bar.finish(),
        Outcome::Abandoned => bar.abandon(),
    }
}

fn draw(bar: &ProgressBar, transferred: u64, total: ContentLength, rate: &RateEstimator) {
    // Estimates can be exceeded; grow the bar instead of overflowing it.
    if let Some(length) = total.bytes()
        && transferred > length
    {
        bar.set_length(transferred);
    }
    bar.set_position(transferred);
    bar.set_message(status_line(transferred, total, rate));
}

/// Rate and ETA suffix, e.g. `1.20 MiB/s ETA 0:42`.
pub fn status_line(transferred: u64, total: ContentLength, rate: &RateEstimator) -> String {
    let speed = HumanBytes(rate.bytes_per_second() as u64);
    let eta = total
        .bytes()
        .map(|length| length.saturating_sub(transferred))
        .and_then(|remaining| rate.eta(remaining))
        .map(format_duration)
        .unwrap_or_else(|| "--".to_owned());
    format!("{speed}/s ETA {eta}")
}
