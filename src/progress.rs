use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

use crate::{
    PROGRESS_INTERVAL, SPEED_SAMPLES,
    models::{DownloadProgress, TransferState},
    utils::{format_bytes, format_duration, format_speed},
};

pub type ProgressCallback = Box<dyn Fn(DownloadProgress) + Send + Sync>;

/// Polls the shared transfer counters and publishes progress snapshots.
pub struct ProgressMonitor {
    state: Arc<TransferState>,
    progress: Arc<Mutex<DownloadProgress>>,
    period: Duration,
    samples: VecDeque<(Instant, u64)>,
    last_bytes: u64,
}

impl ProgressMonitor {
    pub fn new(state: Arc<TransferState>, progress: Arc<Mutex<DownloadProgress>>) -> Self {
        Self {
            state,
            progress,
            period: PROGRESS_INTERVAL,
            samples: VecDeque::with_capacity(SPEED_SAMPLES + 1),
            last_bytes: 0,
        }
    }

    #[inline]
    pub fn with_period(self, period: Duration) -> Self {
        Self { period, ..self }
    }

    /// Runs until every byte arrived or the transfer signals it is over.
    pub fn spawn(mut self, callback: Option<ProgressCallback>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);

            loop {
                ticker.tick().await;

                // read before sampling so the last snapshot sees every byte
                let finished = self.state.is_finished();
                let snapshot = self.sample(Instant::now());
                *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = snapshot.clone();

                let done = snapshot
                    .total_bytes
                    .is_some_and(|total| snapshot.downloaded_bytes >= total);

                if let Some(callback) = &callback {
                    callback(snapshot);
                }

                if done || finished {
                    break;
                }
            }
        })
    }

    /// Takes one reading of the counters at `now`.
    fn sample(&mut self, now: Instant) -> DownloadProgress {
        let current = self.state.bytes_received();
        let total = self.state.total_length();

        let instant_speed_bps =
            current.saturating_sub(self.last_bytes) as f64 / self.period.as_secs_f64();
        self.last_bytes = current;

        self.samples.push_back((now, current));
        if self.samples.len() > SPEED_SAMPLES {
            self.samples.pop_front();
        }

        let speed_bps = match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) if self.samples.len() >= 2 => {
                let span = last.0.duration_since(first.0).as_secs_f64();
                if span > 0.0 {
                    last.1.saturating_sub(first.1) as f64 / span
                } else {
                    instant_speed_bps
                }
            }
            _ => instant_speed_bps,
        };

        let eta_seconds = match total {
            Some(total) if speed_bps > 0.0 => {
                Some((total.saturating_sub(current) as f64 / speed_bps) as u64)
            }
            _ => None,
        };

        DownloadProgress {
            total_bytes: total,
            downloaded_bytes: current,
            instant_speed_bps,
            speed_bps,
            eta_seconds,
            active_connections: self.state.active_connections(),
            chunks_completed: self.state.chunks_completed(),
            chunks_total: self.state.chunks_total(),
        }
    }
}

/// A single status line with a bar of `width` cells, or byte counts only when the total is unknown.
pub fn render_status_line(progress: &DownloadProgress, width: usize) -> String {
    let speed = format_speed(progress.instant_speed_bps);

    let Some(percentage) = progress.percentage() else {
        return format!("{} received | {speed}", format_bytes(progress.downloaded_bytes));
    };

    let width = width.clamp(10, 100);
    let filled = ((percentage.min(100.0) / 100.0) * width as f64) as usize;
    let eta = progress
        .eta_seconds
        .map_or_else(|| "--".to_string(), format_duration);

    format!(
        "[{}{}] {:>5.1}% | {speed} | ETA {eta}",
        "#".repeat(filled),
        "-".repeat(width - filled),
        percentage,
    )
}
