use std::{
    fmt,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use crate::{
    CONNECTION_TIMEOUT, DEFAULT_BUFFER_SIZE, IDLE_TIMEOUT, MAX_BUFFER_SIZE, MAX_REDIRECTS,
    USER_AGENT,
};

/// An inclusive, 0-indexed byte interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RangeSpec {
    pub start: u64,
    pub end: u64,
}

impl RangeSpec {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range {start}-{end} is reversed");
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value of the `range` request header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for RangeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DownloadProgress {
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
    /// Bytes per second over the last poll interval.
    pub instant_speed_bps: f64,
    /// Bytes per second averaged over the last few samples.
    pub speed_bps: f64,
    pub eta_seconds: Option<u64>,
    pub active_connections: usize,
    pub chunks_completed: usize,
    pub chunks_total: usize,
}

impl DownloadProgress {
    pub fn percentage(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(100.0),
            Some(total) => Some(self.downloaded_bytes as f64 / total as f64 * 100.0),
            None => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Explicit connection count; `None` lets the planner decide from the content length.
    pub connections: Option<usize>,
    /// Output file name overriding every name hint from the server or URL.
    pub filename: Option<String>,
    /// Directory the output file is placed in, created when missing.
    pub output_dir: Option<PathBuf>,
    pub user_agent: String,
    /// Extra request headers, sent in order on every request.
    pub headers: Vec<(String, String)>,
    pub buffer_size: usize,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            connections: None,
            filename: None,
            output_dir: None,
            user_agent: USER_AGENT.to_string(),
            headers: vec![("accept".to_string(), "*/*".to_string())],
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: CONNECTION_TIMEOUT,
            idle_timeout: IDLE_TIMEOUT,
            max_redirects: MAX_REDIRECTS,
        }
    }
}

impl DownloadConfig {
    /// Bytes requested per socket read, kept within `1..=MAX_BUFFER_SIZE`.
    pub fn read_size(&self) -> usize {
        self.buffer_size.clamp(1, MAX_BUFFER_SIZE)
    }

    /// Headers merged into every request: the user agent first, then the caller's headers.
    pub fn request_headers(&self) -> Vec<(String, String)> {
        let has_user_agent = self
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("user-agent"));

        let mut headers = Vec::with_capacity(self.headers.len() + 1);
        if !has_user_agent {
            headers.push(("user-agent".to_string(), self.user_agent.clone()));
        }
        headers.extend(self.headers.iter().cloned());
        headers
    }
}

/// Counters shared by every worker of one transfer and read by the progress monitor.
#[derive(Debug)]
pub struct TransferState {
    bytes_received: AtomicU64,
    total_length: Option<u64>,
    started: Instant,
    finished: AtomicBool,
    should_stop: Arc<AtomicBool>,
    active_connections: AtomicUsize,
    chunks_completed: AtomicUsize,
    chunks_total: usize,
}

impl TransferState {
    pub fn new(
        total_length: Option<u64>,
        chunks_total: usize,
        should_stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            bytes_received: AtomicU64::new(0),
            total_length,
            started: Instant::now(),
            finished: AtomicBool::new(false),
            should_stop,
            active_connections: AtomicUsize::new(0),
            chunks_completed: AtomicUsize::new(0),
            chunks_total,
        }
    }

    #[inline]
    pub fn add_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::SeqCst);
    }

    #[inline]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn total_length(&self) -> Option<u64> {
        self.total_length
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn finish(&self) {
        self.finished.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    pub(crate) fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn chunk_completed(&self) {
        self.chunks_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    pub fn chunks_completed(&self) -> usize {
        self.chunks_completed.load(Ordering::SeqCst)
    }

    pub fn chunks_total(&self) -> usize {
        self.chunks_total
    }
}

/// What a successful download produced.
#[derive(Debug, Clone)]
pub struct DownloadSummary {
    pub path: PathBuf,
    pub bytes: u64,
    /// Length announced by the server, when it announced one.
    pub expected_bytes: Option<u64>,
    pub connections: usize,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_spec_len_and_header() {
        let range = RangeSpec::new(100, 199);
        assert_eq!(range.len(), 100);
        assert_eq!(range.header_value(), "bytes=100-199");
        assert_eq!(range.to_string(), "100-199");
        assert_eq!(RangeSpec::new(5, 5).len(), 1);
    }

    #[test]
    fn test_request_headers_prepend_user_agent() {
        let config = DownloadConfig {
            headers: vec![("x-token".into(), "abc".into())],
            ..Default::default()
        };
        let headers = config.request_headers();
        assert_eq!(headers[0], ("user-agent".to_string(), USER_AGENT.to_string()));
        assert_eq!(headers[1], ("x-token".to_string(), "abc".to_string()));
    }

    #[test]
    fn test_request_headers_keep_caller_user_agent() {
        let config = DownloadConfig {
            headers: vec![("User-Agent".into(), "curl/8.0".into())],
            ..Default::default()
        };
        let headers = config.request_headers();
        assert_eq!(headers, vec![("User-Agent".to_string(), "curl/8.0".to_string())]);
    }

    #[test]
    fn test_read_size_is_clamped() {
        let config = |buffer_size| DownloadConfig {
            buffer_size,
            ..Default::default()
        };
        assert_eq!(config(0).read_size(), 1);
        assert_eq!(config(4096).read_size(), 4096);
        assert_eq!(config(1 << 30).read_size(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_transfer_state_counts_monotonically() {
        let state = TransferState::new(Some(10), 2, Arc::new(AtomicBool::new(false)));
        let mut last = 0;
        for chunk in [3, 0, 4, 3] {
            state.add_received(chunk);
            let now = state.bytes_received();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(state.bytes_received(), 10);
        assert!(!state.is_finished());
        state.finish();
        assert!(state.is_finished());
    }

    #[test]
    fn test_progress_percentage() {
        let mut progress = DownloadProgress {
            total_bytes: Some(200),
            downloaded_bytes: 50,
            ..Default::default()
        };
        assert_eq!(progress.percentage(), Some(25.0));
        progress.total_bytes = None;
        assert_eq!(progress.percentage(), None);
    }
}
