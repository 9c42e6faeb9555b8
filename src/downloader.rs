use crate::{
    Error, Result,
    assembler::{self, Assembler},
    models::{DownloadConfig, DownloadProgress, DownloadSummary, TransferState},
    net::{self, Connection},
    planner::{Plan, RangePlanner},
    progress::{ProgressCallback, ProgressMonitor},
    url_ref::UrlRef,
    wire::{self, ResponseHead},
    worker::{Completion, Segment, TransferWorker},
};
use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, Ordering},
};
use tokio::task::JoinSet;

type Headers = Arc<Vec<(String, String)>>;

pub struct Downloader {
    config: DownloadConfig,
    planner: RangePlanner,
    progress: Arc<Mutex<DownloadProgress>>,
    should_stop: Arc<AtomicBool>,
}

impl Downloader {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            planner: RangePlanner::default(),
            progress: Arc::new(Mutex::new(DownloadProgress::default())),
            should_stop: Arc::new(AtomicBool::new(false)),
        }
    }

    #[inline]
    pub fn with_planner(self, planner: RangePlanner) -> Self {
        Self { planner, ..self }
    }

    #[inline]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Downloads `url` and returns where the assembled file landed.
    pub async fn download(
        &self,
        url: &str,
        progress_callback: Option<ProgressCallback>,
    ) -> Result<DownloadSummary> {
        self.should_stop.store(false, Ordering::SeqCst);
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = DownloadProgress::default();

        let headers: Headers = Arc::new(self.config.request_headers());

        let (url, conn, head) = self.probe(url, &headers).await?;
        let destination = assembler::resolve_destination(&self.config, &head, &url).await?;

        let total = head.content_length();
        let plan = self.planner.plan(total, head.accepts_ranges(), self.config.connections);
        let connections = plan.connections();

        tracing::info!(
            "Downloading {url} ({}, ranges {}) with {connections} connection(s) into `{}`",
            total.map_or_else(|| "unknown length".to_string(), |total| format!("{total} bytes")),
            if head.accepts_ranges() { "supported" } else { "unsupported" },
            destination.display()
        );

        let state = Arc::new(TransferState::new(total, connections, Arc::clone(&self.should_stop)));
        let monitor = ProgressMonitor::new(Arc::clone(&state), Arc::clone(&self.progress))
            .spawn(progress_callback);

        let result = self.transfer(&url, plan, conn, head, &headers, &state).await;

        state.finish();
        if let Err(err) = monitor.await {
            tracing::debug!("Progress monitor ended abnormally: {err}");
        }

        let segments = result?;
        if state.should_stop() {
            return Err(Error::Cancelled);
        }
        report_shortfalls(&segments);

        let bytes = Assembler::new(&destination).assemble(segments).await?;
        let elapsed = state.elapsed();

        tracing::info!("Saved {bytes} bytes to `{}` in {elapsed:?}", destination.display());

        Ok(DownloadSummary {
            path: destination,
            bytes,
            expected_bytes: total,
            connections,
            elapsed,
        })
    }

    /// Sends the unranged probe, following redirects up to the configured limit.
    async fn probe(
        &self,
        url: &str,
        headers: &Headers,
    ) -> Result<(UrlRef, Connection, ResponseHead)> {
        let mut url = UrlRef::parse(url)?;
        let mut redirects = 0;

        loop {
            tracing::debug!("Probing {url}");

            let request = wire::build_request(&url, headers, None);
            let (conn, head) = net::exchange(
                &url,
                &request,
                self.config.connect_timeout,
                self.config.idle_timeout,
                self.config.read_size(),
            )
            .await?;

            if head.is_redirect() {
                let location = head.location().ok_or(Error::Http(head.status_code))?;

                redirects += 1;
                if redirects > self.config.max_redirects {
                    return Err(Error::TooManyRedirects(self.config.max_redirects));
                }

                let next = url.join(location)?;
                tracing::debug!("HTTP {} redirect {redirects}: {url} -> {next}", head.status_code);

                drop(conn);
                url = next;
                continue;
            }

            if !head.is_success() {
                return Err(Error::Http(head.status_code));
            }

            return Ok((url, conn, head));
        }
    }

    async fn transfer(
        &self,
        url: &UrlRef,
        plan: Plan,
        conn: Connection,
        head: ResponseHead,
        headers: &Headers,
        state: &Arc<TransferState>,
    ) -> Result<Vec<Segment>> {
        let ranges = match plan {
            Plan::Single => {
                // the probe already is the unranged request, keep streaming its body
                let expected = head.content_length();
                let worker = TransferWorker::new(
                    0,
                    url.clone(),
                    None,
                    Arc::clone(headers),
                    Arc::clone(state),
                    &self.config,
                )
                .with_expected_len(expected);
                return Ok(vec![worker.run_with(conn, head).await?]);
            }
            Plan::Ranged(ranges) => ranges,
        };
        drop(conn);

        let mut workers = JoinSet::new();
        for (index, range) in ranges.into_iter().enumerate() {
            let worker = TransferWorker::new(
                index,
                url.clone(),
                Some(range),
                Arc::clone(headers),
                Arc::clone(state),
                &self.config,
            );
            workers.spawn(async move { (index, worker.run().await) });
        }

        let mut segments = Vec::with_capacity(workers.len());
        while let Some(joined) = workers.join_next().await {
            let (index, result) = match joined {
                Ok(joined) => joined,
                Err(err) => std::panic::resume_unwind(err.into_panic()),
            };

            match result {
                Ok(segment) => segments.push(segment),
                Err(err) => {
                    tracing::warn!(
                        "Worker {index} failed: {err}; aborting {} remaining worker(s)",
                        workers.len()
                    );
                    workers.abort_all();
                    return Err(err);
                }
            }
        }

        segments.sort_by_key(|segment| segment.index);
        Ok(segments)
    }

    /// Asks the running transfer to stop; it ends with [`Error::Cancelled`] and writes nothing.
    pub fn stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub fn get_progress(&self) -> DownloadProgress {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Logs segments that came back short; their bytes are still assembled.
fn report_shortfalls(segments: &[Segment]) {
    for segment in segments {
        if let Some(shortfall) = segment.shortfall() {
            tracing::warn!("{shortfall}; keeping the bytes that arrived");
            continue;
        }

        if let (Completion::TimedOut, Some(range)) = (segment.completion, segment.range) {
            if segment.received < range.len() {
                tracing::warn!(
                    "range {range} went idle after {} of {} bytes; keeping the bytes that arrived",
                    segment.received,
                    range.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    use super::*;

    /// Answers every connection with `reply`, whatever was asked.
    async fn serve_forever(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = socket.read(&mut buf).await;
                    let _ = socket.write_all(reply).await;
                });
            }
        });

        format!("http://127.0.0.1:{port}/loop")
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_redirect_loop_is_bounded() {
        let url = serve_forever(b"HTTP/1.1 301 Moved\r\nlocation: /loop\r\n\r\n").await;
        let downloader = Downloader::new(DownloadConfig {
            max_redirects: 2,
            idle_timeout: Duration::from_secs(2),
            ..Default::default()
        });

        let result = downloader.download(&url, None).await;

        assert!(matches!(result, Err(Error::TooManyRedirects(2))), "{result:?}");
        assert!(logs_contain("redirect 2"));
    }

    #[tokio::test]
    async fn test_redirect_without_location_is_an_error() {
        let url = serve_forever(b"HTTP/1.1 302 Found\r\n\r\n").await;

        let result = Downloader::new(DownloadConfig::default()).download(&url, None).await;

        assert!(matches!(result, Err(Error::Http(302))), "{result:?}");
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_connecting() {
        let downloader = Downloader::new(DownloadConfig::default());

        assert!(matches!(
            downloader.download("ftp://example.com/a", None).await,
            Err(Error::UnsupportedScheme(_))
        ));
        assert!(matches!(downloader.download("not a url", None).await, Err(Error::InvalidUrl(_))));
        assert_eq!(downloader.get_progress().downloaded_bytes, 0);
    }
}
