//! One connection, one request, one private scratch store.

use std::{io::SeekFrom, sync::Arc, time::Duration};

use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter},
    time,
};

use crate::{
    Error, Result,
    models::{DownloadConfig, RangeSpec, TransferState},
    net::{self, Connection},
    url_ref::UrlRef,
    wire::{self, ResponseHead},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Connecting,
    RequestSent,
    ReceivingHeader,
    ReceivingBody,
    Done,
    Failed,
}

/// How the body stream of a finished worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Every expected byte arrived, or the peer closed a stream of unknown length.
    Complete,
    /// No data within the idle timeout; treated as the end of the stream.
    TimedOut,
    /// The peer closed the connection before the range was filled.
    Incomplete { expected: u64 },
    /// The transfer was asked to stop.
    Stopped,
}

/// The output of a finished worker, handed over to the assembler.
#[derive(Debug)]
pub struct Segment {
    pub index: usize,
    pub range: Option<RangeSpec>,
    pub received: u64,
    pub completion: Completion,
    scratch: File,
}

impl Segment {
    /// The scratch store, rewound to its start.
    pub fn into_scratch(self) -> File {
        self.scratch
    }

    /// `IncompleteRange` when the peer closed a range early.
    pub fn shortfall(&self) -> Option<Error> {
        match (self.completion, self.range) {
            (Completion::Incomplete { expected }, Some(range)) => Some(Error::IncompleteRange {
                range,
                received: self.received,
                expected,
            }),
            (Completion::Incomplete { expected }, None) => Some(Error::IncompleteRange {
                range: RangeSpec::new(0, expected.saturating_sub(1)),
                received: self.received,
                expected,
            }),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct TransferWorker {
    index: usize,
    url: UrlRef,
    range: Option<RangeSpec>,
    /// Bytes this worker should receive, when known.
    expected: Option<u64>,
    headers: Arc<Vec<(String, String)>>,
    shared: Arc<TransferState>,
    buffer_size: usize,
    connect_timeout: Duration,
    idle_timeout: Duration,
    phase: WorkerState,
}

impl TransferWorker {
    pub fn new(
        index: usize,
        url: UrlRef,
        range: Option<RangeSpec>,
        headers: Arc<Vec<(String, String)>>,
        shared: Arc<TransferState>,
        config: &DownloadConfig,
    ) -> Self {
        Self {
            index,
            url,
            range,
            expected: range.map(|range| range.len()),
            headers,
            shared,
            buffer_size: config.read_size(),
            connect_timeout: config.connect_timeout,
            idle_timeout: config.idle_timeout,
            phase: WorkerState::Connecting,
        }
    }

    /// Caps an unranged worker at the length announced by the server.
    #[inline]
    pub fn with_expected_len(self, expected: Option<u64>) -> Self {
        Self {
            expected: self.range.map(|range| range.len()).or(expected),
            ..self
        }
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        self.phase
    }

    fn enter(&mut self, phase: WorkerState) {
        tracing::trace!("Worker {} {:?} -> {:?}", self.index, self.phase, phase);
        self.phase = phase;
    }

    /// Connects, sends the request and streams the body into a fresh scratch store.
    pub async fn run(mut self) -> Result<Segment> {
        self.shared.connection_opened();
        let result = self.execute().await;
        self.shared.connection_closed();
        self.finish(result)
    }

    /// Streams the body of a response whose head has already been read on `conn`.
    pub async fn run_with(mut self, conn: Connection, head: ResponseHead) -> Result<Segment> {
        self.shared.connection_opened();
        let result = match self.check_status(&head) {
            Ok(()) => self.receive(conn, head.body_prefix).await,
            Err(err) => Err(err),
        };
        self.shared.connection_closed();
        self.finish(result)
    }

    fn finish(&mut self, result: Result<Segment>) -> Result<Segment> {
        match &result {
            Ok(segment) => {
                self.enter(WorkerState::Done);
                self.shared.chunk_completed();
                tracing::debug!(
                    "Worker {} done: {} bytes ({:?})",
                    self.index,
                    segment.received,
                    segment.completion
                );
            }
            Err(err) => {
                self.enter(WorkerState::Failed);
                tracing::debug!("Worker {} failed: {err}", self.index);
            }
        }
        result
    }

    async fn execute(&mut self) -> Result<Segment> {
        self.enter(WorkerState::Connecting);
        tracing::debug!(
            "Worker {} connecting to {}:{} for {}",
            self.index,
            self.url.host(),
            self.url.port(),
            self.range
                .map_or_else(|| "the whole body".to_string(), |range| format!("bytes {range}"))
        );
        let mut conn = net::connect(&self.url, self.connect_timeout).await?;

        let request = wire::build_request(&self.url, &self.headers, self.range);
        net::send_request(&mut conn, &request).await?;
        self.enter(WorkerState::RequestSent);

        self.enter(WorkerState::ReceivingHeader);
        let head = net::read_head(&mut conn, self.idle_timeout, self.buffer_size).await?;
        self.check_status(&head)?;

        self.receive(conn, head.body_prefix).await
    }

    fn check_status(&self, head: &ResponseHead) -> Result<()> {
        if !head.is_success() {
            return Err(Error::Http(head.status_code));
        }

        match self.range {
            // a plain 200 still starts at byte 0, so the first range can use it
            Some(range) if head.status_code != 206 && range.start > 0 => {
                Err(Error::RangeIgnored(range, head.status_code))
            }
            _ => Ok(()),
        }
    }

    async fn receive(&mut self, mut conn: Connection, prefix: Vec<u8>) -> Result<Segment> {
        self.enter(WorkerState::ReceivingBody);

        let scratch = tempfile::tempfile().map_err(|err| Error::write(std::env::temp_dir(), err))?;
        let mut sink = BufWriter::new(File::from_std(scratch));

        let mut received = 0u64;
        let mut filled = self.store(&mut sink, &prefix, &mut received).await?;
        let mut chunk = vec![0u8; self.buffer_size];

        let completion = loop {
            if filled {
                break Completion::Complete;
            }
            if self.shared.should_stop() {
                break Completion::Stopped;
            }

            match time::timeout(self.idle_timeout, conn.read(&mut chunk)).await {
                Err(_) => {
                    tracing::debug!(
                        "Worker {} idle for {:?}, ending stream",
                        self.index,
                        self.idle_timeout
                    );
                    break Completion::TimedOut;
                }
                Ok(Err(err)) => return Err(Error::Receive(err)),
                Ok(Ok(0)) => {
                    break match self.expected {
                        Some(expected) if received < expected => {
                            Completion::Incomplete { expected }
                        }
                        _ => Completion::Complete,
                    };
                }
                Ok(Ok(read)) => {
                    filled = self.store(&mut sink, &chunk[..read], &mut received).await?;
                }
            }
        };
        drop(conn);

        let scratch_error = |err| Error::write(std::env::temp_dir(), err);
        sink.flush().await.map_err(scratch_error)?;
        let mut scratch = sink.into_inner();
        scratch.seek(SeekFrom::Start(0)).await.map_err(scratch_error)?;

        Ok(Segment {
            index: self.index,
            range: self.range,
            received,
            completion,
            scratch,
        })
    }

    /// Appends `bytes` to the scratch store, dropping anything past the expected length.
    ///
    /// Returns whether the expected length has been reached.
    async fn store(
        &self,
        sink: &mut BufWriter<File>,
        bytes: &[u8],
        received: &mut u64,
    ) -> Result<bool> {
        let keep = match self.expected {
            Some(expected) => {
                let remaining = expected.saturating_sub(*received);
                bytes.len().min(usize::try_from(remaining).unwrap_or(usize::MAX))
            }
            None => bytes.len(),
        };
        if keep < bytes.len() {
            tracing::trace!(
                "Worker {} discarding {} surplus bytes",
                self.index,
                bytes.len() - keep
            );
        }

        if keep > 0 {
            sink.write_all(&bytes[..keep])
                .await
                .map_err(|err| Error::write(std::env::temp_dir(), err))?;
            *received += keep as u64;
            self.shared.add_received(keep as u64);
        }

        Ok(self.expected.is_some_and(|expected| *received >= expected))
    }
}
