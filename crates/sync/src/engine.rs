//! Fan-out copy of one source to many destinations
//!
//! A single reader cuts the source into fixed-size chunks and offers each
//! chunk to every live destination over its own bounded channel. Each
//! destination has a writer task that acknowledges chunks into its
//! scoreboard. A writer that fails is marked dead, drops its channel and is
//! skipped from then on; the others carry on.
//!
//! Back-pressure is shared: the reader offers a chunk to every route before
//! reading the next one, so no destination gets more than `channel_depth + 2`
//! chunks ahead of the slowest live one. A stalled writer holds the whole copy
//! until it writes or fails.

use refurb_config::SyncConfig;
use refurb_errors::SyncError;
use refurb_events::{AppEvent, EventEmitter, EventSender, SharedReporter, SyncEvent};
use refurb_types::ScoreboardSnapshot;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::scoreboard::{with_board, Scoreboard, SharedScoreboard};
use crate::writer::DestinationWriter;

/// Overall result of a fan-out copy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every destination received the whole source
    Completed,
    /// Some, but not all, destinations died
    CompletedWithFailures,
    /// No destination survived
    Failed,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::CompletedWithFailures => "completed with failures",
            Self::Failed => "failed",
        })
    }
}

/// What a finished copy produced
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub bytes_read: u64,
    pub destinations: Vec<ScoreboardSnapshot>,
}

impl SyncReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.destinations.iter().filter(|d| !d.alive).count()
    }

    /// Turn anything short of full success into an error
    ///
    /// # Errors
    ///
    /// Returns `SyncError::PartialFailure` or `SyncError::AllDestinationsFailed`.
    pub fn into_result(self) -> Result<Self, SyncError> {
        let total = self.destinations.len();
        match self.outcome {
            SyncOutcome::Completed => Ok(self),
            SyncOutcome::CompletedWithFailures => Err(SyncError::PartialFailure {
                failed: self.failed(),
                total,
            }),
            SyncOutcome::Failed => Err(SyncError::AllDestinationsFailed { total }),
        }
    }
}

/// Read-only view of a running copy plus its cancel switch
#[derive(Clone, Default)]
pub struct SyncMonitor {
    boards: Vec<SharedScoreboard>,
    cancelled: Arc<AtomicBool>,
}

impl SyncMonitor {
    #[must_use]
    pub fn snapshots(&self) -> Vec<ScoreboardSnapshot> {
        self.boards
            .iter()
            .map(|b| with_board(b, |board| board.snapshot()))
            .collect()
    }

    /// Stop reading the source; the copy ends with `SyncError::Cancelled`
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct Destination {
    writer: Option<Box<dyn DestinationWriter>>,
    board: SharedScoreboard,
}

struct Route {
    key: String,
    tx: mpsc::Sender<Arc<[u8]>>,
    board: SharedScoreboard,
}

/// One fan-out copy, configured then consumed by [`SyncEngine::run`]
pub struct SyncEngine {
    chunk_size: usize,
    channel_depth: usize,
    status_interval: Duration,
    total_size: u64,
    destinations: Vec<Destination>,
    monitor: SyncMonitor,
    events: Option<EventSender>,
}

impl SyncEngine {
    /// `total_size` is the source length, used for percentages and ETAs
    #[must_use]
    pub fn new(config: &SyncConfig, total_size: u64) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            channel_depth: config.channel_depth.max(1),
            status_interval: config.status_interval(),
            total_size,
            destinations: Vec::new(),
            monitor: SyncMonitor::default(),
            events: None,
        }
    }

    /// Emit destination failures and the final summary on this channel
    #[must_use]
    pub fn with_events(mut self, events: Option<EventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn add_destination(&mut self, key: impl Into<String>, writer: Box<dyn DestinationWriter>) {
        let board = Scoreboard::new(key, writer.target(), self.total_size);
        self.push(Some(writer), board);
    }

    /// Record a destination that could not even be opened
    pub fn add_failed_destination(
        &mut self,
        key: impl Into<String>,
        target: impl Into<String>,
        error: impl Into<String>,
    ) {
        let mut board = Scoreboard::new(key, target, self.total_size);
        board.fail(error);
        self.push(None, board);
    }

    fn push(&mut self, writer: Option<Box<dyn DestinationWriter>>, board: Scoreboard) {
        let board = Arc::new(std::sync::Mutex::new(board));
        self.monitor.boards.push(Arc::clone(&board));
        self.destinations.push(Destination { writer, board });
    }

    #[must_use]
    pub fn monitor(&self) -> SyncMonitor {
        self.monitor.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Copy `source` to every destination.
    ///
    /// Scoreboards are reported through `reporter` every status interval
    /// while the copy runs, and once more at the end.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoDestinations` without destinations,
    /// `SyncError::SourceRead` if the source fails and `SyncError::Cancelled`
    /// after [`SyncMonitor::cancel`]. Destination failures are not errors
    /// here; they show in the report's outcome.
    pub async fn run<R>(
        self,
        source_name: &str,
        mut source: R,
        reporter: SharedReporter,
        run_id: Uuid,
    ) -> Result<SyncReport, SyncError>
    where
        R: AsyncRead + Unpin + Send,
    {
        if self.destinations.is_empty() {
            return Err(SyncError::NoDestinations);
        }
        let monitor = self.monitor.clone();
        let events = self.events.clone();

        let mut writers = JoinSet::new();
        let mut routes = Vec::new();
        for destination in self.destinations {
            let Some(writer) = destination.writer else {
                continue;
            };
            let (tx, rx) = mpsc::channel(self.channel_depth);
            let key = with_board(&destination.board, |b| b.key().to_string());
            writers.spawn(write_loop(
                writer,
                rx,
                Arc::clone(&destination.board),
                events.clone(),
                run_id,
            ));
            routes.push(Route {
                key,
                tx,
                board: destination.board,
            });
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let status = tokio::spawn(status_loop(
            monitor.clone(),
            Arc::clone(&reporter),
            run_id,
            self.status_interval,
            stop_rx,
        ));

        tracing::info!(source = source_name, destinations = routes.len(), "fan-out copy started");
        let pumped = pump(&mut source, source_name, routes, self.chunk_size, &monitor).await;

        match &pumped {
            Ok(_) => {
                while let Some(joined) = writers.join_next().await {
                    if let Err(e) = joined {
                        tracing::error!("writer task ended abnormally: {e}");
                    }
                }
            }
            Err(e) => {
                for board in &monitor.boards {
                    with_board(board, |b| b.fail(e.to_string()));
                }
                writers.abort_all();
                while writers.join_next().await.is_some() {}
            }
        }

        let _ = stop_tx.send(());
        if let Err(e) = status.await {
            tracing::debug!("status task ended abnormally: {e}");
        }
        let destinations = monitor.snapshots();
        reporter.report_sync_status(run_id, &destinations);

        let bytes_read = pumped?;
        let alive = destinations.iter().filter(|d| d.alive).count();
        let outcome = if alive == destinations.len() {
            SyncOutcome::Completed
        } else if alive == 0 {
            SyncOutcome::Failed
        } else {
            SyncOutcome::CompletedWithFailures
        };
        tracing::info!(source = source_name, bytes_read, %outcome, "fan-out copy finished");
        if let Some(tx) = &events {
            tx.emit(AppEvent::Sync(SyncEvent::CopyFinished {
                run_id,
                source: source_name.to_string(),
                bytes: bytes_read,
                succeeded: alive,
                failed: destinations.len() - alive,
            }));
        }

        Ok(SyncReport {
            outcome,
            bytes_read,
            destinations,
        })
    }
}

/// Read the whole source, offering every chunk to each live route
async fn pump<R>(
    source: &mut R,
    source_name: &str,
    mut routes: Vec<Route>,
    chunk_size: usize,
    monitor: &SyncMonitor,
) -> Result<u64, SyncError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut total = 0u64;
    loop {
        if monitor.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        routes.retain(|route| with_board(&route.board, |b| b.is_alive()));
        if routes.is_empty() {
            tracing::warn!(source = source_name, "no live destinations left");
            return Ok(total);
        }

        let chunk = read_chunk(source, chunk_size)
            .await
            .map_err(|e| SyncError::SourceRead {
                path: source_name.to_string(),
                message: e.to_string(),
            })?;
        if chunk.is_empty() {
            return Ok(total);
        }
        total += chunk.len() as u64;
        let chunk: Arc<[u8]> = Arc::from(chunk);

        let mut closed = Vec::new();
        // blocks on the first full channel; the others have already been fed
        for (i, route) in routes.iter().enumerate() {
            // a closed channel means the writer already died
            if route.tx.send(Arc::clone(&chunk)).await.is_err() {
                tracing::debug!(key = %route.key, "destination dropped out");
                closed.push(i);
            }
        }
        for i in closed.into_iter().rev() {
            routes.remove(i);
        }
    }
}

/// Fill up to `chunk_size` bytes; a short chunk only happens at end of input
async fn read_chunk<R>(source: &mut R, chunk_size: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

async fn write_loop(
    mut writer: Box<dyn DestinationWriter>,
    mut rx: mpsc::Receiver<Arc<[u8]>>,
    board: SharedScoreboard,
    events: Option<EventSender>,
    run_id: Uuid,
) {
    while let Some(chunk) = rx.recv().await {
        if !with_board(&board, |b| b.is_alive()) {
            return;
        }
        with_board(&board, |b| b.begin_chunk(chunk.len() as u64));
        if let Err(e) = writer.write_chunk(&chunk).await {
            mark_dead(&board, &e, events.as_ref(), run_id);
            return;
        }
        with_board(&board, Scoreboard::ack);
    }

    if !with_board(&board, |b| b.is_alive()) {
        return;
    }
    match writer.finish().await {
        Ok(()) => with_board(&board, Scoreboard::succeed),
        Err(e) => mark_dead(&board, &e, events.as_ref(), run_id),
    }
}

fn mark_dead(
    board: &SharedScoreboard,
    error: &SyncError,
    events: Option<&EventSender>,
    run_id: Uuid,
) {
    let key = with_board(board, |b| {
        b.fail(error.to_string());
        b.key().to_string()
    });
    tracing::warn!(%key, "destination failed: {error}");
    if let Some(tx) = events {
        tx.emit(AppEvent::Sync(SyncEvent::DestinationFailed {
            run_id,
            key,
            error: error.to_string(),
        }));
    }
}

async fn status_loop(
    monitor: SyncMonitor,
    reporter: SharedReporter,
    run_id: Uuid,
    interval: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = &mut stop => break,
            _ = ticker.tick() => reporter.report_sync_status(run_id, &monitor.snapshots()),
        }
    }
}
