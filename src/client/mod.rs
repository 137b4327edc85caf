//! Client for the admin rebuild endpoints.
//!
//! [`RebuildClient::rebuild_stream`] exposes a streamed rebuild as an async
//! [`Stream`] of progress events that ends after the terminal event and can be
//! cancelled with a [`CancellationToken`]. [`RebuildClient::rebuild_with_progress`]
//! drives that stream to completion and reports every event to a callback.

pub mod sse;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::stream::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::{BackupStats, RebuildAck, RebuildFilters, RebuildOutcome, RebuildProgressEvent};

const REBUILD_PATH: &str = "/rag/admin/vector/rebuild";
const REBUILD_STREAM_PATH: &str = "/rag/admin/vector/rebuild/stream";
const BACKUP_STATS_PATH: &str = "/rag/admin/vector/backup/stats";

/// Progress events of one streamed rebuild run.
pub type RebuildEventStream = Pin<Box<dyn Stream<Item = Result<RebuildProgressEvent>> + Send>>;

#[derive(Clone)]
pub struct RebuildClient {
    http: reqwest::Client,
    config: ClientConfig,
    /// Set while a streamed rebuild from this client is in flight.
    active: Arc<AtomicBool>,
}

impl RebuildClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http_client(http, config))
    }

    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Self {
        Self {
            http,
            config,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a streamed rebuild started by this client is still running.
    pub fn is_rebuilding(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a rebuild on the server without following its progress.
    pub async fn trigger_rebuild(&self, filters: &RebuildFilters) -> Result<RebuildAck> {
        validate_filters(filters)?;

        let response = self
            .authorized(self.http.post(self.url(REBUILD_PATH)))
            .timeout(self.config.request_timeout())
            .query(filters)
            .send()
            .await?;
        let ack: RebuildAck = check_status(response).await?.json().await?;

        tracing::info!("Rebuild {} accepted: {}", ack.run_id, ack.message);
        Ok(ack)
    }

    pub async fn backup_stats(&self) -> Result<BackupStats> {
        let response = self
            .authorized(self.http.get(self.url(BACKUP_STATS_PATH)))
            .timeout(self.config.request_timeout())
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Start a streamed rebuild and return its progress events.
    ///
    /// Fails with [`Error::Transport`] if the initiating request does not
    /// succeed, and with [`Error::RebuildInProgress`] while another stream
    /// from this client is still open. Malformed event lines are logged and
    /// skipped. If the connection closes before a `completed` or `failed`
    /// event, the stream's last item is [`Error::StreamTruncated`]. Cancelling
    /// `cancel` ends the stream with [`Error::Cancelled`] and closes the
    /// connection.
    pub async fn rebuild_stream(
        &self,
        filters: &RebuildFilters,
        cancel: CancellationToken,
    ) -> Result<RebuildEventStream> {
        validate_filters(filters)?;
        let guard = ActiveRebuild::acquire(&self.active)?;

        let request = self
            .authorized(self.http.post(self.url(REBUILD_STREAM_PATH)))
            .header(ACCEPT, "text/event-stream")
            .query(filters);

        tracing::info!("Requesting streamed rebuild with filters {:?}", filters);
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = request.send() => response?,
        };
        let response = check_status(response).await?;

        let lines = sse::stream_lines(response.bytes_stream());
        Ok(Box::pin(progress_events(lines, cancel, guard)))
    }

    /// Run a streamed rebuild to its end, invoking `on_progress` for every
    /// event including the terminal one.
    ///
    /// A server-reported failure is returned as `Ok` with `success == false`;
    /// use [`RebuildOutcome::into_result`] to treat it as an error.
    pub async fn rebuild_with_progress<F>(
        &self,
        filters: &RebuildFilters,
        cancel: CancellationToken,
        mut on_progress: F,
    ) -> Result<RebuildOutcome>
    where
        F: FnMut(&RebuildProgressEvent),
    {
        let mut events = self.rebuild_stream(filters, cancel).await?;
        let mut last_event = None;

        while let Some(event) = events.next().await {
            let event = event?;
            on_progress(&event);
            if event.is_terminal() {
                let outcome = RebuildOutcome::from_terminal(event);
                if outcome.success {
                    tracing::info!("Rebuild completed: {}", outcome.message());
                } else {
                    tracing::warn!("Rebuild failed: {}", outcome.message());
                }
                return Ok(outcome);
            }
            last_event = Some(Box::new(event));
        }

        Err(Error::StreamTruncated { last_event })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn validate_filters(filters: &RebuildFilters) -> Result<()> {
    if filters.batch_size == Some(0) {
        return Err(Error::InvalidFilters("batch_size must be positive".to_string()));
    }
    Ok(())
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!("Rebuild API returned {status}: {body}");
    Err(Error::http_status(status.as_u16(), &body))
}

/// Holds the client's in-flight flag; cleared on drop.
struct ActiveRebuild(Arc<AtomicBool>);

impl ActiveRebuild {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::RebuildInProgress)?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for ActiveRebuild {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct EventState<L> {
    lines: Pin<Box<L>>,
    cancel: CancellationToken,
    last_event: Option<RebuildProgressEvent>,
    guard: Option<ActiveRebuild>,
    done: bool,
}

fn progress_events<L>(
    lines: L,
    cancel: CancellationToken,
    guard: ActiveRebuild,
) -> impl Stream<Item = Result<RebuildProgressEvent>> + Send
where
    L: Stream<Item = Result<String>> + Send + 'static,
{
    let state = EventState {
        lines: Box::pin(lines),
        cancel,
        last_event: None,
        guard: Some(guard),
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            let next = tokio::select! {
                biased;
                _ = state.cancel.cancelled() => Err(Error::Cancelled),
                line = state.lines.next() => Ok(line),
            };

            let item = match next {
                Err(cancelled) => {
                    tracing::info!("Rebuild stream cancelled by caller");
                    Err(cancelled)
                }
                Ok(Some(Ok(line))) => match sse::parse_event_line(&line) {
                    None => continue,
                    Some(Err(e)) => {
                        tracing::warn!("Skipping malformed progress event: {e}");
                        continue;
                    }
                    Some(Ok(event)) => {
                        if !event.is_terminal() {
                            state.last_event = Some(event.clone());
                            return Some((Ok(event), state));
                        }
                        Ok(event)
                    }
                },
                Ok(Some(Err(e))) => {
                    tracing::warn!("Rebuild stream read failed: {e}");
                    Err(e)
                }
                Ok(None) => {
                    tracing::warn!("Rebuild stream closed before a terminal event");
                    Err(Error::StreamTruncated {
                        last_event: state.last_event.take().map(Box::new),
                    })
                }
            };

            state.done = true;
            state.guard = None;
            return Some((item, state));
        }
    })
}
