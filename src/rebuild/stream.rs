use std::time::Duration;

use futures_util::stream::Stream;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::models::{RebuildProgressEvent, RebuildSummary};
use crate::rebuild::engine::{RebuildParams, RebuildService};
use crate::rebuild::progress::ProgressEmitter;

/// One item of a streamed rebuild, before SSE encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum RebuildFrame {
    Update(RebuildProgressEvent),
    /// The run ended without a terminal event reaching the stream.
    Error(String),
}

/// Run a rebuild in the background without a subscriber. The permit is held
/// until the run ends.
pub fn spawn_background_rebuild(
    service: RebuildService,
    params: RebuildParams,
    permit: OwnedSemaphorePermit,
) -> tokio::task::JoinHandle<RebuildSummary> {
    tokio::spawn(async move {
        let _permit = permit;
        let mut emitter = ProgressEmitter::silent();
        service
            .rebuild(&params, &mut emitter, &CancellationToken::new())
            .await
    })
}

/// Run a rebuild in the background and expose its progress as a stream.
///
/// The stream ends after the terminal event. When `timeout` elapses first it
/// yields a single [`RebuildFrame::Error`] and cancels the run. Dropping the
/// stream (client disconnect) also cancels the run.
pub fn stream_rebuild(
    service: RebuildService,
    params: RebuildParams,
    permit: OwnedSemaphorePermit,
    timeout: Duration,
) -> impl Stream<Item = RebuildFrame> + Send + 'static {
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let run_cancel = cancel.clone();
    tokio::spawn(async move {
        let _permit = permit;
        let mut emitter = ProgressEmitter::new(tx);
        service.rebuild(&params, &mut emitter, &run_cancel).await
    });

    progress_frames(rx, cancel, timeout)
}

struct FrameState {
    rx: mpsc::UnboundedReceiver<RebuildProgressEvent>,
    deadline: Instant,
    cancel: CancellationToken,
    _cancel_on_drop: DropGuard,
    done: bool,
}

fn progress_frames(
    rx: mpsc::UnboundedReceiver<RebuildProgressEvent>,
    cancel: CancellationToken,
    timeout: Duration,
) -> impl Stream<Item = RebuildFrame> + Send + 'static {
    let state = FrameState {
        rx,
        deadline: Instant::now() + timeout,
        _cancel_on_drop: cancel.clone().drop_guard(),
        cancel,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        match tokio::time::timeout_at(state.deadline, state.rx.recv()).await {
            Ok(Some(event)) => {
                state.done = event.is_terminal();
                Some((RebuildFrame::Update(event), state))
            }
            Ok(None) => {
                state.done = true;
                tracing::error!("Rebuild task stopped without a terminal event");
                Some((
                    RebuildFrame::Error("Rebuild task ended unexpectedly".to_string()),
                    state,
                ))
            }
            Err(_) => {
                state.done = true;
                tracing::warn!("Streamed rebuild exceeded its deadline; cancelling");
                state.cancel.cancel();
                Some((RebuildFrame::Error("Rebuild timeout".to_string()), state))
            }
        }
    })
}
