use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_util::stream::{Stream, StreamExt};
use tokio::sync::OwnedSemaphorePermit;

use crate::api::auth::AdminUser;
use crate::models::{BackupStats, RebuildAck, RebuildFilters, VectorHealth};
use crate::rebuild::{spawn_background_rebuild, stream_rebuild, RebuildFrame, RebuildParams};
use crate::state::AppState;

/// POST /rag/admin/vector/rebuild - Start a rebuild in the background
pub async fn rebuild(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(filters): Query<RebuildFilters>,
) -> Result<(StatusCode, Json<RebuildAck>), (StatusCode, String)> {
    let params = validate(&state, &filters)?;
    let permit = acquire_rebuild_slot(&state)?;

    tracing::info!(
        "Admin {} started rebuild {} (user_filter={:?}, document_filter={:?}, batch_size={})",
        admin.user_id,
        params.run_id,
        params.user_filter,
        params.document_filter,
        params.batch_size
    );

    let ack = RebuildAck {
        message: "Vector store rebuild started".to_string(),
        run_id: params.run_id,
        filters: RebuildFilters {
            user_filter: params.user_filter.clone(),
            document_filter: params.document_filter.clone(),
            batch_size: Some(params.batch_size),
        },
    };

    let handle = spawn_background_rebuild(state.rebuild_service(), params, permit);
    tokio::spawn(async move {
        match handle.await {
            Ok(summary) => tracing::info!(
                "Background rebuild {} finished as {} ({} of {} chunks)",
                summary.run_id,
                summary.status.as_str(),
                summary.processed_chunks,
                summary.total_chunks
            ),
            Err(e) => tracing::error!("Background rebuild task panicked: {e}"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// POST /rag/admin/vector/rebuild/stream - Rebuild with SSE progress
pub async fn rebuild_stream(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    Query(filters): Query<RebuildFilters>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    let params = validate(&state, &filters)?;
    let permit = acquire_rebuild_slot(&state)?;

    tracing::info!(
        "Admin {} started streamed rebuild {} (batch_size={})",
        admin.user_id,
        params.run_id,
        params.batch_size
    );

    let rebuild_config = &state.config.rebuild;
    let timeout = Duration::from_secs(rebuild_config.stream_timeout_secs);
    let keep_alive = Duration::from_secs(rebuild_config.keep_alive_secs);

    let frames = stream_rebuild(state.rebuild_service(), params, permit, timeout);
    let events = frames.map(|frame| Ok::<_, Infallible>(frame_to_event(frame)));

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(keep_alive)))
}

/// GET /rag/admin/vector/backup/stats - What the backup store can restore
pub async fn backup_stats(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<BackupStats>, (StatusCode, String)> {
    state.backup.stats().await.map(Json).map_err(|e| {
        tracing::error!("Failed to read backup statistics: {e:#}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to get backup statistics: {e}"),
        )
    })
}

/// GET /rag/admin/vector/health - Vector store contents against the backup
pub async fn vector_health(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<VectorHealth>, (StatusCode, String)> {
    let backup = state.backup.stats().await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to read backup store: {e}"),
        )
    })?;
    let vectors = state.vectors.stats();

    let status = if vectors.total_entities == backup.total_chunks {
        "healthy"
    } else {
        "degraded"
    };

    Ok(Json(VectorHealth {
        status: status.to_string(),
        vectors,
        backup_chunks: backup.total_chunks,
        backup_documents: backup.total_documents,
        rebuild_in_progress: state.rebuild_semaphore.available_permits() == 0,
    }))
}

fn validate(state: &AppState, filters: &RebuildFilters) -> Result<RebuildParams, (StatusCode, String)> {
    RebuildParams::from_filters(filters, &state.config.rebuild).map_err(|e| (StatusCode::BAD_REQUEST, e))
}

fn acquire_rebuild_slot(state: &AppState) -> Result<OwnedSemaphorePermit, (StatusCode, String)> {
    state.rebuild_semaphore.clone().try_acquire_owned().map_err(|_| {
        (
            StatusCode::CONFLICT,
            "A rebuild is already in progress".to_string(),
        )
    })
}

fn frame_to_event(frame: RebuildFrame) -> Event {
    match frame {
        RebuildFrame::Update(update) => {
            let mut event = Event::default().event("rebuild_update");
            // Whole seconds
            if let Some(ts) = update.timestamp {
                event = event.id((ts as u64).to_string());
            }
            event.json_data(&update).unwrap_or_else(|e| {
                tracing::error!("Failed to encode progress event: {e}");
                error_event("Failed to encode progress event")
            })
        }
        RebuildFrame::Error(message) => error_event(&message),
    }
}

fn error_event(message: &str) -> Event {
    let payload = serde_json::json!({ "error": message, "status": "failed" });
    Event::default().event("error").data(payload.to_string())
}
