//! Import routes
//!
//! The upload adapter accepts the roster file, registers the job, and
//! answers with the upload id before any row is processed. The events route
//! is the long-lived push stream; the plain status route serves one-shot
//! polls.

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::Stream;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use crate::api::response::{ApiResponse, ErrorResponse};
use crate::config::ImportConfig;
use crate::error::AppError;
use crate::import::{job, JobRegistry, ProgressPublisher, StreamMessage};
use crate::store::{GroupDirectory, StudentStore};

/// Shared state for the import routes
#[derive(Clone)]
pub struct ImportState {
    pub registry: Arc<JobRegistry>,
    pub publisher: Arc<ProgressPublisher>,
    pub store: Arc<dyn StudentStore>,
    pub directory: Arc<dyn GroupDirectory>,
    pub config: ImportConfig,
}

/// Create import routes
pub fn import_routes(max_upload_bytes: usize) -> Router<ImportState> {
    Router::new()
        .route("/imports/students", post(upload_roster))
        .route("/imports/students/:upload_id", get(get_status))
        .route("/imports/students/:upload_id/events", get(stream_events))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

#[derive(Debug, Serialize)]
struct UploadAccepted {
    upload_id: String,
    total: u64,
}

/// Accept a roster CSV and start the ingest job.
///
/// POST /imports/students (multipart, `file` field)
///
/// Returns the upload id as soon as the job is registered; the request
/// never waits for ingestion.
#[tracing::instrument(skip(state, multipart))]
async fn upload_roster(
    State(state): State<ImportState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut content: Option<Vec<u8>> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed to read multipart field: {}", e)))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(format!("failed to read file bytes: {}", e)))?;
            content = Some(data.to_vec());
        }
    }

    let Some(content) = content else {
        return Ok(reject("MISSING_FILE", "no file field found in multipart data"));
    };

    // Pre-scan: count rows and reject unreadable or empty files before a
    // job identifier is ever issued.
    let total = match job::count_data_rows(&content) {
        Err(e) => return Ok(reject("UNREADABLE_FILE", format!("file is not readable CSV: {}", e))),
        Ok(0) => return Ok(reject("EMPTY_FILE", "file contains no data rows")),
        Ok(total) => total,
    };

    let (upload_id, handle) = state.registry.create(total).await;
    state.publisher.register(&upload_id).await;

    let ctx = job::IngestContext {
        publisher: state.publisher.clone(),
        store: state.store.clone(),
        directory: state.directory.clone(),
    };
    tokio::spawn(job::run(ctx, upload_id.clone(), handle, content));

    tracing::info!(upload_id = %upload_id, total = total, "roster upload accepted");

    Ok((
        StatusCode::OK,
        Json(ApiResponse::success(UploadAccepted { upload_id, total })),
    )
        .into_response())
}

/// Read the current snapshot of one upload.
///
/// GET /imports/students/:upload_id
async fn get_status(
    State(state): State<ImportState>,
    Path(upload_id): Path<String>,
) -> Result<Response, AppError> {
    let handle = state
        .registry
        .get(&upload_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("unknown upload: {}", upload_id)))?;

    let snapshot = handle.read().await.snapshot();
    Ok((StatusCode::OK, Json(ApiResponse::success(snapshot))).into_response())
}

/// Attach to the live progress feed of one upload.
///
/// GET /imports/students/:upload_id/events
///
/// Replays the latest snapshot first, then forwards every published
/// message; the stream is closed server-side after the terminal one.
async fn stream_events(
    State(state): State<ImportState>,
    Path(upload_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let subscription = state
        .publisher
        .subscribe(&upload_id)
        .await
        .map_err(|_| AppError::NotFound(format!("unknown upload: {}", upload_id)))?;

    let (tx, rx) = mpsc::channel::<StreamMessage>(state.config.channel_capacity);
    tokio::spawn(forward_messages(subscription.replay, subscription.live, tx));

    let stream = ReceiverStream::new(rx).map(|message| Event::default().json_data(&message));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Pump one subscriber: replay, then live messages until the terminal one.
///
/// A send error means the client went away; the job itself keeps running.
async fn forward_messages(
    replay: Option<StreamMessage>,
    mut live: broadcast::Receiver<StreamMessage>,
    tx: mpsc::Sender<StreamMessage>,
) {
    if let Some(message) = replay {
        let terminal = message.is_terminal();
        if tx.send(message).await.is_err() || terminal {
            return;
        }
    }

    loop {
        match live.recv().await {
            Ok(message) => {
                let terminal = message.is_terminal();
                if tx.send(message).await.is_err() || terminal {
                    return;
                }
            },
            // Lagged means the bounded queue dropped old frames; newer ones
            // (including the terminal) are still coming.
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped = skipped, "subscriber lagged, dropping oldest frames");
                continue;
            },
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

fn reject(code: &str, message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(code, message))).into_response()
}
