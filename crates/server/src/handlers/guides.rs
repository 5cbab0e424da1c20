//! # Guide Handlers
//!
//! The streaming endpoint that produces a guide, and the library endpoints that let a
//! caller list, read, save and remove the guides they own.

use super::{ApiResponse, AppError, AppState};
use crate::auth::middleware::CallerIdentity;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use core_access::{find_ownership, list_ownerships, remove_ownership, set_saved, ListOptions};
use devotio::{
    events::GuideEvent,
    types::{GenerationMode, GuideRequest, GuideSections, InputType, SectionKind},
    ContentRecord,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

const MAX_PAGE_SIZE: u32 = 100;

fn to_sse(event: GuideEvent) -> Result<Event, Infallible> {
    let sse = match event.data() {
        Ok(data) => Event::default().event(event.name()).data(data),
        Err(e) => {
            warn!("Failed to serialize '{}' event: {e}", event.name());
            Event::default().event("error").data(
                json!({
                    "code": "STORAGE_ERROR",
                    "message": "Failed to encode event.",
                    "retryable": true
                })
                .to_string(),
            )
        }
    };
    Ok(sse)
}

/// `POST /guides/stream`: produces a guide as a stream of server-sent events.
///
/// Every outcome, failures included, is delivered inside the stream; the stream always
/// ends with exactly one `complete` or `error` event.
pub async fn guide_stream_handler(
    State(app_state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Json(request): Json<GuideRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(
        %caller,
        input_type = request.input_type.as_str(),
        mode = request.mode.as_str(),
        "Received guide stream request."
    );
    let rx = app_state.guide_service.start(request, caller);
    Sse::new(ReceiverStream::new(rx).map(to_sse))
        .keep_alive(KeepAlive::new().interval(app_state.config.generation.keepalive()))
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    #[serde(default)]
    pub saved_only: bool,
}

/// A row in the caller's library.
#[derive(Debug, Serialize, Deserialize)]
pub struct LibraryEntry {
    pub id: String,
    pub input_type: InputType,
    pub input_value: Option<String>,
    pub language: String,
    pub mode: GenerationMode,
    pub summary: Option<Value>,
    pub is_saved: bool,
    pub created_at: DateTime<Utc>,
}

/// A full guide as the owning caller sees it. The creator stays private.
#[derive(Debug, Serialize, Deserialize)]
pub struct GuideView {
    pub id: String,
    pub input_type: InputType,
    pub input_value: Option<String>,
    pub language: String,
    pub mode: GenerationMode,
    pub sections: GuideSections,
    pub enrichment: serde_json::Map<String, Value>,
    pub is_saved: bool,
    pub created_at: DateTime<Utc>,
}

impl GuideView {
    fn new(record: ContentRecord, is_saved: bool) -> Self {
        Self {
            id: record.id,
            input_type: record.key.input_type,
            input_value: record.input_value,
            language: record.key.language,
            mode: record.key.mode,
            sections: record.sections,
            enrichment: record.enrichment,
            is_saved,
            created_at: record.created_at,
        }
    }
}

/// `GET /guides`: the caller's library, newest first.
pub async fn list_guides_handler(
    State(app_state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<LibraryEntry>>>, AppError> {
    let defaults = ListOptions::default();
    let options = ListOptions {
        limit: params.limit.unwrap_or(defaults.limit).clamp(1, MAX_PAGE_SIZE),
        offset: params.offset.unwrap_or(defaults.offset),
        saved_only: params.saved_only,
    };
    let ownerships = list_ownerships(&app_state.sqlite_provider.db, &caller, options).await?;

    let mut entries = Vec::with_capacity(ownerships.len());
    for ownership in ownerships {
        let Some(record) = app_state.contents.get(&ownership.content_id).await? else {
            warn!(content_id = %ownership.content_id, "Ownership points at missing content.");
            continue;
        };
        entries.push(LibraryEntry {
            summary: record.sections.get(SectionKind::Summary).cloned(),
            id: record.id,
            input_type: record.key.input_type,
            input_value: record.input_value,
            language: record.key.language,
            mode: record.key.mode,
            is_saved: ownership.is_saved,
            created_at: ownership.created_at,
        });
    }
    Ok(Json(ApiResponse { result: entries }))
}

/// `GET /guides/{id}`: a guide the caller owns.
pub async fn get_guide_handler(
    State(app_state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<GuideView>>, AppError> {
    let ownership = find_ownership(&app_state.sqlite_provider.db, &id, &caller)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Guide '{id}'")))?;
    let record = app_state
        .contents
        .get(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Guide '{id}'")))?;
    Ok(Json(ApiResponse {
        result: GuideView::new(record, ownership.is_saved),
    }))
}

#[derive(Debug, Deserialize)]
pub struct SetSavedRequest {
    pub is_saved: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SavedState {
    pub id: String,
    pub is_saved: bool,
}

/// `PUT /guides/{id}/saved`: bookmarks or un-bookmarks an owned guide.
pub async fn set_saved_handler(
    State(app_state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
    Json(payload): Json<SetSavedRequest>,
) -> Result<Json<ApiResponse<SavedState>>, AppError> {
    let ownership = set_saved(
        &app_state.sqlite_provider.db,
        &id,
        &caller,
        payload.is_saved,
    )
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Guide '{id}'")))?;
    Ok(Json(ApiResponse {
        result: SavedState {
            id: ownership.content_id,
            is_saved: ownership.is_saved,
        },
    }))
}

/// `DELETE /guides/{id}`: removes the guide from the caller's library. The shared
/// content row is untouched.
pub async fn delete_guide_handler(
    State(app_state): State<AppState>,
    CallerIdentity(caller): CallerIdentity,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if remove_ownership(&app_state.sqlite_provider.db, &id, &caller).await? {
        info!(%caller, content_id = %id, "Removed guide from library.");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound(format!("Guide '{id}'")))
    }
}
