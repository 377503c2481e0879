use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use dossier_core::{
    InvestigationId, InvestigationRecord, InvestigationStatus, SeedInput,
};
use dossier_pipeline::InvestigationCoordinator;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::info;

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub investigation_id: InvestigationId,
    pub status: InvestigationStatus,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default = "ListParams::default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

impl ListParams {
    fn default_limit() -> usize {
        50
    }
}

pub async fn submit_investigation(
    State(state): State<AppState>,
    Json(seed): Json<SeedInput>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    state.reap_finished();

    let handle = InvestigationCoordinator::spawn(state.ctx.clone(), seed)?;
    let record = handle.record();
    info!(investigation_id = %handle.investigation_id, "investigation submitted");

    let response = SubmitResponse {
        investigation_id: handle.investigation_id,
        status: record.status,
        estimated_completion: record.estimated_completion,
    };
    state
        .investigations
        .insert(handle.investigation_id, handle);

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Status comes from the live handle while the investigation runs; the
/// store is authoritative after terminal state.
pub async fn get_investigation(
    State(state): State<AppState>,
    Path(id): Path<InvestigationId>,
) -> ApiResult<Json<InvestigationRecord>> {
    if let Some(handle) = state.investigations.get(&id) {
        return Ok(Json(handle.record()));
    }
    match state.ctx.store.get_investigation(id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(ApiError::NotFound(format!("investigation {}", id))),
    }
}

pub async fn get_report(
    State(state): State<AppState>,
    Path(id): Path<InvestigationId>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(report) = state.ctx.store.get_report(id).await? {
        return Ok(Json(report));
    }
    let known_live = state.investigations.contains_key(&id);
    let known_stored = state.ctx.store.get_investigation(id).await?.is_some();
    if known_live || known_stored {
        Err(ApiError::NotReady(format!(
            "investigation {} has not completed",
            id
        )))
    } else {
        Err(ApiError::NotFound(format!("investigation {}", id)))
    }
}

pub async fn cancel_investigation(
    State(state): State<AppState>,
    Path(id): Path<InvestigationId>,
) -> ApiResult<StatusCode> {
    match state.investigations.get(&id) {
        Some(handle) => {
            handle.cancel();
            Ok(StatusCode::ACCEPTED)
        }
        None => {
            // already terminal is fine; unknown is not
            match state.ctx.store.get_investigation(id).await? {
                Some(_) => Ok(StatusCode::ACCEPTED),
                None => Err(ApiError::NotFound(format!("investigation {}", id))),
            }
        }
    }
}

/// SSE progress feed. Late joiners receive the current status first; the
/// stream ends after the terminal event.
pub async fn investigation_events(
    State(state): State<AppState>,
    Path(id): Path<InvestigationId>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let subscription = match state.investigations.get(&id) {
        Some(handle) => handle.subscribe(),
        None => return Err(ApiError::NotFound(format!("investigation {}", id))),
    };

    let stream = futures::stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        let sse_event = Event::default()
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().data("serialization error"));
        Some((Ok(sse_event), subscription))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn list_investigations(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<InvestigationRecord>>> {
    let records = state
        .ctx
        .store
        .list_investigations(params.limit.min(500), params.offset)
        .await?;
    Ok(Json(records))
}

pub async fn delete_investigation(
    State(state): State<AppState>,
    Path(id): Path<InvestigationId>,
) -> ApiResult<StatusCode> {
    if let Some((_, handle)) = state.investigations.remove(&id) {
        handle.cancel();
    }
    state.ctx.store.delete_investigation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn connector_status(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let statuses = state.ctx.registry.status_sweep().await;
    Ok(Json(serde_json::json!({ "connectors": statuses })))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
