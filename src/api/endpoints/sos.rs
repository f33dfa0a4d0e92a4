//! SOS and medication event endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::extract::{parse_id, ApiJson};
use crate::api::types::{AccountContext, ApiContext};
use crate::models::{AlertStatus, Location, MedicationStatus, SosAlert};

#[derive(Deserialize)]
pub struct TriggerRequest {
    pub location: Location,
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub status: AlertStatus,
}

#[derive(Deserialize)]
pub struct MedicationEventRequest {
    pub medicine: String,
    pub status: MedicationStatus,
}

#[derive(Serialize)]
pub struct AlertResponse {
    pub alert: SosAlert,
}

#[derive(Serialize)]
pub struct AlertListResponse {
    pub alerts: Vec<SosAlert>,
}

/// `POST /api/caregivers/sos`: record an SOS and notify caregivers.
///
/// Fan-out is best-effort; the alert is returned once it is stored.
pub async fn trigger(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    ApiJson(body): ApiJson<TriggerRequest>,
) -> Result<(StatusCode, Json<AlertResponse>), ApiError> {
    let alert = {
        let conn = ctx.core.db()?;
        ctx.core
            .dispatcher()
            .trigger_sos(&conn, caller.account.id, body.location)?
    };
    Ok((StatusCode::CREATED, Json(AlertResponse { alert })))
}

/// `GET /api/caregivers/sos`: the caller's alerts, newest first.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
) -> Result<Json<AlertListResponse>, ApiError> {
    let conn = ctx.core.db()?;
    let alerts = ctx.core.dispatcher().list_alerts(&conn, &caller.account.id)?;
    Ok(Json(AlertListResponse { alerts }))
}

/// `POST /api/caregivers/sos/:id/resolve`
pub async fn resolve(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ResolveRequest>,
) -> Result<Json<AlertResponse>, ApiError> {
    let alert_id = parse_id(&id)?;
    let conn = ctx.core.db()?;
    let alert =
        ctx.core
            .dispatcher()
            .resolve_sos(&conn, &caller.account, &alert_id, body.status)?;
    Ok(Json(AlertResponse { alert }))
}

/// `POST /api/caregivers/medication-events`
pub async fn medication_event(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    ApiJson(body): ApiJson<MedicationEventRequest>,
) -> Result<StatusCode, ApiError> {
    let conn = ctx.core.db()?;
    ctx.core.dispatcher().publish_medication_event(
        &conn,
        caller.account.id,
        &body.medicine,
        body.status,
    )?;
    Ok(StatusCode::ACCEPTED)
}
