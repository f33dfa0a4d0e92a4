//! Caregiver directory endpoints.
//!
//! Invitations and permission changes are made by the patient (the
//! caller); accept and reject are made by the invited caregiver.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::extract::{parse_id, ApiJson};
use crate::api::types::{AccountContext, ApiContext};
use crate::caregivers::{self, Invitation};
use crate::models::{CaredPatient, CaregiverLink, LinkedCaregiver, Permissions};

#[derive(Deserialize)]
pub struct InviteRequest {
    pub email: String,
    #[serde(default)]
    pub relationship: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

#[derive(Deserialize)]
pub struct PermissionsRequest {
    pub permissions: Permissions,
}

#[derive(Serialize)]
pub struct LinkResponse {
    pub link: CaregiverLink,
}

#[derive(Serialize)]
pub struct CaregiverListResponse {
    pub links: Vec<LinkedCaregiver>,
}

#[derive(Serialize)]
pub struct PatientListResponse {
    pub links: Vec<CaredPatient>,
}

/// `POST /api/caregivers/invite`
pub async fn invite(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    ApiJson(body): ApiJson<InviteRequest>,
) -> Result<(StatusCode, Json<LinkResponse>), ApiError> {
    let link = {
        let conn = ctx.core.db()?;
        caregivers::invite(
            &conn,
            &caller.account,
            Invitation {
                email: body.email,
                relationship: body.relationship,
                name: body.name,
                permissions: body.permissions,
            },
        )?
    };
    Ok((StatusCode::CREATED, Json(LinkResponse { link })))
}

/// `GET /api/caregivers`: everyone the caller has invited.
pub async fn list(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
) -> Result<Json<CaregiverListResponse>, ApiError> {
    let conn = ctx.core.db()?;
    let links = caregivers::list_caregivers_of(&conn, &caller.account.id)?;
    Ok(Json(CaregiverListResponse { links }))
}

/// `GET /api/caregivers/patients`: patients the caller actively cares for.
pub async fn patients(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
) -> Result<Json<PatientListResponse>, ApiError> {
    let conn = ctx.core.db()?;
    let links = caregivers::list_patients_of(&conn, &caller.account)?;
    Ok(Json(PatientListResponse { links }))
}

/// `POST /api/caregivers/links/:id/accept`
pub async fn accept(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    Path(id): Path<String>,
) -> Result<Json<LinkResponse>, ApiError> {
    respond(&ctx, &caller, &id, true)
}

/// `POST /api/caregivers/links/:id/reject`
pub async fn reject(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    Path(id): Path<String>,
) -> Result<Json<LinkResponse>, ApiError> {
    respond(&ctx, &caller, &id, false)
}

fn respond(
    ctx: &ApiContext,
    caller: &AccountContext,
    id: &str,
    accept: bool,
) -> Result<Json<LinkResponse>, ApiError> {
    let link_id = parse_id(id)?;
    let conn = ctx.core.db()?;
    let link = caregivers::respond_to_invitation(&conn, &caller.account, &link_id, accept)?;
    Ok(Json(LinkResponse { link }))
}

/// `PUT /api/caregivers/links/:id/permissions`
pub async fn update_permissions(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<PermissionsRequest>,
) -> Result<Json<LinkResponse>, ApiError> {
    let link_id = parse_id(&id)?;
    let conn = ctx.core.db()?;
    let link =
        caregivers::update_permissions(&conn, &caller.account, &link_id, body.permissions)?;
    Ok(Json(LinkResponse { link }))
}
