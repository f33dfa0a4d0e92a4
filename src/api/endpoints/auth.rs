//! Account endpoints: register, login, logout, profile, and socket tickets.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::accounts::{self, AccountError, IssuedSession, PasswordDigest, Registration};
use crate::api::error::ApiError;
use crate::api::extract::ApiJson;
use crate::api::types::{AccountContext, ApiContext, WS_TICKET_TTL};
use crate::models::Account;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub account: Account,
    pub token: String,
}

impl From<IssuedSession> for SessionResponse {
    fn from(session: IssuedSession) -> Self {
        Self {
            account: session.account,
            token: session.token,
        }
    }
}

#[derive(Serialize)]
pub struct MeResponse {
    pub account: Account,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WsTicketResponse {
    pub ticket: String,
    pub expires_in: u64,
}

/// Run password work on the blocking pool. Callers must not hold the
/// database guard while awaiting it.
async fn run_password_work<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, AccountError> + Send + 'static,
    T: Send + 'static,
{
    let outcome = tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("password task: {e}")))?;
    Ok(outcome?)
}

/// `POST /api/auth/register`: create an account and open a session.
pub async fn register(
    State(ctx): State<ApiContext>,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let registration = Registration {
        name: body.name,
        email: body.email,
        phone: body.phone,
    };
    registration.validate()?;

    let iterations = ctx.core.password_iterations;
    let password = body.password;
    let digest =
        run_password_work(move || PasswordDigest::derive(&password, iterations)).await?;

    let session = {
        let conn = ctx.core.db()?;
        accounts::register(&conn, registration, &digest, ctx.core.session_ttl)?
    };
    Ok((StatusCode::CREATED, Json(session.into())))
}

/// `POST /api/auth/login`
pub async fn login(
    State(ctx): State<ApiContext>,
    ApiJson(body): ApiJson<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let credentials = {
        let conn = ctx.core.db()?;
        accounts::find_credentials(&conn, &body.email)?
    };

    let iterations = ctx.core.password_iterations;
    let password = body.password;
    let account = run_password_work(move || {
        accounts::verify_password(credentials, &password, iterations)
    })
    .await?;

    let session = {
        let conn = ctx.core.db()?;
        accounts::open_session(&conn, account, ctx.core.session_ttl)?
    };
    Ok(Json(session.into()))
}

/// `POST /api/auth/logout`: revoke the bearer token used for this call.
pub async fn logout(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
) -> Result<StatusCode, ApiError> {
    {
        let conn = ctx.core.db()?;
        accounts::logout(&conn, &caller.token)?;
    }
    tracing::info!(account_id = %caller.account.id, "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/auth/me`
pub async fn me(Extension(caller): Extension<AccountContext>) -> Json<MeResponse> {
    Json(MeResponse {
        account: caller.account,
    })
}

/// `POST /api/auth/ws-ticket`: one-time ticket for `/ws/caregivers`.
pub async fn ws_ticket(
    State(ctx): State<ApiContext>,
    Extension(caller): Extension<AccountContext>,
) -> Result<Json<WsTicketResponse>, ApiError> {
    let ticket = ctx
        .ws_tickets
        .lock()
        .map_err(|_| ApiError::Internal("ticket store lock".into()))?
        .issue(caller.account);
    Ok(Json(WsTicketResponse {
        ticket,
        expires_in: WS_TICKET_TTL.as_secs(),
    }))
}
