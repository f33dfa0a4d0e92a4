//! HTTP router for the caregiver service.
//!
//! Returns a composable `Router`. REST routes are nested under `/api/`,
//! the socket upgrade lives at `/ws/caregivers`.
//!
//! Middleware stack (outermost → innermost):
//! 1. CORS → 2. Rate limiter → 3. Auth validator → 4. Audit logger

use std::sync::Arc;

use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::api::websocket;
use crate::core_state::CoreState;

/// Build the service router.
///
/// Middleware uses `Extension<ApiContext>` (injected as the outermost layer
/// of each group). Handlers use `State<ApiContext>` via `with_state`.
pub fn api_router(core: Arc<CoreState>, cors_origins: &[String]) -> Router {
    build_router(ApiContext::new(core), cors_origins)
}

/// Build from a pre-constructed `ApiContext`, so tests can reach the
/// ticket store directly.
#[cfg(test)]
pub(crate) fn api_router_with_ctx(ctx: ApiContext) -> Router {
    build_router(ctx, &[])
}

fn build_router(ctx: ApiContext, cors_origins: &[String]) -> Router {
    // NOTE: Path params use `:param` syntax (matchit 0.7 / axum 0.7).
    let protected = Router::new()
        .route("/auth/logout", post(endpoints::auth::logout))
        .route("/auth/me", get(endpoints::auth::me))
        .route("/auth/ws-ticket", post(endpoints::auth::ws_ticket))
        .route("/caregivers", get(endpoints::caregivers::list))
        .route("/caregivers/invite", post(endpoints::caregivers::invite))
        .route("/caregivers/patients", get(endpoints::caregivers::patients))
        .route(
            "/caregivers/links/:id/accept",
            post(endpoints::caregivers::accept),
        )
        .route(
            "/caregivers/links/:id/reject",
            post(endpoints::caregivers::reject),
        )
        .route(
            "/caregivers/links/:id/permissions",
            put(endpoints::caregivers::update_permissions),
        )
        .route(
            "/caregivers/sos",
            post(endpoints::sos::trigger).get(endpoints::sos::list),
        )
        .route("/caregivers/sos/:id/resolve", post(endpoints::sos::resolve))
        .route(
            "/caregivers/medication-events",
            post(endpoints::sos::medication_event),
        )
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Unprotected routes (rate-limited only)
    let public = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/auth/register", post(endpoints::auth::register))
        .route("/auth/login", post(endpoints::auth::login))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx.clone()));

    // Socket upgrade (ticket auth, rate-limited)
    let ws_routes = Router::new()
        .route("/ws/caregivers", get(websocket::ws_upgrade))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::Extension(ctx));

    Router::new()
        .nest("/api", protected)
        .nest("/api", public)
        .merge(ws_routes)
        .layer(SetResponseHeaderLayer::if_not_present(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(cors_layer(cors_origins))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_app() -> Router {
        api_router(Arc::new(CoreState::in_memory().unwrap()), &[])
    }

    fn make_request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        match body {
            Some(json) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(response: Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Register an account and return its bearer token.
    async fn register(app: &Router, name: &str, email: &str) -> String {
        let (status, json) = send(
            app,
            make_request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"name": name, "email": email, "password": "correct horse"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        json["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app();
        let response = app
            .oneshot(make_request("GET", "/api/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-Content-Type-Options").unwrap(),
            "nosniff"
        );
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], crate::config::APP_VERSION);
    }

    #[tokio::test]
    async fn register_login_and_me() {
        let app = test_app();
        let token = register(&app, "Asha", "asha@x.com").await;

        let (status, json) = send(&app, make_request("GET", "/api/auth/me", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["account"]["email"], "asha@x.com");
        assert!(json["account"].get("passwordHash").is_none());

        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": "ASHA@x.com", "password": "correct horse"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(json["token"].as_str().unwrap(), token);
    }

    #[tokio::test]
    async fn wrong_password_returns_401() {
        let app = test_app();
        register(&app, "Asha", "asha@x.com").await;
        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({"email": "asha@x.com", "password": "wrong password"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["error"]["code"], "AUTH_REQUIRED");
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let app = test_app();
        register(&app, "Asha", "asha@x.com").await;
        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"name": "Other", "email": "asha@x.com", "password": "another pass"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "EMAIL_TAKEN");
    }

    #[tokio::test]
    async fn protected_routes_require_auth() {
        let app = test_app();
        for (method, uri) in [
            ("GET", "/api/auth/me"),
            ("GET", "/api/caregivers"),
            ("POST", "/api/caregivers/sos"),
            ("POST", "/api/auth/ws-ticket"),
        ] {
            let response = app
                .clone()
                .oneshot(make_request(method, uri, None, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }

        let response = app
            .oneshot(make_request("GET", "/api/auth/me", Some("invalid-token"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn authenticated_responses_are_not_cached() {
        let app = test_app();
        let token = register(&app, "Asha", "asha@x.com").await;
        let response = app
            .oneshot(make_request("GET", "/api/auth/me", Some(&token), None))
            .await
            .unwrap();
        assert_eq!(response.headers().get("Cache-Control").unwrap(), "no-store");
    }

    #[tokio::test]
    async fn logout_revokes_token() {
        let app = test_app();
        let token = register(&app, "Asha", "asha@x.com").await;

        let (status, _) = send(&app, make_request("POST", "/api/auth/logout", Some(&token), None)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, make_request("GET", "/api/auth/me", Some(&token), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn self_and_duplicate_invites_are_400() {
        let app = test_app();
        let token = register(&app, "Pat", "pat@x.com").await;

        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/invite",
                Some(&token),
                Some(json!({"email": "PAT@x.com"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "SELF_INVITE");

        let invite = json!({"email": "care@x.com", "relationship": "Daughter"});
        let (status, json) = send(
            &app,
            make_request("POST", "/api/caregivers/invite", Some(&token), Some(invite.clone())),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["link"]["status"], "pending");
        assert_eq!(json["link"]["relationship"], "Daughter");

        let (status, json) = send(
            &app,
            make_request("POST", "/api/caregivers/invite", Some(&token), Some(invite)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "ALREADY_INVITED");
    }

    #[tokio::test]
    async fn sos_flow_records_entitled_caregivers() {
        let app = test_app();
        let patient = register(&app, "Pat", "pat@x.com").await;

        let (_, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/invite",
                Some(&patient),
                Some(json!({"email": "care@x.com"})),
            ),
        )
        .await;
        let link_id = json["link"]["id"].as_str().unwrap().to_string();

        // Registering afterwards attaches the pending invitation.
        let caregiver = register(&app, "Care", "care@x.com").await;
        let (status, json) = send(
            &app,
            make_request(
                "POST",
                &format!("/api/caregivers/links/{link_id}/accept"),
                Some(&caregiver),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["link"]["status"], "active");

        let (status, json) = send(
            &app,
            make_request("GET", "/api/caregivers/patients", Some(&caregiver), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["links"][0]["patient"]["email"], "pat@x.com");

        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/sos",
                Some(&patient),
                Some(json!({"location": {"lat": 28.61, "lng": 77.2}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{json}");
        assert_eq!(json["alert"]["status"], "active");
        assert_eq!(json["alert"]["notifiedContacts"], json!(["care@x.com"]));
        let alert_id = json["alert"]["id"].as_str().unwrap().to_string();

        let (status, json) = send(&app, make_request("GET", "/api/caregivers/sos", Some(&patient), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["alerts"].as_array().unwrap().len(), 1);

        let resolve_uri = format!("/api/caregivers/sos/{alert_id}/resolve");
        let (status, json) = send(
            &app,
            make_request("POST", &resolve_uri, Some(&patient), Some(json!({"status": "resolved"}))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["alert"]["status"], "resolved");
        assert!(json["alert"]["resolvedAt"].is_string());

        let (status, _) = send(
            &app,
            make_request("POST", &resolve_uri, Some(&patient), Some(json!({"status": "false_alarm"}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn revoked_sos_permission_excludes_caregiver() {
        let app = test_app();
        let patient = register(&app, "Pat", "pat@x.com").await;
        let caregiver = register(&app, "Care", "care@x.com").await;

        let (_, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/invite",
                Some(&patient),
                Some(json!({"email": "care@x.com"})),
            ),
        )
        .await;
        let link_id = json["link"]["id"].as_str().unwrap().to_string();
        send(
            &app,
            make_request(
                "POST",
                &format!("/api/caregivers/links/{link_id}/accept"),
                Some(&caregiver),
                None,
            ),
        )
        .await;

        let (status, json) = send(
            &app,
            make_request(
                "PUT",
                &format!("/api/caregivers/links/{link_id}/permissions"),
                Some(&patient),
                Some(json!({"permissions": {"receiveSOS": false}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["link"]["permissions"]["receiveSOS"], false);
        assert_eq!(json["link"]["permissions"]["viewMedicines"], true);

        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/sos",
                Some(&patient),
                Some(json!({"location": {"latitude": 1.0, "longitude": 2.0}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["alert"]["notifiedContacts"], json!([]));
    }

    #[tokio::test]
    async fn rejecting_someone_elses_invitation_is_404() {
        let app = test_app();
        let patient = register(&app, "Pat", "pat@x.com").await;
        let stranger = register(&app, "Stranger", "stranger@x.com").await;
        let (_, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/invite",
                Some(&patient),
                Some(json!({"email": "care@x.com"})),
            ),
        )
        .await;
        let link_id = json["link"]["id"].as_str().unwrap().to_string();

        let (status, json) = send(
            &app,
            make_request(
                "POST",
                &format!("/api/caregivers/links/{link_id}/reject"),
                Some(&stranger),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_request() {
        let app = test_app();
        let token = register(&app, "Pat", "pat@x.com").await;

        let req = Request::builder()
            .method("POST")
            .uri("/api/caregivers/sos")
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(&app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");

        let (status, json) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/sos",
                Some(&token),
                Some(json!({"location": {"lat": 123.0, "lng": 0.0}})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "BAD_REQUEST");

        let (status, _) = send(
            &app,
            make_request("POST", "/api/caregivers/links/not-a-uuid/accept", Some(&token), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn medication_events_validate_status() {
        let app = test_app();
        let token = register(&app, "Pat", "pat@x.com").await;

        let (status, _) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/medication-events",
                Some(&token),
                Some(json!({"medicine": "Metformin", "status": "taken"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, _) = send(
            &app,
            make_request(
                "POST",
                "/api/caregivers/medication-events",
                Some(&token),
                Some(json!({"medicine": "Metformin", "status": "eaten"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ws_ticket_returns_ticket_with_auth() {
        let app = test_app();
        let token = register(&app, "Pat", "pat@x.com").await;
        let (status, json) = send(&app, make_request("POST", "/api/auth/ws-ticket", Some(&token), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!json["ticket"].as_str().unwrap().is_empty());
        assert_eq!(json["expiresIn"], 30);
    }

    #[tokio::test]
    async fn cors_allows_configured_origin_only() {
        let app = api_router(
            Arc::new(CoreState::in_memory().unwrap()),
            &["http://localhost:3000".to_string()],
        );

        let preflight = |origin: &str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/api/caregivers/sos")
                .header("Origin", origin)
                .header("Access-Control-Request-Method", "POST")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(preflight("http://localhost:3000")).await.unwrap();
        assert_eq!(
            response.headers().get("Access-Control-Allow-Origin").unwrap(),
            "http://localhost:3000"
        );

        let response = app.oneshot(preflight("http://evil.example")).await.unwrap();
        assert!(response.headers().get("Access-Control-Allow-Origin").is_none());
    }

    #[tokio::test]
    async fn not_found_for_unknown_route() {
        let app = test_app();
        let response = app
            .oneshot(make_request("GET", "/api/nonexistent", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
