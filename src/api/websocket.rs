//! Caregiver socket: room joins, SOS relay and medication updates over
//! WebSocket.
//!
//! Handles the upgrade, heartbeat (30s), event routing, and per-connection
//! rate limiting (10 incoming frames/sec).
//!
//! Connection lifecycle:
//! 1. Client calls `POST /api/auth/ws-ticket` to get a one-time ticket
//! 2. Client opens `GET /ws/caregivers?ticket=xxx`, ticket validated, WS upgraded
//! 3. Server registers the connection with the room hub and sends `welcome`
//! 4. Client sends `join_patient_room` for each patient it follows
//! 5. Heartbeat every 30s, 3 missed pongs = disconnect

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::caregivers;
use crate::core_state::CoreState;
use crate::models::Account;
use crate::realtime::events::{HeartbeatPayload, RoomJoined, Welcome};
use crate::realtime::{decode_client_event, ClientEvent, ConnectionId, RoomKey, ServerEvent};

/// Heartbeat interval: server sends `heartbeat` every 30 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after this many missed heartbeats (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Maximum incoming frames per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

/// A socket write that takes longer than this closes the connection.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters for WebSocket upgrade.
#[derive(Deserialize)]
pub struct WsAuthQuery {
    #[serde(default)]
    ticket: String,
}

// ═══════════════════════════════════════════════════════════
// WsSessionState: heartbeat and rate state, testable offline
// ═══════════════════════════════════════════════════════════

/// Action returned by `WsSessionState::on_heartbeat_tick()`.
#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    SendHeartbeat,
    /// Too many missed heartbeats, disconnect.
    HeartbeatTimeout,
}

pub(crate) struct WsSessionState {
    missed_heartbeats: u32,
    incoming_times: VecDeque<Instant>,
}

impl WsSessionState {
    fn new() -> Self {
        Self {
            missed_heartbeats: 0,
            incoming_times: VecDeque::new(),
        }
    }

    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }

    /// Returns true if the frame is within the rate limit.
    fn check_rate(&mut self) -> bool {
        check_incoming_rate(&mut self.incoming_times)
    }
}

/// Check if an incoming frame is within the rate limit (10/sec).
fn check_incoming_rate(timestamps: &mut VecDeque<Instant>) -> bool {
    let now = Instant::now();
    let one_sec_ago = now - Duration::from_secs(1);

    while let Some(&front) = timestamps.front() {
        if front < one_sec_ago {
            timestamps.pop_front();
        } else {
            break;
        }
    }

    if timestamps.len() as u32 >= MAX_INCOMING_PER_SECOND {
        return false;
    }

    timestamps.push_back(now);
    true
}

// ═══════════════════════════════════════════════════════════
// Upgrade + connection loop
// ═══════════════════════════════════════════════════════════

/// WebSocket upgrade handler.
///
/// Validates the one-time ticket before upgrading the connection.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<ApiContext>,
    Query(query): Query<WsAuthQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let account = {
        let mut tickets = ctx
            .ws_tickets
            .lock()
            .map_err(|_| ApiError::Internal("ticket lock".into()))?;
        tickets
            .consume(&query.ticket)
            .ok_or(ApiError::Unauthorized)?
    };

    tracing::info!(account_id = %account.id, "WebSocket upgrade accepted");
    let core = ctx.core.clone();
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, core, account)))
}

async fn handle_ws(socket: WebSocket, core: Arc<CoreState>, account: Account) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<ServerEvent>(core.ws_queue_capacity.max(1));

    let connection_id = match core.hub().register(account.id, &account.email, tx.clone()) {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(account_id = %account.id, error = %e, "Cannot register socket");
            return;
        }
    };

    let sender_handle = tokio::spawn(write_frames(ws_sink, rx, connection_id));

    let _ = tx
        .send(ServerEvent::Welcome(Welcome {
            connection_id,
            account_id: account.id,
        }))
        .await;

    let mut session = WsSessionState::new();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // Consume initial immediate tick

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if !session.check_rate() {
                            tracing::debug!(connection_id = %connection_id, "Incoming frame over rate, dropped");
                            continue;
                        }
                        let reply = match decode_client_event(&text) {
                            Ok(ClientEvent::Pong) => {
                                session.on_pong();
                                None
                            }
                            Ok(event) => apply_event(&core, &account, &connection_id, event)
                                .unwrap_or_else(|err| Some(error_event(err))),
                            Err(e) => Some(ServerEvent::error("BAD_REQUEST", e.to_string())),
                        };
                        if let Some(event) = reply {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ping/Pong handled by axum/tungstenite
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::HeartbeatTimeout => {
                        tracing::info!(
                            connection_id = %connection_id,
                            "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                        );
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let _ = tx.send(ServerEvent::Heartbeat(HeartbeatPayload {
                            server_time: chrono::Utc::now(),
                        })).await;
                    }
                }
            }
        }
    }

    // The hub holds a sender clone; both must go before the writer stops.
    let rooms = core.hub().disconnect(&connection_id).unwrap_or(0);
    drop(tx);
    let _ = sender_handle.await;

    tracing::info!(connection_id = %connection_id, rooms, "WebSocket disconnected");
}

/// Drain the connection queue into the socket.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<ServerEvent>,
    connection_id: ConnectionId,
) {
    while let Some(event) = rx.recv().await {
        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, event = event.name(), "Cannot encode event");
                continue;
            }
        };
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(json))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                tracing::warn!(connection_id = %connection_id, "Socket write timed out");
                break;
            }
        }
    }
    let _ = sink.close().await;
}

// ═══════════════════════════════════════════════════════════
// Event routing
// ═══════════════════════════════════════════════════════════

/// Run one client event. Returns the direct reply, if any.
///
/// Holds the database lock only inside this synchronous call.
fn apply_event(
    core: &CoreState,
    account: &Account,
    connection_id: &ConnectionId,
    event: ClientEvent,
) -> Result<Option<ServerEvent>, ApiError> {
    match event {
        ClientEvent::JoinPatientRoom { patient_id } => {
            let allowed = {
                let conn = core.db()?;
                caregivers::may_join_room(&conn, account, &patient_id)?
            };
            if !allowed {
                tracing::warn!(account_id = %account.id, patient_id = %patient_id, "Room join refused");
                return Err(ApiError::Forbidden(
                    "Not an active caregiver of this patient".into(),
                ));
            }
            let room = RoomKey::patient(&patient_id);
            core.hub()
                .join(connection_id, &room)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            Ok(Some(ServerEvent::RoomJoined(RoomJoined {
                room: room.to_string(),
                patient_id,
            })))
        }
        ClientEvent::TriggerSos {
            patient_id,
            location,
        } => {
            let patient_id = own_patient(account, patient_id)?;
            let conn = core.db()?;
            core.dispatcher().relay_sos(&conn, patient_id, location)?;
            Ok(None)
        }
        ClientEvent::MedicationUpdate {
            patient_id,
            medicine,
            status,
        } => {
            let patient_id = own_patient(account, patient_id)?;
            let conn = core.db()?;
            core.dispatcher()
                .publish_medication_event(&conn, patient_id, &medicine, status)?;
            Ok(None)
        }
        ClientEvent::Pong => Ok(None),
    }
}

/// Socket-originated patient events may only speak for the caller.
fn own_patient(account: &Account, claimed: Option<Uuid>) -> Result<Uuid, ApiError> {
    match claimed {
        None => Ok(account.id),
        Some(id) if id == account.id => Ok(id),
        Some(_) => Err(ApiError::Forbidden(
            "Events may only be sent for your own account".into(),
        )),
    }
}

fn error_event(err: ApiError) -> ServerEvent {
    let message = match &err {
        ApiError::Internal(detail) => {
            tracing::error!(detail, "Socket event failed");
            "An internal error occurred".to_string()
        }
        ApiError::Forbidden(detail) | ApiError::BadRequest(detail) | ApiError::NotFound(detail) => {
            detail.clone()
        }
        other => other.to_string(),
    };
    ServerEvent::error(err.code(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incoming_rate_allows_under_limit() {
        let mut timestamps = VecDeque::new();
        for _ in 0..MAX_INCOMING_PER_SECOND {
            assert!(check_incoming_rate(&mut timestamps));
        }
    }

    #[test]
    fn incoming_rate_blocks_over_limit() {
        let mut timestamps = VecDeque::new();
        for _ in 0..MAX_INCOMING_PER_SECOND {
            check_incoming_rate(&mut timestamps);
        }
        assert!(!check_incoming_rate(&mut timestamps));
    }

    #[test]
    fn incoming_rate_resets_after_window() {
        let mut timestamps = VecDeque::new();
        let old = Instant::now() - Duration::from_secs(2);
        for _ in 0..MAX_INCOMING_PER_SECOND {
            timestamps.push_back(old);
        }
        assert!(check_incoming_rate(&mut timestamps));
        assert_eq!(timestamps.len(), 1);
    }

    #[test]
    fn session_state_sends_heartbeat_on_first_tick() {
        let mut session = WsSessionState::new();
        assert_eq!(session.on_heartbeat_tick(), HeartbeatAction::SendHeartbeat);
    }

    #[test]
    fn session_state_times_out_after_missed_heartbeats() {
        let mut session = WsSessionState::new();
        for _ in 0..MAX_MISSED_HEARTBEATS {
            assert_eq!(session.on_heartbeat_tick(), HeartbeatAction::SendHeartbeat);
        }
        assert_eq!(session.on_heartbeat_tick(), HeartbeatAction::HeartbeatTimeout);
    }

    #[test]
    fn session_state_pong_resets_missed_counter() {
        let mut session = WsSessionState::new();
        session.on_heartbeat_tick();
        session.on_heartbeat_tick();
        session.on_pong();
        assert_eq!(session.missed_heartbeats, 0);
        for _ in 0..MAX_MISSED_HEARTBEATS {
            assert_eq!(session.on_heartbeat_tick(), HeartbeatAction::SendHeartbeat);
        }
    }

    #[test]
    fn session_state_check_rate_delegates_to_rate_limiter() {
        let mut session = WsSessionState::new();
        for _ in 0..10 {
            assert!(session.check_rate());
        }
        assert!(!session.check_rate());
    }

    #[test]
    fn own_patient_defaults_to_caller() {
        let account = crate::db::repository::fixtures::account(
            &crate::db::open_memory_database().unwrap(),
            "Pat",
            "pat@x.com",
        );
        assert_eq!(own_patient(&account, None).unwrap(), account.id);
        assert_eq!(own_patient(&account, Some(account.id)).unwrap(), account.id);
        assert!(matches!(
            own_patient(&account, Some(Uuid::new_v4())),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn internal_errors_are_not_leaked_to_sockets() {
        let event = error_event(ApiError::Internal("disk on fire".into()));
        let ServerEvent::Error(payload) = event else {
            panic!("expected error event");
        };
        assert_eq!(payload.code, "INTERNAL");
        assert!(!payload.message.contains("disk"));
    }

    // ═══════════════════════════════════════════════════════════
    // Integration tests: live socket connections
    // ═══════════════════════════════════════════════════════════

    use crate::api::router::api_router_with_ctx;
    use crate::caregivers::{invite, respond_to_invitation, Invitation};
    use crate::db::repository::fixtures;
    use crate::models::{Location, Permissions};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite;

    type Client =
        tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

    struct Harness {
        ctx: ApiContext,
        base: String,
        server: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        async fn start() -> Self {
            let core = Arc::new(CoreState::in_memory().unwrap());
            let ctx = ApiContext::new(core);
            let app = api_router_with_ctx(ctx.clone());

            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                ctx,
                base: format!("ws://{addr}/ws/caregivers"),
                server,
            }
        }

        fn core(&self) -> &CoreState {
            &self.ctx.core
        }

        fn account(&self, name: &str, email: &str) -> Account {
            let conn = self.core().db().unwrap();
            fixtures::account(&conn, name, email)
        }

        /// Active link from `patient` to `caregiver` with the given permissions.
        fn link(&self, patient: &Account, caregiver: &Account, permissions: Permissions) {
            let conn = self.core().db().unwrap();
            let link = invite(
                &conn,
                patient,
                Invitation {
                    email: caregiver.email.clone(),
                    permissions: Some(permissions),
                    ..Default::default()
                },
            )
            .unwrap();
            respond_to_invitation(&conn, caregiver, &link.id, true).unwrap();
        }

        fn ticket(&self, account: &Account) -> String {
            self.ctx.ws_tickets.lock().unwrap().issue(account.clone())
        }

        /// Connect and consume the `welcome` frame.
        async fn connect(&self, account: &Account) -> Client {
            let url = format!("{}?ticket={}", self.base, self.ticket(account));
            let (mut ws, _) = tokio_tungstenite::connect_async(&url)
                .await
                .expect("WS connect failed");
            let welcome = next_event(&mut ws).await;
            assert_eq!(welcome["event"], "welcome");
            assert_eq!(welcome["data"]["accountId"], account.id.to_string());
            ws
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.server.abort();
        }
    }

    async fn send(ws: &mut Client, frame: Value) {
        ws.send(tungstenite::Message::Text(frame.to_string()))
            .await
            .expect("send failed");
    }

    async fn next_event(ws: &mut Client) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timeout waiting for event")
                .expect("stream ended")
                .expect("WS error");
            if let tungstenite::Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn assert_silent(ws: &mut Client) {
        let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
        assert!(result.is_err(), "unexpected frame: {result:?}");
    }

    async fn join(ws: &mut Client, patient: &Account) -> Value {
        send(ws, json!({"event": "join_patient_room", "data": patient.id})).await;
        next_event(ws).await
    }

    #[tokio::test]
    async fn ws_invalid_ticket_rejects_upgrade() {
        let harness = Harness::start().await;
        let url = format!("{}?ticket=invalid", harness.base);
        assert!(tokio_tungstenite::connect_async(&url).await.is_err());
        let url = harness.base.clone();
        assert!(tokio_tungstenite::connect_async(&url).await.is_err());
    }

    #[tokio::test]
    async fn ws_ticket_consumed_after_use() {
        let harness = Harness::start().await;
        let account = harness.account("Pat", "pat@x.com");
        let ticket = harness.ticket(&account);
        let url = format!("{}?ticket={ticket}", harness.base);

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let _ = next_event(&mut ws).await;
        assert!(tokio_tungstenite::connect_async(&url).await.is_err());
    }

    #[tokio::test]
    async fn ws_join_requires_active_link() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let caregiver = harness.account("Care", "care@x.com");
        let stranger = harness.account("Stranger", "stranger@x.com");
        harness.link(&patient, &caregiver, Permissions::default());

        let mut ws = harness.connect(&caregiver).await;
        let reply = join(&mut ws, &patient).await;
        assert_eq!(reply["event"], "room_joined");
        assert_eq!(reply["data"]["room"], format!("patient:{}", patient.id));

        // Join is idempotent.
        let reply = join(&mut ws, &patient).await;
        assert_eq!(reply["event"], "room_joined");
        assert_eq!(harness.core().hub().member_count(&RoomKey::patient(&patient.id)), 1);

        let mut other = harness.connect(&stranger).await;
        let reply = join(&mut other, &patient).await;
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn ws_rest_sos_reaches_only_entitled_members() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let entitled = harness.account("Care", "care@x.com");
        let muted = harness.account("Muted", "muted@x.com");
        harness.link(&patient, &entitled, Permissions::default());
        harness.link(
            &patient,
            &muted,
            Permissions {
                receive_sos: false,
                ..Default::default()
            },
        );

        let mut entitled_ws = harness.connect(&entitled).await;
        let mut muted_ws = harness.connect(&muted).await;
        // Entitled but never joined the room.
        let mut absent_ws = harness.connect(&entitled).await;
        join(&mut entitled_ws, &patient).await;
        assert_eq!(join(&mut muted_ws, &patient).await["event"], "room_joined");

        let alert = {
            let conn = harness.core().db().unwrap();
            harness
                .core()
                .dispatcher()
                .trigger_sos(&conn, patient.id, Location::new(28.6, 77.2))
                .unwrap()
        };
        assert_eq!(alert.notified_contacts, vec!["care@x.com".to_string()]);

        let event = next_event(&mut entitled_ws).await;
        assert_eq!(event["event"], "sos_alert");
        assert_eq!(event["data"]["patientId"], patient.id.to_string());
        assert_eq!(event["data"]["alertId"], alert.id.to_string());
        assert_eq!(event["data"]["message"], crate::realtime::SOS_MESSAGE);
        assert_eq!(event["data"]["location"]["latitude"], 28.6);

        assert_silent(&mut muted_ws).await;
        assert_silent(&mut absent_ws).await;
    }

    #[tokio::test]
    async fn ws_sos_aliases_are_equivalent() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let caregiver = harness.account("Care", "care@x.com");
        harness.link(&patient, &caregiver, Permissions::default());

        let mut care_ws = harness.connect(&caregiver).await;
        join(&mut care_ws, &patient).await;
        let mut patient_ws = harness.connect(&patient).await;

        let mut received = Vec::new();
        for name in ["trigger_sos", "send_sos"] {
            send(
                &mut patient_ws,
                json!({"event": name, "data": {"patientId": patient.id, "location": {"lat": 1.5, "lng": 2.5}}}),
            )
            .await;
            let mut event = next_event(&mut care_ws).await;
            assert_eq!(event["event"], "sos_alert");
            assert!(event["data"].get("alertId").is_none());
            event["data"].as_object_mut().unwrap().remove("timestamp");
            received.push(event);
        }
        assert_eq!(received[0], received[1]);

        // Socket SOS is relayed, not recorded.
        let conn = harness.core().db().unwrap();
        let alerts = harness.core().dispatcher().list_alerts(&conn, &patient.id).unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn ws_events_for_another_patient_are_forbidden() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let caregiver = harness.account("Care", "care@x.com");
        harness.link(&patient, &caregiver, Permissions::default());

        let mut care_ws = harness.connect(&caregiver).await;
        join(&mut care_ws, &patient).await;
        send(
            &mut care_ws,
            json!({"event": "trigger_sos", "data": {"patientId": patient.id, "location": {"lat": 1.0, "lng": 1.0}}}),
        )
        .await;
        let reply = next_event(&mut care_ws).await;
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn ws_medication_updates_follow_view_permission() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let viewer = harness.account("Viewer", "viewer@x.com");
        let blind = harness.account("Blind", "blind@x.com");
        harness.link(&patient, &viewer, Permissions::default());
        harness.link(
            &patient,
            &blind,
            Permissions {
                view_medicines: false,
                ..Default::default()
            },
        );

        let mut viewer_ws = harness.connect(&viewer).await;
        let mut blind_ws = harness.connect(&blind).await;
        join(&mut viewer_ws, &patient).await;
        join(&mut blind_ws, &patient).await;

        let mut patient_ws = harness.connect(&patient).await;
        send(
            &mut patient_ws,
            json!({"event": "medication_taken", "data": {"medicine": "Metformin"}}),
        )
        .await;

        let event = next_event(&mut viewer_ws).await;
        assert_eq!(event["event"], "patient_medication_update");
        assert_eq!(event["data"]["medicine"], "Metformin");
        assert_eq!(event["data"]["status"], "taken");
        assert_silent(&mut blind_ws).await;
    }

    #[tokio::test]
    async fn ws_malformed_json_keeps_connection() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let mut ws = harness.connect(&patient).await;

        ws.send(tungstenite::Message::Text("{not json".into()))
            .await
            .unwrap();
        let reply = next_event(&mut ws).await;
        assert_eq!(reply["event"], "error");
        assert_eq!(reply["data"]["code"], "BAD_REQUEST");

        send(&mut ws, json!({"event": "dance", "data": {}})).await;
        assert_eq!(next_event(&mut ws).await["data"]["code"], "BAD_REQUEST");

        // Still usable.
        assert_eq!(join(&mut ws, &patient).await["event"], "room_joined");
    }

    #[tokio::test]
    async fn ws_rate_limit_drops_excess_not_disconnect() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let mut ws = harness.connect(&patient).await;

        for _ in 0..15 {
            send(&mut ws, json!({"event": "join_patient_room", "data": patient.id})).await;
        }
        let mut replies = 0;
        while tokio::time::timeout(Duration::from_millis(300), ws.next())
            .await
            .is_ok_and(|m| m.is_some_and(|m| m.is_ok()))
        {
            replies += 1;
        }
        assert!((1..=10).contains(&replies), "got {replies} replies");

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(join(&mut ws, &patient).await["event"], "room_joined");
    }

    #[tokio::test]
    async fn ws_disconnect_discards_memberships() {
        let harness = Harness::start().await;
        let patient = harness.account("Pat", "pat@x.com");
        let mut ws = harness.connect(&patient).await;
        join(&mut ws, &patient).await;
        let room = RoomKey::patient(&patient.id);
        assert_eq!(harness.core().hub().member_count(&room), 1);

        ws.close(None).await.unwrap();
        for _ in 0..50 {
            if harness.core().hub().connection_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(harness.core().hub().connection_count(), 0);
        assert_eq!(harness.core().hub().member_count(&room), 0);
    }
}
