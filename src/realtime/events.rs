//! Wire format for the caregiver socket.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.
//! Incoming event names go through `INGRESS_TABLE` once; everything past
//! `decode_client_event` only sees canonical `ClientEvent` values.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Location, MedicationStatus};

pub const SOS_MESSAGE: &str = "EMERGENCY! Patient needs help immediately.";

/// Room name for one patient's realtime feed: `patient:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey(String);

impl RoomKey {
    pub fn patient(patient_id: &Uuid) -> Self {
        Self(format!("patient:{patient_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ═══════════════════════════════════════════════════════════
// Server → client
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub connection_id: Uuid,
    pub account_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoined {
    pub room: String,
    pub patient_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosAlertPayload {
    pub patient_id: Uuid,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Set when the alert was persisted; socket-relayed alerts carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<Uuid>,
}

impl SosAlertPayload {
    pub fn new(patient_id: Uuid, location: Location, timestamp: DateTime<Utc>) -> Self {
        Self {
            patient_id,
            location,
            timestamp,
            message: SOS_MESSAGE.to_string(),
            alert_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicationUpdatePayload {
    pub patient_id: Uuid,
    pub medicine: String,
    pub status: MedicationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub server_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

/// Events the server pushes to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Welcome(Welcome),
    RoomJoined(RoomJoined),
    SosAlert(SosAlertPayload),
    PatientMedicationUpdate(MedicationUpdatePayload),
    Heartbeat(HeartbeatPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerEvent::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        })
    }

    /// Wire name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome(_) => "welcome",
            ServerEvent::RoomJoined(_) => "room_joined",
            ServerEvent::SosAlert(_) => "sos_alert",
            ServerEvent::PatientMedicationUpdate(_) => "patient_medication_update",
            ServerEvent::Heartbeat(_) => "heartbeat",
            ServerEvent::Error(_) => "error",
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Client → server
// ═══════════════════════════════════════════════════════════

/// Canonical client events. Aliases are already folded in.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    JoinPatientRoom {
        patient_id: Uuid,
    },
    TriggerSos {
        patient_id: Option<Uuid>,
        location: Location,
    },
    MedicationUpdate {
        patient_id: Option<Uuid>,
        medicine: String,
        status: MedicationStatus,
    },
    Pong,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EventError {
    #[error("Malformed frame: {0}")]
    Malformed(String),
    #[error("Unknown event: {0}")]
    UnknownEvent(String),
    #[error("Invalid payload for {event}: {reason}")]
    InvalidPayload { event: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum IngressKind {
    JoinPatientRoom,
    TriggerSos,
    /// `implied` overrides whatever status the payload carries.
    MedicationUpdate { implied: Option<MedicationStatus> },
    Pong,
}

/// Every accepted incoming event name and the canonical event it maps to.
const INGRESS_TABLE: &[(&str, IngressKind)] = &[
    ("join_patient_room", IngressKind::JoinPatientRoom),
    ("trigger_sos", IngressKind::TriggerSos),
    ("send_sos", IngressKind::TriggerSos),
    ("medication_update", IngressKind::MedicationUpdate { implied: None }),
    (
        "medication_taken",
        IngressKind::MedicationUpdate {
            implied: Some(MedicationStatus::Taken),
        },
    ),
    ("pong", IngressKind::Pong),
];

#[derive(Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoinData {
    Bare(Uuid),
    Object {
        #[serde(rename = "patientId")]
        patient_id: Uuid,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SosData {
    #[serde(default)]
    patient_id: Option<Uuid>,
    location: Location,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MedicationData {
    #[serde(default)]
    patient_id: Option<Uuid>,
    medicine: String,
    #[serde(default)]
    status: Option<MedicationStatus>,
}

fn payload<T: serde::de::DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, EventError> {
    serde_json::from_value(data).map_err(|e| EventError::InvalidPayload {
        event: event.to_string(),
        reason: e.to_string(),
    })
}

/// Parse one incoming text frame into a canonical event.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, EventError> {
    let frame: Frame =
        serde_json::from_str(text).map_err(|e| EventError::Malformed(e.to_string()))?;

    let kind = INGRESS_TABLE
        .iter()
        .find(|(name, _)| *name == frame.event)
        .map(|(_, kind)| *kind)
        .ok_or_else(|| EventError::UnknownEvent(frame.event.clone()))?;

    let event = frame.event.as_str();
    match kind {
        IngressKind::JoinPatientRoom => {
            let patient_id = match payload::<JoinData>(event, frame.data)? {
                JoinData::Bare(id) => id,
                JoinData::Object { patient_id } => patient_id,
            };
            Ok(ClientEvent::JoinPatientRoom { patient_id })
        }
        IngressKind::TriggerSos => {
            let data: SosData = payload(event, frame.data)?;
            data.location
                .validate()
                .map_err(|reason| EventError::InvalidPayload {
                    event: event.to_string(),
                    reason,
                })?;
            Ok(ClientEvent::TriggerSos {
                patient_id: data.patient_id,
                location: data.location,
            })
        }
        IngressKind::MedicationUpdate { implied } => {
            let data: MedicationData = payload(event, frame.data)?;
            let status = implied
                .or(data.status)
                .ok_or_else(|| EventError::InvalidPayload {
                    event: event.to_string(),
                    reason: "missing field `status`".into(),
                })?;
            let medicine = data.medicine.trim().to_string();
            if medicine.is_empty() {
                return Err(EventError::InvalidPayload {
                    event: event.to_string(),
                    reason: "medicine must not be empty".into(),
                });
            }
            Ok(ClientEvent::MedicationUpdate {
                patient_id: data.patient_id,
                medicine,
                status,
            })
        }
        IngressKind::Pong => Ok(ClientEvent::Pong),
    }
}
