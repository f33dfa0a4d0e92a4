//! Realtime broadcast channel: rooms keyed by `patient:{id}` over
//! WebSocket connections.

pub mod events;
pub mod hub;

pub use events::{
    decode_client_event, ClientEvent, EventError, MedicationUpdatePayload, RoomKey,
    ServerEvent, SosAlertPayload, SOS_MESSAGE,
};
pub use hub::{Audience, Broadcast, BroadcastError, ConnectionId, Delivery, RoomHub};
