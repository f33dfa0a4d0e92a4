//! In-process room table.
//!
//! Each socket registers one bounded `mpsc` queue. Publishing snapshots the
//! room's members under the lock, then `try_send`s outside it, so a slow or
//! dead socket never stalls the publisher.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::{RoomKey, ServerEvent};

pub type ConnectionId = Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
}

/// Which room members an event may reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every member of the room.
    Room,
    /// Only members whose account id or email is listed.
    Restricted {
        accounts: HashSet<Uuid>,
        emails: HashSet<String>,
    },
}

impl Audience {
    pub fn restricted(
        accounts: impl IntoIterator<Item = Uuid>,
        emails: impl IntoIterator<Item = String>,
    ) -> Self {
        Audience::Restricted {
            accounts: accounts.into_iter().collect(),
            emails: emails.into_iter().collect(),
        }
    }

    pub fn admits(&self, account_id: &Uuid, email: &str) -> bool {
        match self {
            Audience::Room => true,
            Audience::Restricted { accounts, emails } => {
                accounts.contains(account_id) || emails.contains(email)
            }
        }
    }
}

/// Outcome of one publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    /// Members whose queue was full or closed.
    pub dropped: usize,
}

/// Room-addressed fan-out. `RoomHub` is the production implementation;
/// tests substitute their own.
pub trait Broadcast: Send + Sync {
    fn publish(
        &self,
        room: &RoomKey,
        event: ServerEvent,
        audience: &Audience,
    ) -> Result<Delivery, BroadcastError>;
}

struct Member {
    account_id: Uuid,
    email: String,
    sender: mpsc::Sender<ServerEvent>,
    rooms: HashSet<RoomKey>,
}

#[derive(Default)]
struct HubState {
    members: HashMap<ConnectionId, Member>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

#[derive(Default)]
pub struct RoomHub {
    state: Mutex<HubState>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new socket. It starts in no rooms.
    pub fn register(
        &self,
        account_id: Uuid,
        email: &str,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnectionId, BroadcastError> {
        let id = Uuid::new_v4();
        let mut state = self.state.lock().map_err(|_| BroadcastError::LockPoisoned)?;
        state.members.insert(
            id,
            Member {
                account_id,
                email: email.to_string(),
                sender,
                rooms: HashSet::new(),
            },
        );
        Ok(id)
    }

    /// Add the connection to `room`. Returns false if it was already there.
    pub fn join(&self, connection: &ConnectionId, room: &RoomKey) -> Result<bool, BroadcastError> {
        let mut state = self.state.lock().map_err(|_| BroadcastError::LockPoisoned)?;
        let member = state
            .members
            .get_mut(connection)
            .ok_or(BroadcastError::UnknownConnection(*connection))?;
        if !member.rooms.insert(room.clone()) {
            return Ok(false);
        }
        state
            .rooms
            .entry(room.clone())
            .or_default()
            .insert(*connection);
        Ok(true)
    }

    /// Forget the connection and all of its memberships. Returns how many
    /// rooms it was in.
    pub fn disconnect(&self, connection: &ConnectionId) -> Result<usize, BroadcastError> {
        let mut state = self.state.lock().map_err(|_| BroadcastError::LockPoisoned)?;
        let Some(member) = state.members.remove(connection) else {
            return Ok(0);
        };
        for room in &member.rooms {
            if let Some(set) = state.rooms.get_mut(room) {
                set.remove(connection);
                if set.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
        Ok(member.rooms.len())
    }

    pub fn member_count(&self, room: &RoomKey) -> usize {
        self.state
            .lock()
            .map(|s| s.rooms.get(room).map_or(0, HashSet::len))
            .unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().map(|s| s.members.len()).unwrap_or(0)
    }

    pub fn is_member(&self, connection: &ConnectionId, room: &RoomKey) -> bool {
        self.state
            .lock()
            .map(|s| {
                s.members
                    .get(connection)
                    .is_some_and(|m| m.rooms.contains(room))
            })
            .unwrap_or(false)
    }

    /// Snapshot the senders in `room` that `audience` admits.
    fn recipients(
        &self,
        room: &RoomKey,
        audience: &Audience,
    ) -> Result<Vec<(ConnectionId, mpsc::Sender<ServerEvent>)>, BroadcastError> {
        let state = self.state.lock().map_err(|_| BroadcastError::LockPoisoned)?;
        let Some(ids) = state.rooms.get(room) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| {
                let member = state.members.get(id)?;
                audience
                    .admits(&member.account_id, &member.email)
                    .then(|| (*id, member.sender.clone()))
            })
            .collect())
    }
}

impl Broadcast for RoomHub {
    fn publish(
        &self,
        room: &RoomKey,
        event: ServerEvent,
        audience: &Audience,
    ) -> Result<Delivery, BroadcastError> {
        let recipients = self.recipients(room, audience)?;
        let mut delivery = Delivery::default();

        for (connection_id, tx) in recipients {
            match tx.try_send(event.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    delivery.dropped += 1;
                    tracing::warn!(
                        connection_id = %connection_id,
                        room = %room,
                        event = event.name(),
                        "Connection queue full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    delivery.dropped += 1;
                    tracing::debug!(connection_id = %connection_id, "Connection closed before delivery");
                }
            }
        }

        tracing::debug!(
            room = %room,
            event = event.name(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Room publish"
        );
        Ok(delivery)
    }
}
