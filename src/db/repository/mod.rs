//! Repository layer: entity-scoped database operations.
//!
//! Free functions over a borrowed `rusqlite::Connection`; callers decide
//! how long the connection lock is held.

mod account;
mod caregiver_link;
mod sos_alert;

use uuid::Uuid;

use super::DatabaseError;

pub use account::*;
pub use caregiver_link::*;
pub use sos_alert::*;

pub(crate) fn parse_uuid(value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::Utc;
    use rusqlite::Connection;
    use uuid::Uuid;

    use super::insert_account;
    use crate::models::Account;

    /// Insert a bare account with a throwaway password hash.
    pub fn account(conn: &Connection, name: &str, email: &str) -> Account {
        let account = Account {
            id: Uuid::new_v4(),
            name: name.into(),
            email: email.into(),
            phone: None,
            created_at: Utc::now(),
        };
        insert_account(conn, &account, &[0u8; 32], &[0u8; 32]).unwrap();
        account
    }
}
