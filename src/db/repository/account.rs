use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::Account;

const ACCOUNT_COLUMNS: &str = "id, name, email, phone, created_at";

type AccountRow = (String, String, String, Option<String>, DateTime<Utc>);

fn read_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
    ))
}

fn account_from_row(row: AccountRow) -> Result<Account, DatabaseError> {
    let (id, name, email, phone, created_at) = row;
    Ok(Account {
        id: parse_uuid(&id)?,
        name,
        email,
        phone,
        created_at,
    })
}

/// Stored password material for an account.
pub struct Credentials {
    pub account: Account,
    pub password_hash: Vec<u8>,
    pub password_salt: Vec<u8>,
}

pub fn insert_account(
    conn: &Connection,
    account: &Account,
    password_hash: &[u8],
    password_salt: &[u8],
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO accounts (id, name, email, phone, password_hash, password_salt, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            account.id.to_string(),
            account.name,
            account.email,
            account.phone,
            password_hash,
            password_salt,
            account.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_account(conn: &Connection, id: &Uuid) -> Result<Option<Account>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            [id.to_string()],
            read_account_row,
        )
        .optional()?;
    row.map(account_from_row).transpose()
}

/// Look up an account by its (already normalized) email.
pub fn find_account_by_email(
    conn: &Connection,
    email: &str,
) -> Result<Option<Account>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1"),
            [email],
            read_account_row,
        )
        .optional()?;
    row.map(account_from_row).transpose()
}

pub fn get_credentials(
    conn: &Connection,
    email: &str,
) -> Result<Option<Credentials>, DatabaseError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT {ACCOUNT_COLUMNS}, password_hash, password_salt
                 FROM accounts WHERE email = ?1"
            ),
            [email],
            |row| {
                Ok((
                    read_account_row(row)?,
                    row.get::<_, Vec<u8>>(5)?,
                    row.get::<_, Vec<u8>>(6)?,
                ))
            },
        )
        .optional()?;

    match row {
        Some((account_row, password_hash, password_salt)) => Ok(Some(Credentials {
            account: account_from_row(account_row)?,
            password_hash,
            password_salt,
        })),
        None => Ok(None),
    }
}

// ─── Sessions ────────────────────────────────────────────

pub fn insert_session(
    conn: &Connection,
    token_hash: &[u8; 32],
    account_id: &Uuid,
    expires_at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO sessions (token_hash, account_id, expires_at, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            &token_hash[..],
            account_id.to_string(),
            expires_at.timestamp(),
            Utc::now(),
        ],
    )?;
    Ok(())
}

/// Resolve a session token hash to its account, ignoring expired sessions.
pub fn find_session_account(
    conn: &Connection,
    token_hash: &[u8; 32],
    now: DateTime<Utc>,
) -> Result<Option<Account>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT a.id, a.name, a.email, a.phone, a.created_at
             FROM sessions s JOIN accounts a ON a.id = s.account_id
             WHERE s.token_hash = ?1 AND s.expires_at > ?2",
            params![&token_hash[..], now.timestamp()],
            read_account_row,
        )
        .optional()?;
    row.map(account_from_row).transpose()
}

pub fn delete_session(conn: &Connection, token_hash: &[u8; 32]) -> Result<bool, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM sessions WHERE token_hash = ?1",
        params![&token_hash[..]],
    )?;
    Ok(n > 0)
}

pub fn purge_expired_sessions(conn: &Connection, now: DateTime<Utc>) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "DELETE FROM sessions WHERE expires_at <= ?1",
        params![now.timestamp()],
    )?;
    Ok(n)
}
