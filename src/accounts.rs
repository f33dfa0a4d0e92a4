//! Accounts and bearer sessions.
//!
//! Passwords are stored as PBKDF2-HMAC-SHA256 digests with a per-account
//! salt. Session tokens are opaque; only their SHA-256 hash is persisted.

use std::sync::LazyLock;

use chrono::{Duration, Utc};
use pbkdf2::pbkdf2_hmac;
use regex::Regex;
use rusqlite::Connection;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::caregivers;
use crate::db::{repository, Credentials, DatabaseError};
use crate::models::{normalize_email, Account};

#[cfg(not(test))]
pub const PBKDF2_ITERATIONS: u32 = 600_000;
#[cfg(test)]
pub const PBKDF2_ITERATIONS: u32 = 1_000;

pub const HASH_LENGTH: usize = 32;
pub const SALT_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("Invalid email address")]
    InvalidEmail,
    #[error("Name must not be empty")]
    MissingName,
    #[error("Password must be at least {MIN_PASSWORD_LENGTH} characters")]
    WeakPassword,
    #[error("An account with this email already exists")]
    EmailTaken,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Session is missing or expired")]
    InvalidSession,
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Input for `register`. The password travels separately as a
/// `PasswordDigest`, derived before the connection is locked.
#[derive(Debug, Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

impl Registration {
    /// Cheap shape checks, worth running before paying for a digest.
    pub fn validate(&self) -> Result<(), AccountError> {
        if !is_valid_email(&normalize_email(&self.email)) {
            return Err(AccountError::InvalidEmail);
        }
        if self.name.trim().is_empty() {
            return Err(AccountError::MissingName);
        }
        Ok(())
    }
}

/// A freshly issued session: the account plus the raw bearer token.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub account: Account,
    pub token: String,
}

/// Salted PBKDF2 output for a new password.
#[derive(Clone)]
pub struct PasswordDigest {
    hash: [u8; HASH_LENGTH],
    salt: [u8; SALT_LENGTH],
}

impl PasswordDigest {
    /// Check strength and derive. CPU-bound; never call it under the
    /// database lock.
    pub fn derive(password: &str, iterations: u32) -> Result<Self, AccountError> {
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AccountError::WeakPassword);
        }
        let salt = generate_salt();
        Ok(Self {
            hash: hash_password(password, &salt, iterations),
            salt,
        })
    }
}

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap());

/// Loose shape check: one `@`, no whitespace, a dot in the domain.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

pub fn hash_password(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut out = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

pub fn generate_salt() -> [u8; SALT_LENGTH] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Random bearer token (URL-safe base64, 32 bytes of entropy).
pub fn generate_token() -> String {
    use base64::Engine;
    let bytes: [u8; 32] = rand::random();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn hash_token(token: &str) -> [u8; 32] {
    use sha2::Digest;
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Issue a bearer token for `account`. Expired sessions are swept first,
/// so the table stays bounded by the live ones.
pub fn open_session(
    conn: &Connection,
    account: Account,
    session_ttl: Duration,
) -> Result<IssuedSession, AccountError> {
    let now = Utc::now();
    let purged = repository::purge_expired_sessions(conn, now)?;
    if purged > 0 {
        tracing::debug!(purged, "Expired sessions removed");
    }

    let token = generate_token();
    repository::insert_session(conn, &hash_token(&token), &account.id, now + session_ttl)?;
    Ok(IssuedSession { account, token })
}

/// Create an account, attach any invitations already addressed to its
/// email, and open a first session.
pub fn register(
    conn: &Connection,
    input: Registration,
    password: &PasswordDigest,
    session_ttl: Duration,
) -> Result<IssuedSession, AccountError> {
    input.validate()?;
    let email = normalize_email(&input.email);
    if repository::find_account_by_email(conn, &email)?.is_some() {
        return Err(AccountError::EmailTaken);
    }

    let account = Account {
        id: Uuid::new_v4(),
        name: input.name.trim().to_string(),
        email,
        phone: input.phone.map(|p| p.trim().to_string()).filter(|p| !p.is_empty()),
        created_at: Utc::now(),
    };

    match repository::insert_account(conn, &account, &password.hash, &password.salt) {
        Ok(()) => {}
        Err(e) if e.is_constraint_violation() => return Err(AccountError::EmailTaken),
        Err(e) => return Err(e.into()),
    }

    let linked = caregivers::link_pending_invitations(conn, &account)?;
    tracing::info!(account_id = %account.id, linked, "Account registered");

    open_session(conn, account, session_ttl)
}

/// Stored password material for `email`, if the account exists.
pub fn find_credentials(
    conn: &Connection,
    email: &str,
) -> Result<Option<Credentials>, AccountError> {
    Ok(repository::get_credentials(conn, &normalize_email(email))?)
}

/// Check `password` against stored credentials. CPU-bound like
/// `PasswordDigest::derive`.
pub fn verify_password(
    credentials: Option<Credentials>,
    password: &str,
    iterations: u32,
) -> Result<Account, AccountError> {
    let Some(creds) = credentials else {
        // Burn the same work as a real check so timing does not reveal
        // which emails exist.
        let _ = hash_password(password, &[0u8; SALT_LENGTH], iterations);
        return Err(AccountError::InvalidCredentials);
    };

    let candidate = hash_password(password, &creds.password_salt, iterations);
    if candidate[..].ct_eq(creds.password_hash.as_slice()).unwrap_u8() == 0 {
        tracing::warn!(account_id = %creds.account.id, "Login failed");
        return Err(AccountError::InvalidCredentials);
    }
    Ok(creds.account)
}

/// Resolve a bearer token to its account.
pub fn authenticate(conn: &Connection, token: &str) -> Result<Account, AccountError> {
    repository::find_session_account(conn, &hash_token(token), Utc::now())?
        .ok_or(AccountError::InvalidSession)
}

pub fn logout(conn: &Connection, token: &str) -> Result<(), AccountError> {
    if repository::delete_session(conn, &hash_token(token))? {
        Ok(())
    } else {
        Err(AccountError::InvalidSession)
    }
}
