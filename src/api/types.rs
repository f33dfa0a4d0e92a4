//! Shared types for the HTTP and socket layer.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core_state::CoreState;
use crate::models::Account;

/// Lifetime of a socket upgrade ticket.
pub const WS_TICKET_TTL: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus API-specific caches.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub ws_tickets: Arc<Mutex<WsTicketStore>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self {
            core,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
            ws_tickets: Arc::new(Mutex::new(WsTicketStore::new())),
        }
    }
}

/// Authenticated caller, injected into request extensions by the auth
/// middleware.
#[derive(Debug, Clone)]
pub struct AccountContext {
    pub account: Account,
    /// Raw bearer token, kept so logout can revoke it.
    pub token: String,
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-client sliding window
// ═══════════════════════════════════════════════════════════

/// Sliding-window limiter with a per-minute and a per-hour budget.
pub struct RateLimiter {
    windows: HashMap<String, VecDeque<Instant>>,
    per_minute: usize,
    per_hour: usize,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_limits(120, 2000)
    }

    pub fn with_limits(per_minute: usize, per_hour: usize) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
            per_hour,
        }
    }

    /// Record a request for `key`. `Err(retry_after_secs)` when over budget.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        let now = Instant::now();
        if self.windows.len() > 10_000 {
            self.windows
                .retain(|_, w| w.back().is_some_and(|t| now.duration_since(*t) < HOUR));
        }

        let window = self.windows.entry(key.to_string()).or_default();
        while window.front().is_some_and(|t| now.duration_since(*t) >= HOUR) {
            window.pop_front();
        }

        if window.len() >= self.per_hour {
            return Err(HOUR.as_secs());
        }
        let last_minute = window
            .iter()
            .rev()
            .take_while(|t| now.duration_since(**t) < MINUTE)
            .count();
        if last_minute >= self.per_minute {
            return Err(MINUTE.as_secs());
        }

        window.push_back(now);
        Ok(())
    }
}

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════
// WS ticket store: one-time socket upgrade tokens
// ═══════════════════════════════════════════════════════════

/// One-time ticket so the bearer token never appears in a query string.
struct WsTicket {
    account: Account,
    expires_at: Instant,
}

pub struct WsTicketStore {
    tickets: HashMap<String, WsTicket>,
}

impl WsTicketStore {
    pub fn new() -> Self {
        Self {
            tickets: HashMap::new(),
        }
    }

    /// Issue a ticket for `account`, valid for `WS_TICKET_TTL`.
    pub fn issue(&mut self, account: Account) -> String {
        self.cleanup();
        let ticket = uuid::Uuid::new_v4().to_string();
        self.tickets.insert(
            ticket.clone(),
            WsTicket {
                account,
                expires_at: Instant::now() + WS_TICKET_TTL,
            },
        );
        ticket
    }

    /// Redeem a ticket. Each ticket works at most once.
    pub fn consume(&mut self, ticket: &str) -> Option<Account> {
        let entry = self.tickets.remove(ticket)?;
        (Instant::now() <= entry.expires_at).then_some(entry.account)
    }

    fn cleanup(&mut self) {
        let now = Instant::now();
        self.tickets.retain(|_, t| now < t.expires_at);
    }
}

impl Default for WsTicketStore {
    fn default() -> Self {
        Self::new()
    }
}
