//! HTTP and WebSocket surface of the caregiver service.
//!
//! REST routes are nested under `/api/` and protected by a middleware
//! stack: Rate Limit → Auth → Audit → Handler. The socket lives at
//! `/ws/caregivers` and authenticates with a one-time ticket.

pub mod endpoints;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod router;
pub mod server;
pub mod types;
pub mod websocket;

pub use error::ApiError;
pub use router::api_router;
pub use server::{ApiServer, ServerError};
pub use types::ApiContext;
