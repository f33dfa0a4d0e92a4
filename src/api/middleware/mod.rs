//! API middleware stack.
//!
//! Execution order (outermost → innermost):
//! 1. Rate limiter: reject early
//! 2. Auth validator: bearer token → `AccountContext` (protected routes only)
//! 3. Audit logger: logs after auth, has the account id

pub mod audit;
pub mod auth;
pub mod rate;
