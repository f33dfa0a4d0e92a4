//! API endpoint handlers.
//!
//! Handlers lock the database, call into the domain modules, and map
//! their errors through `ApiError`.

pub mod auth;
pub mod caregivers;
pub mod health;
pub mod sos;
