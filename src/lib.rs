//! Authgate: token validation and authorization gate for the booking API.
//! Used by: binary entrypoint, integration callers embedding the router.

pub mod config;
pub mod csrf;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod keys;
pub mod provider;
pub mod ratelimit;
pub mod roles;
pub mod server;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod token;

#[cfg(test)]
pub mod testutil;
