//! Provider token verification and the claims cache in front of it.
//! Used by: gate, handlers, state.

pub mod cache;
pub mod claims;
pub mod verify;

pub use cache::ClaimsCache;
pub use claims::VerifiedClaims;
pub use verify::TokenVerifier;
