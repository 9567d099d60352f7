//! Presence and delivery services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `registry` owns the only shared mutable state. `presence` and `delivery`
//! push frames through it; `session` drives one connection's lifecycle.
//! `store` and `auth` are the external collaborators; `messages` ties a
//! confirmed store write to exactly one delivery.

pub mod auth;
pub mod delivery;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod session;
pub mod store;
