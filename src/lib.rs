//! Courier: real-time presence and direct-message delivery.
//!
//! The server half (`routes`, `services`) tracks which identities have live
//! websocket connections, pushes persisted messages to their receivers, and
//! broadcasts the online set on every membership change. The `client` half
//! reconciles those pushes with conversation history and unread counters.

pub mod client;
pub mod config;
pub mod db;
pub mod frame;
pub mod model;
pub mod routes;
pub mod services;
pub mod state;
