#![forbid(unsafe_code)]

//! Pluggable discovery protocol engine.
//!
//! - [`client`]: controller side. Spawns a discovery subprocess, performs the
//!   handshake, and exposes the protocol verbs as async calls plus an event
//!   channel for sync mode.
//! - [`server`]: discovery side. Serves the protocol on stdin/stdout on
//!   behalf of a [`server::Discovery`] implementation.
//! - [`protocol`] and [`models`]: the wire format shared by both.

pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod protocol;
pub mod server;

pub use client::{Client, ClientOptions, ClientState};
pub use config::GlobalConfig;
pub use errors::{AppError, Result};
