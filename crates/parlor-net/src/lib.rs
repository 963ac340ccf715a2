//! # parlor-net
//!
//! Concrete transports for the chat core: a reqwest REST client, a
//! WebSocket live channel with automatic reconnect, and bearer-token sources.

pub mod auth;
pub mod live;
pub mod rest;

mod error;

pub use auth::{EnvToken, StaticToken};
pub use error::NetError;
pub use live::{LiveConfig, WsLiveChannel};
pub use rest::RestClient;
