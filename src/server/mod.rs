//! TCP relay server
//!
//! Serves a [`ConnectionHandler`](crate::handler::ConnectionHandler) over
//! plain TCP: every accepted socket is one viewer.

pub mod config;
pub mod listener;

pub use config::ServerConfig;
pub use listener::RelayServer;
