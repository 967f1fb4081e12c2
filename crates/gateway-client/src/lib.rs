//! Async client for the logon and world servers.
//!
//! `Client::login` runs SRP6 against the logon server and returns the session
//! key plus realm list; `Client::connect_world` uses that key to open an
//! encrypted world session whose inbound packets go to a `PacketSink`.

pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod login;
pub mod transport;
pub mod world;

pub use client::{Client, WorldHandle};
pub use config::ClientConfig;
pub use error::SessionError;
pub use login::{AuthenticatedAccount, LogonSession};
pub use transport::{Flow, Protocol, TransportHandle, TransportLoop, WriteQueue};
pub use world::{PacketSink, WorldSession};
