//! Gateway integration client.
//!
//! Holds one persistent, authenticated RPC connection to the messaging
//! gateway: correlated requests over a shared channel, typed server-push
//! events, and backoff-driven reconnection after unexpected closes.

pub mod api;
pub mod client;
pub mod error;
pub mod events;
pub mod transport;

pub use {
    api::{AgentReply, AgentRequest, AgentTurn, GatewayApi, RawConfig},
    client::{ClientOptions, ConnectionState, GatewayClient, Negotiated},
    error::Error,
    events::{EventHandler, EventKind, GatewayEvent},
    transport::{Transport, TransportEvent, TransportSession, WsTransport},
};
