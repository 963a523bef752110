//! Session transport: one WebSocket per conversation carrying JSON control
//! messages and binary audio, with reconnection and a typed event bus.

pub mod base;
pub mod client;
pub mod events;
pub mod messages;

pub use base::{
    ConnectionState, ReconnectionConfig, TransportConfig, TransportError, TransportResult,
};
pub use client::SessionTransport;
pub use events::{EventBus, EventHandler, Subscription, TransportEvent, TransportEventKind};
pub use messages::{
    CONNECTION_ESTABLISHED_MARKER, ClientMessage, ControlKind, ServerMessage, TextPayload,
};
