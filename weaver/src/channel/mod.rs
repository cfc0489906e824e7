//! Duplex channel to a session's chat endpoint.

mod backoff;
mod manager;
#[cfg(test)]
pub(crate) mod memory;
mod transport;

pub use backoff::ReconnectPolicy;
pub use manager::{ChannelEvent, ChannelHandle, ChannelManager, ChannelSender, ConnectionStatus};
pub use transport::{chat_url, Connection, Connector, WsConnector};
