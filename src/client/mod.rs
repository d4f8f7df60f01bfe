//! Client-side channel management: the reconnection contract and a small
//! WebSocket runner that implements it.

pub mod reconnect;
pub mod transport;

pub use reconnect::{ChatClient, ClientEvent, ClientHandle, ReconnectPolicy};
pub use transport::{ChannelConn, ChannelTransport, TransportError, WsTransport};
