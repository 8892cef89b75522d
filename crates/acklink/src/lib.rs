#![warn(missing_docs)]

//! Acklink: a small public API facade for the workspace.
//!
//! This crate provides a clean, stable surface that re-exports the most
//! commonly used types for building on the reliable datagram link:
//!
//! - Socket and handles (`SmartSocket`, `ConnectionHandle`)
//! - Lifecycle observation (`SocketStateObserver`, `SocketStateLogger`)
//! - Packet dispatch (`PacketDispatcher`, `Packet`)
//! - Core configuration (`Config`)
//!
//! Example
//! ```ignore
//! use acklink::{Config, SmartSocket, SocketStateLogger};
//! use std::{sync::Arc, time::Instant};
//!
//! let mut socket = SmartSocket::bind_any().unwrap();
//! socket.add_observer(Arc::new(SocketStateLogger));
//!
//! let server = "127.0.0.1:13999".parse().unwrap();
//! let conn = socket.get_or_create_connection(server);
//!
//! // Fire-and-forget; pass a resend budget for retried delivery.
//! conn.send(b"hello".to_vec(), 0);
//! conn.send(b"important".to_vec(), 3);
//!
//! socket.manual_poll(Instant::now());
//! ```

// Core config and errors
pub use acklink_core::{
    config::Config,
    error::{ErrorKind, Result},
};
// Protocol: wire types
pub use acklink_protocol::{Packet, PacketHeader, SequenceNumber};
// Connection: state machine surface
pub use acklink_connection::{Connection, ConnectionState, ConnectionStats, PacketDispatcher};
// Host: socket, handles, observers
pub use acklink_host::{
    ConnectionHandle, SmartSocket, SocketStateLogger, SocketStateObserver,
};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        Config, Connection, ConnectionHandle, ConnectionState, ConnectionStats, ErrorKind, Packet,
        PacketDispatcher, SmartSocket, SocketStateLogger, SocketStateObserver,
    };
}
