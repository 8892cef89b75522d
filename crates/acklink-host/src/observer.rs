//! Lifecycle observation for the socket and its connections.

use std::net::SocketAddr;

use tracing::{error, info};

use acklink_core::error::ErrorKind;

use crate::handle::ConnectionHandle;

/// Listener for socket lifecycle events.
///
/// Every method has a no-op default, so implementors only override what they
/// care about. Fan-out is synchronous on the poll thread, in registration
/// order; a panicking observer is logged and does not stop the fan-out.
pub trait SocketStateObserver: Send + Sync {
    /// Invoked when a connection sees its first traffic in either
    /// direction.
    fn on_connect(&self, _connection: &ConnectionHandle) {}

    /// Invoked when a connection dies because the peer went silent.
    fn on_peer_disconnect(&self, _connection: &ConnectionHandle) {}

    /// Invoked when a datagram arrives that is shorter than a packet header
    /// or longer than the maximum packet size.
    fn on_bad_packet_size(&self, _peer: &SocketAddr, _size: usize) {}

    /// Invoked when the substrate fails to send a datagram.
    fn on_error(&self, _connection: &ConnectionHandle, _error: &ErrorKind) {}

    /// Invoked when the socket is shutting down.
    fn on_socket_shutdown(&self) {}
}

/// Observer that logs every lifecycle event.
#[derive(Debug, Default)]
pub struct SocketStateLogger;

impl SocketStateObserver for SocketStateLogger {
    fn on_connect(&self, connection: &ConnectionHandle) {
        info!("connection established with {}", connection.remote_address());
    }

    fn on_peer_disconnect(&self, connection: &ConnectionHandle) {
        info!("peer {} disconnected", connection.remote_address());
    }

    fn on_bad_packet_size(&self, peer: &SocketAddr, size: usize) {
        error!("received packet with bad size {} from {}", size, peer);
    }

    fn on_error(&self, connection: &ConnectionHandle, error: &ErrorKind) {
        error!("error on connection with {}: {}", connection.remote_address(), error);
    }

    fn on_socket_shutdown(&self) {
        info!("socket is shutting down");
    }
}
