//! Shared application-facing handle over a registry connection.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use crossbeam_channel::Sender;
use tracing::error;

use acklink_core::constants::MAX_PAYLOAD_SIZE;
use acklink_connection::{Connection, ConnectionState, ConnectionStats, PacketDispatcher};

/// A queued outgoing payload, bound for the poll thread.
#[derive(Debug)]
pub(crate) struct SendTask {
    pub(crate) address: SocketAddr,
    pub(crate) payload: Arc<[u8]>,
    pub(crate) resend_limit: u32,
}

/// Shared handle to a connection owned by the socket's registry.
///
/// The registry and any number of handles keep the connection alive; the
/// state itself is only mutated on the poll thread. `send` may be called
/// from any thread; it posts a task and returns immediately.
#[derive(Clone)]
pub struct ConnectionHandle {
    remote_address: SocketAddr,
    connection: Arc<Mutex<Connection>>,
    tasks: Sender<SendTask>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        remote_address: SocketAddr,
        connection: Arc<Mutex<Connection>>,
        tasks: Sender<SendTask>,
    ) -> Self {
        Self { remote_address, connection, tasks }
    }

    /// The peer this handle talks to.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Schedules `payload` for transmission and returns immediately.
    ///
    /// `resend_limit` is the packet's retry budget: 0 means fire-and-forget
    /// (the baseline service is unreliable-with-acks), a positive budget
    /// makes loss trigger that many re-sends under fresh sequence numbers.
    /// Sends on a dead or shut-down socket are silently dropped.
    pub fn send(&self, payload: impl Into<Arc<[u8]>>, resend_limit: u32) {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            error!(
                "dropping {}-byte payload for {}: larger than a single datagram",
                payload.len(),
                self.remote_address
            );
            return;
        }
        let task = SendTask { address: self.remote_address, payload, resend_limit };
        // A closed channel means the socket is gone; the post is dropped,
        // matching the shutdown contract.
        let _ = self.tasks.send(task);
    }

    /// Drains received packets in circular-seqnum order, invoking the
    /// dispatcher for each on the calling thread.
    ///
    /// The drain holds the connection lock, so the dispatcher must work
    /// through the `&Connection` it is given rather than calling back into
    /// this handle.
    pub fn dispatch_received_packets(&self, dispatcher: &mut dyn PacketDispatcher) {
        self.lock().dispatch_received_packets(dispatcher);
    }

    /// True once the connection has been marked dead.
    pub fn is_dead(&self) -> bool {
        self.lock().is_dead()
    }

    /// True once the connection has left `Fresh`: traffic has flowed in at
    /// least one direction.
    pub fn is_established(&self) -> bool {
        self.lock().is_established()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.lock().state()
    }

    /// Snapshot of the connection's traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.lock().stats()
    }

    /// Smoothed round-trip estimate.
    pub fn average_rtt(&self) -> Duration {
        self.lock().average_rtt()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection.lock().expect("connection mutex poisoned")
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("remote_address", &self.remote_address)
            .finish()
    }
}
