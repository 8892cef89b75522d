//! Application-level packet dispatch.

use acklink_protocol::Packet;

use crate::connection::Connection;

/// Receives validated, deduplicated payloads from a connection.
///
/// `dispatch_packet` is called once per received packet, in ascending
/// circular-seqnum order within one drain, on the thread that drains.
pub trait PacketDispatcher {
    /// Handles one received packet.
    fn dispatch_packet(&mut self, connection: &Connection, packet: Packet);
}
