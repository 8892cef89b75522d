use std::{default::Default, time::Duration};

use crate::constants::MAX_PACKET_SIZE;

#[derive(Clone, Debug)]
/// Configuration options to tune transport and poll-loop behavior.
pub struct Config {
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Floor on how long a connection may go without receiving anything
    /// before it is considered dead.
    pub idle_connection_timeout: Duration,
    /// The liveness threshold scales with latency: a connection is dead once
    /// it has been silent for `liveness_rtt_factor` average round trips
    /// (never less than `idle_connection_timeout`).
    pub liveness_rtt_factor: u32,
    /// Age after which an unacknowledged sent packet is treated as lost.
    pub packet_timeout: Duration,
    /// Capacity of the in-flight ring of sent packets. Also defines the
    /// seqnum window behind the peer's latest ack after which a sent packet
    /// counts as lost.
    pub sent_buffer_capacity: u16,
    /// Capacity of the ring holding received packets awaiting dispatch.
    pub recv_buffer_capacity: u16,
    /// Size of the buffer datagrams are received into. Kept larger than
    /// `MAX_PACKET_SIZE` so oversized datagrams are observed and rejected
    /// rather than silently truncated to a valid length.
    pub receive_buffer_max_size: usize,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    /// Corresponds to IP_TTL socket option.
    pub socket_ttl: Option<u32>,
    /// Enable broadcast mode (default: false).
    /// Corresponds to SO_BROADCAST socket option.
    pub socket_broadcast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocking_mode: false,
            idle_connection_timeout: Duration::from_secs(5),
            liveness_rtt_factor: 10,
            packet_timeout: Duration::from_secs(2),
            sent_buffer_capacity: 256,
            recv_buffer_capacity: 256,
            receive_buffer_max_size: 2 * MAX_PACKET_SIZE,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_ttl: None,
            socket_broadcast: false,
        }
    }
}
