#![warn(missing_docs)]

//! acklink-connection: the per-peer connection state machine.
//!
//! A [`Connection`] composes the protocol-level buffers into the state kept
//! for one remote endpoint: sequence assignment, selective acknowledgement,
//! bounded-retry resend, round-trip estimation and liveness. It performs no
//! I/O itself; every operation returns the work (datagrams to send, packets
//! to retry) for the host to carry out.

/// The connection state machine.
pub mod connection;
/// Application-level packet dispatch.
pub mod dispatcher;
/// Per-connection traffic counters.
pub mod statistics;

pub use connection::{Connection, ConnectionState, ReceiveOutcome, Resend, SendOutcome};
pub use dispatcher::PacketDispatcher;
pub use statistics::ConnectionStats;
