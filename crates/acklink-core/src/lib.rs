#![warn(missing_docs)]

//! acklink-core: foundational types shared across all layers.
//!
//! This crate provides the minimal set of utilities the other crates build
//! on:
//! - Protocol constants (magic, size bounds)
//! - Configuration types
//! - Error handling
//! - The datagram transport abstraction
//!
//! Protocol and connection logic live in the specialized crates:
//! - `acklink-protocol`: wire codec, ack bitmaps, send/receive buffers
//! - `acklink-connection`: per-peer connection state machine
//! - `acklink-host`: socket demultiplexer and poll loop

/// Protocol constants shared across layers.
pub mod constants {
    /// Magic tag identifying this transport, first four bytes of every
    /// datagram ("ALK1" on the wire, little-endian).
    pub const PROTOCOL_ID: u32 = 0x314B_4C41;

    /// Size of the fixed packet header in bytes:
    /// protocol (4) + seq_num (2) + ack (2) + ack_bits (4).
    pub const PACKET_HEADER_SIZE: usize = 12;

    /// Upper bound on a whole datagram. Staying well below any realistic
    /// path MTU keeps IP fragmentation out of the picture.
    pub const MAX_PACKET_SIZE: usize = 512;

    /// Largest payload that fits a single datagram.
    pub const MAX_PAYLOAD_SIZE: usize = MAX_PACKET_SIZE - PACKET_HEADER_SIZE;
}

/// Configuration options for the transport and the poll loop.
pub mod config;
/// Error types and results.
pub mod error;
/// Transport abstraction for pluggable I/O.
pub mod transport;
