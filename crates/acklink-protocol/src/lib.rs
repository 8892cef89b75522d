#![warn(missing_docs)]

//! acklink-protocol: wire codec and the per-connection bookkeeping buffers.
//!
//! This crate holds everything that touches sequence numbers and the wire:
//! - `sequence`: circular 16-bit arithmetic
//! - `packet`: header encode/decode and the payload container
//! - `ack_field`: 32-bit selective-ack bitmap
//! - `sent_buffer`: ring of in-flight packets with seqnum assignment
//! - `recv_buffer`: ring of received packets awaiting dispatch

pub mod ack_field;
pub mod packet;
pub mod recv_buffer;
pub mod sent_buffer;
pub mod sequence;

pub use ack_field::AckField;
pub use packet::{Packet, PacketHeader};
pub use recv_buffer::RecvBuffer;
pub use sent_buffer::{SentBuffer, SentPacket};
pub use sequence::{sequence_greater_than, sequence_less_than, SequenceNumber};
