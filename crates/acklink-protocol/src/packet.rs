//! Wire framing: the fixed packet header and the payload container.
//!
//! One UDP datagram carries exactly one packet. The header layout is fixed
//! little-endian:
//!
//! ```text
//! offset  size  field
//! 0       4     protocol  (u32 LE)
//! 4       2     seq_num   (u16 LE)
//! 6       2     ack       (u16 LE)
//! 8       4     ack_bits  (u32 LE)
//! 12      ...   payload   (up to 500 bytes)
//! ```

use std::{
    io::{self, Cursor},
    sync::Arc,
};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use acklink_core::{
    constants::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PROTOCOL_ID},
    error::{ErrorKind, Result},
};

use crate::sequence::SequenceNumber;

/// Fixed header carried by every datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketHeader {
    /// Magic tag identifying this transport.
    pub protocol: u32,
    /// Sender-assigned sequence number, monotonic modulo 2^16.
    pub seq_num: SequenceNumber,
    /// Latest seqnum the sender has received from its peer.
    pub ack: SequenceNumber,
    /// Bitmap: bit i set means packet `ack - (i + 1)` was also received.
    pub ack_bits: u32,
}

impl PacketHeader {
    /// Creates a header for a packet that has not been assigned a sequence
    /// number yet. The send buffer stamps `seq_num`/`ack`/`ack_bits` when the
    /// packet is stored.
    pub fn unstamped() -> Self {
        Self { protocol: PROTOCOL_ID, seq_num: 0, ack: 0, ack_bits: 0 }
    }

    fn write_to(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        buffer.write_u32::<LittleEndian>(self.protocol)?;
        buffer.write_u16::<LittleEndian>(self.seq_num)?;
        buffer.write_u16::<LittleEndian>(self.ack)?;
        buffer.write_u32::<LittleEndian>(self.ack_bits)?;
        Ok(())
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let protocol = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| ErrorKind::CouldNotReadHeader(e.to_string()))?;
        let seq_num = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| ErrorKind::CouldNotReadHeader(e.to_string()))?;
        let ack = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| ErrorKind::CouldNotReadHeader(e.to_string()))?;
        let ack_bits = cursor
            .read_u32::<LittleEndian>()
            .map_err(|e| ErrorKind::CouldNotReadHeader(e.to_string()))?;
        Ok(Self { protocol, seq_num, ack, ack_bits })
    }
}

/// A decoded packet: header plus payload.
///
/// The payload is reference counted so the same bytes can sit in the
/// in-flight buffer and be re-enqueued for resend without copying.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Arc<[u8]>,
}

impl Packet {
    /// Creates an outgoing packet around the given payload. The header is
    /// stamped later, when the packet enters the send buffer.
    pub fn outgoing(payload: Arc<[u8]>) -> Self {
        Self { header: PacketHeader::unstamped(), payload }
    }

    /// Creates a packet from already-known parts.
    pub fn from_parts(header: PacketHeader, payload: Arc<[u8]>) -> Self {
        Self { header, payload }
    }

    /// Returns the packet header.
    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Returns a mutable reference to the header, used by the send buffer to
    /// stamp sequence and ack fields.
    pub fn header_mut(&mut self) -> &mut PacketHeader {
        &mut self.header
    }

    /// Returns a slice of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Returns a clone of the reference-counted payload.
    pub fn payload_arc(&self) -> Arc<[u8]> {
        self.payload.clone()
    }

    /// Serializes header and payload into one datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        self.header.write_to(&mut buffer).expect("writing to a Vec cannot fail");
        buffer.extend_from_slice(&self.payload);
        buffer
    }

    /// Deserializes a datagram.
    ///
    /// Fails with `BadPacketSize` when the datagram is shorter than the
    /// header or longer than `MAX_PACKET_SIZE`; no state is touched in that
    /// case.
    pub fn decode(datagram: &[u8]) -> Result<Packet> {
        if datagram.len() < PACKET_HEADER_SIZE || datagram.len() > MAX_PACKET_SIZE {
            return Err(ErrorKind::BadPacketSize(datagram.len()));
        }
        let mut cursor = Cursor::new(datagram);
        let header = PacketHeader::read_from(&mut cursor)?;
        let payload = Arc::from(&datagram[PACKET_HEADER_SIZE..]);
        Ok(Packet { header, payload })
    }
}
