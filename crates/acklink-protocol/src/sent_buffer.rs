//! Fixed-capacity ring of outstanding sent packets.

use std::{sync::Arc, time::Instant};

use crate::{
    ack_field::AckField,
    packet::Packet,
    sequence::{sequence_less_than, SequenceNumber},
};

/// A sent packet awaiting acknowledgement.
#[derive(Clone, Debug)]
pub struct SentPacket {
    /// The packet as it went on the wire, header stamped.
    pub packet: Packet,
    /// How many more times this packet may be re-enqueued after loss.
    pub resend_limit: u32,
    /// When the packet entered the buffer, for RTT measurement and age
    /// eviction.
    pub sent_time: Instant,
}

/// Circular buffer of in-flight packets, slot = `seq_num % capacity`.
///
/// The buffer also owns sequence number assignment: `store` stamps each
/// packet with the next number and the caller's current ack snapshot, so a
/// sequence number can never be in flight twice; a colliding slot evicts
/// its prior occupant.
#[derive(Debug)]
pub struct SentBuffer {
    next_seq_num: SequenceNumber,
    entries: Box<[Option<SentPacket>]>,
    occupied: usize,
}

impl SentBuffer {
    /// Creates a buffer with the given number of slots.
    pub fn with_capacity(capacity: u16) -> Self {
        Self {
            next_seq_num: 0,
            entries: vec![None; capacity as usize].into_boxed_slice(),
            occupied: 0,
        }
    }

    /// The sequence number the next stored packet will be assigned.
    pub fn next_seq_num(&self) -> SequenceNumber {
        self.next_seq_num
    }

    /// Stamps `payload` with the next sequence number and the send-time ack
    /// snapshot, stores it, and returns the assigned number together with
    /// any displaced occupant.
    pub fn store(
        &mut self,
        payload: Arc<[u8]>,
        resend_limit: u32,
        local_ack: &AckField,
        now: Instant,
    ) -> (SequenceNumber, Option<SentPacket>) {
        let seq_num = self.next_seq_num;
        self.next_seq_num = self.next_seq_num.wrapping_add(1);

        let mut packet = Packet::outgoing(payload);
        let header = packet.header_mut();
        header.seq_num = seq_num;
        header.ack = local_ack.latest_seq_num();
        header.ack_bits = local_ack.bits();

        let index = self.index(seq_num);
        let evicted = self.entries[index].replace(SentPacket {
            packet,
            resend_limit,
            sent_time: now,
        });
        if evicted.is_none() {
            self.occupied += 1;
        }
        (seq_num, evicted)
    }

    /// Returns the entry for `seq_num`, if its slot holds exactly that
    /// packet.
    pub fn get(&self, seq_num: SequenceNumber) -> Option<&SentPacket> {
        self.entries[self.index(seq_num)]
            .as_ref()
            .filter(|entry| entry.packet.header().seq_num == seq_num)
    }

    /// Returns true when the slot for `seq_num` holds exactly that packet.
    pub fn contains(&self, seq_num: SequenceNumber) -> bool {
        self.entries[self.index(seq_num)]
            .as_ref()
            .map_or(false, |entry| entry.packet.header().seq_num == seq_num)
    }

    /// Removes and returns the entry for `seq_num`, if present.
    pub fn release(&mut self, seq_num: SequenceNumber) -> Option<SentPacket> {
        if !self.contains(seq_num) {
            return None;
        }
        let index = self.index(seq_num);
        let entry = self.entries[index].take();
        if entry.is_some() {
            self.occupied -= 1;
        }
        entry
    }

    /// The circular-minimal sequence number among occupied slots.
    pub fn oldest_seq_num(&self) -> Option<SequenceNumber> {
        let mut oldest: Option<SequenceNumber> = None;
        for entry in self.entries.iter().flatten() {
            let seq = entry.packet.header().seq_num;
            if oldest.map_or(true, |current| sequence_less_than(seq, current)) {
                oldest = Some(seq);
            }
        }
        oldest
    }

    /// The earliest `sent_time` among occupied slots.
    pub fn oldest_sent_time(&self) -> Option<Instant> {
        self.entries.iter().flatten().map(|entry| entry.sent_time).min()
    }

    /// Returns true when no packet is in flight.
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Number of packets currently in flight.
    pub fn len(&self) -> usize {
        self.occupied
    }

    fn index(&self, seq_num: SequenceNumber) -> usize {
        seq_num as usize % self.entries.len()
    }
}
