//! The per-peer connection state machine.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use acklink_core::config::Config;
use acklink_protocol::{
    sequence::{sequence_less_than, SequenceNumber},
    AckField, Packet, RecvBuffer, SentBuffer,
};

use crate::{dispatcher::PacketDispatcher, statistics::ConnectionStats};

/// Round-trip estimate a connection starts from before any measurement.
const INITIAL_RTT_MS: u32 = 50;

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created in the registry, no traffic in either direction yet.
    Fresh,
    /// At least one send or receive has happened.
    Active,
    /// Terminal: the peer went silent or the socket shut down.
    Dead,
}

/// A payload scheduled to go out again after loss or displacement, with its
/// remaining resend budget.
#[derive(Debug)]
pub struct Resend {
    /// The payload bytes, shared with the original send.
    pub payload: Arc<[u8]>,
    /// Remaining budget, already decremented for this attempt.
    pub resend_limit: u32,
}

/// What a send produced: the datagram to put on the wire plus any follow-up
/// work for the caller.
#[derive(Debug)]
pub struct SendOutcome {
    /// Sequence number assigned to the outgoing packet.
    pub seq_num: SequenceNumber,
    /// The encoded datagram.
    pub datagram: Vec<u8>,
    /// A packet displaced from the in-flight ring that still has budget and
    /// must be re-enqueued.
    pub displaced: Option<Resend>,
    /// True when this send was the connection's first traffic, taking it
    /// out of `Fresh`.
    pub just_established: bool,
}

/// What a receive produced.
#[derive(Debug, Default)]
pub struct ReceiveOutcome {
    /// True when this receive was the connection's first traffic, taking it
    /// out of `Fresh`.
    pub just_established: bool,
    /// Packets the loss sweep decided to retry.
    pub resends: Vec<Resend>,
}

/// Per-peer state: sequence assignment, in-flight tracking, selective acks,
/// RTT estimation and liveness.
///
/// All mutating methods are intended to run on the socket's poll thread; the
/// host serializes access with a per-connection lock.
#[derive(Debug)]
pub struct Connection {
    remote_address: SocketAddr,
    local_ack: AckField,
    sent: SentBuffer,
    recv: RecvBuffer,
    average_rtt_ms: u32,
    last_recv_time: Instant,
    last_remote_ack: Option<SequenceNumber>,
    is_active: bool,
    is_dead: bool,
    stats: ConnectionStats,
    packet_timeout: Duration,
    loss_seq_window: u16,
    idle_timeout: Duration,
    liveness_rtt_factor: u32,
}

impl Connection {
    /// Creates a fresh connection for `remote_address`.
    pub fn new(remote_address: SocketAddr, config: &Config, time: Instant) -> Self {
        Self {
            remote_address,
            local_ack: AckField::new(),
            sent: SentBuffer::with_capacity(config.sent_buffer_capacity),
            recv: RecvBuffer::with_capacity(config.recv_buffer_capacity),
            average_rtt_ms: INITIAL_RTT_MS,
            last_recv_time: time,
            last_remote_ack: None,
            is_active: false,
            is_dead: false,
            stats: ConnectionStats::default(),
            packet_timeout: config.packet_timeout,
            loss_seq_window: config.sent_buffer_capacity,
            idle_timeout: config.idle_connection_timeout,
            liveness_rtt_factor: config.liveness_rtt_factor,
        }
    }

    /// The peer this connection talks to.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// True once the connection has been marked dead.
    pub fn is_dead(&self) -> bool {
        self.is_dead
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        if self.is_dead {
            ConnectionState::Dead
        } else if self.is_active {
            ConnectionState::Active
        } else {
            ConnectionState::Fresh
        }
    }

    /// True once the connection has left `Fresh`: traffic has flowed in at
    /// least one direction.
    pub fn is_established(&self) -> bool {
        self.is_active
    }

    /// Marks the connection dead. Terminal.
    pub fn mark_dead(&mut self) {
        self.is_dead = true;
    }

    /// Smoothed round-trip estimate.
    pub fn average_rtt(&self) -> Duration {
        Duration::from_millis(u64::from(self.average_rtt_ms))
    }

    /// Snapshot of the traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats.clone()
    }

    /// Number of sent packets awaiting acknowledgement.
    pub fn packets_in_flight(&self) -> usize {
        self.sent.len()
    }

    /// True when `seq_num` is still awaiting acknowledgement.
    pub fn is_in_flight(&self, seq_num: SequenceNumber) -> bool {
        self.sent.contains(seq_num)
    }

    /// Stamps, stores and encodes an outgoing payload.
    ///
    /// Returns `None` when the connection is dead; the send is silently
    /// discarded in that case. A displaced in-flight packet with remaining
    /// budget is handed back for re-enqueueing under a fresh seqnum.
    pub fn process_send(
        &mut self,
        payload: Arc<[u8]>,
        resend_limit: u32,
        now: Instant,
    ) -> Option<SendOutcome> {
        if self.is_dead {
            return None;
        }

        let (seq_num, evicted) = self.sent.store(payload, resend_limit, &self.local_ack, now);
        let displaced = evicted.and_then(|old| {
            warn!("send buffer is full on connection with {}", self.remote_address);
            self.budgeted_resend(old.packet.payload_arc(), old.resend_limit)
        });

        let datagram = match self.sent.get(seq_num) {
            Some(entry) => entry.packet.encode(),
            // store() just wrote this slot; only a zero-capacity buffer
            // could leave it empty.
            None => return None,
        };

        debug!("sending packet {} to {}", seq_num, self.remote_address);
        self.stats.packets_sent += 1;
        let just_established = self.record_activity();
        Some(SendOutcome { seq_num, datagram, displaced, just_established })
    }

    /// Ingests a validated inbound packet: records it in the local ack
    /// state, confirms what the peer acked, sweeps for losses, and queues
    /// the packet for dispatch.
    pub fn handle_receive(&mut self, packet: Packet, now: Instant) -> ReceiveOutcome {
        self.last_recv_time = now;
        self.stats.packets_received += 1;

        let header = *packet.header();
        self.local_ack.update_for_seq_num(header.seq_num);

        let peer_ack = AckField::from_wire(header.ack, header.ack_bits);
        let resends = self.process_peer_acks(&peer_ack, now);
        self.last_remote_ack = Some(header.ack);

        match self.recv.insert(header.seq_num, packet) {
            Some(old) if old.header().seq_num == header.seq_num => {
                debug!("received packet {} duplicate from {}", header.seq_num, self.remote_address);
            }
            Some(old) => {
                warn!(
                    "recv buffer full on connection with {}, discarding packet {}",
                    self.remote_address,
                    old.header().seq_num
                );
            }
            None => {}
        }

        ReceiveOutcome { just_established: self.record_activity(), resends }
    }

    /// Gives up on a packet whose substrate send failed. Returns the resend
    /// to enqueue when the packet still has budget.
    pub fn handle_send_failure(&mut self, seq_num: SequenceNumber) -> Option<Resend> {
        self.remove_undelivered(seq_num)
    }

    /// Age-based loss sweep driven from the poll loop, so losses are
    /// detected even when the peer has gone quiet.
    pub fn sweep_undelivered(&mut self, now: Instant) -> Vec<Resend> {
        self.sweep(self.last_remote_ack, now)
    }

    /// True when the peer has been silent past the liveness threshold.
    pub fn liveness_expired(&self, now: Instant) -> bool {
        if self.is_dead {
            return false;
        }
        let scaled =
            Duration::from_millis(u64::from(self.liveness_rtt_factor) * u64::from(self.average_rtt_ms));
        let threshold = self.idle_timeout.max(scaled);
        now.saturating_duration_since(self.last_recv_time) > threshold
    }

    /// Drains the receive buffer in circular-seqnum order, invoking the
    /// dispatcher once per packet.
    pub fn dispatch_received_packets(&mut self, dispatcher: &mut dyn PacketDispatcher) {
        while let Some(packet) = self.recv.remove_oldest() {
            dispatcher.dispatch_packet(self, packet);
        }
    }

    /// Confirms every seqnum the peer's ack field covers, then sweeps the
    /// in-flight ring for packets fallen out of the ack window.
    fn process_peer_acks(&mut self, peer_ack: &AckField, now: Instant) -> Vec<Resend> {
        let mut confirmed = Vec::new();
        peer_ack.for_each_acked_seq_num(|seq_num| confirmed.push(seq_num));
        for seq_num in confirmed {
            self.confirm_packet_delivery(seq_num, now);
        }
        self.sweep(Some(peer_ack.latest_seq_num()), now)
    }

    /// Releases a confirmed packet and folds its round trip into the
    /// average.
    fn confirm_packet_delivery(&mut self, seq_num: SequenceNumber, now: Instant) {
        if let Some(entry) = self.sent.release(seq_num) {
            let observed = now.saturating_duration_since(entry.sent_time);
            // A measurement older than the packet timeout says nothing about
            // the current path; the entry would have been evicted anyway.
            if observed <= self.packet_timeout {
                let observed_ms = observed.as_millis() as u32;
                self.average_rtt_ms = (9 * self.average_rtt_ms + observed_ms) / 10;
            }
            debug!(
                "acknowledged packet {} for peer {}, RTT {}ms, average {}ms",
                seq_num,
                self.remote_address,
                observed.as_millis(),
                self.average_rtt_ms
            );
            self.stats.packets_acked += 1;
        }
    }

    /// Treats the oldest in-flight packets as undelivered while they sit
    /// more than a full ring behind the peer's latest ack or past the age
    /// limit.
    fn sweep(&mut self, peer_latest: Option<SequenceNumber>, now: Instant) -> Vec<Resend> {
        let min_seq = peer_latest.map(|latest| latest.wrapping_sub(self.loss_seq_window));
        let mut resends = Vec::new();
        while let (Some(oldest_seq), Some(oldest_time)) =
            (self.sent.oldest_seq_num(), self.sent.oldest_sent_time())
        {
            let behind_window = min_seq.map_or(false, |min| sequence_less_than(oldest_seq, min));
            let timed_out = now.saturating_duration_since(oldest_time) > self.packet_timeout;
            if !behind_window && !timed_out {
                break;
            }
            if let Some(resend) = self.remove_undelivered(oldest_seq) {
                resends.push(resend);
            }
        }
        resends
    }

    /// Releases an undelivered packet; hands it back for another attempt
    /// when budget remains, otherwise counts it as lost.
    fn remove_undelivered(&mut self, seq_num: SequenceNumber) -> Option<Resend> {
        let entry = self.sent.release(seq_num)?;
        self.budgeted_resend(entry.packet.payload_arc(), entry.resend_limit)
    }

    fn budgeted_resend(&mut self, payload: Arc<[u8]>, resend_limit: u32) -> Option<Resend> {
        if resend_limit > 0 {
            Some(Resend { payload, resend_limit: resend_limit - 1 })
        } else {
            self.stats.packets_lost += 1;
            None
        }
    }

    /// Flips the connection active; true exactly once, on the
    /// `Fresh` to `Active` transition.
    fn record_activity(&mut self) -> bool {
        let was_active = self.is_active;
        self.is_active = true;
        !was_active
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        debug!(
            "stats for {}: sent {} packets, confirmed {} of them, received {} packets, latest RTT {}ms",
            self.remote_address,
            self.stats.packets_sent,
            self.stats.packets_acked,
            self.stats.packets_received,
            self.average_rtt_ms
        );
    }
}
