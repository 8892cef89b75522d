//! Integration tests for the acklink-connection crate.
//!
//! Two `Connection` instances play both ends of a link: datagrams produced
//! by one side's send path are decoded and fed to the other side's receive
//! path, with the test deciding which ones the "network" delivers.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use acklink_connection::{Connection, PacketDispatcher, Resend, SendOutcome};
use acklink_core::config::Config;
use acklink_protocol::Packet;

fn fake_addr() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn new_connection(time: Instant) -> Connection {
    Connection::new(fake_addr(), &Config::default(), time)
}

fn payload(byte: u8) -> Arc<[u8]> {
    Arc::from(vec![byte].into_boxed_slice())
}

/// Decodes a send outcome back into the packet the peer would see.
fn wire(outcome: &SendOutcome) -> Packet {
    Packet::decode(&outcome.datagram).unwrap()
}

struct CollectingDispatcher {
    seen: Vec<(u16, Vec<u8>)>,
}

impl CollectingDispatcher {
    fn new() -> Self {
        Self { seen: Vec::new() }
    }
}

impl PacketDispatcher for CollectingDispatcher {
    fn dispatch_packet(&mut self, _connection: &Connection, packet: Packet) {
        self.seen.push((packet.header().seq_num, packet.payload().to_vec()));
    }
}

#[test]
fn round_trip_delivers_once_and_acks() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);
    let mut b = new_connection(t0);

    // A -> B, fire-and-forget.
    let out = a.process_send(payload(0x01), 0, t0).unwrap();
    assert_eq!(out.seq_num, 0);
    b.handle_receive(wire(&out), t0 + Duration::from_millis(10));

    let mut dispatcher = CollectingDispatcher::new();
    b.dispatch_received_packets(&mut dispatcher);
    assert_eq!(dispatcher.seen, vec![(0, vec![0x01])]);

    // Draining again delivers nothing.
    let mut dispatcher = CollectingDispatcher::new();
    b.dispatch_received_packets(&mut dispatcher);
    assert!(dispatcher.seen.is_empty());

    // The next B -> A packet carries the ack.
    let reply = b.process_send(payload(0x02), 0, t0 + Duration::from_millis(20)).unwrap();
    a.handle_receive(wire(&reply), t0 + Duration::from_millis(30));
    assert_eq!(a.stats().packets_acked, 1);
    assert_eq!(a.packets_in_flight(), 0);
}

#[test]
fn selective_ack_releases_only_covered_seqnums() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);
    let mut b = new_connection(t0);

    // A sends seqnums 0..4; the network only delivers 0, 2 and 4.
    let outs: Vec<SendOutcome> =
        (0..5u8).map(|i| a.process_send(payload(i), 0, t0).unwrap()).collect();
    for i in [0usize, 2, 4] {
        b.handle_receive(wire(&outs[i]), t0 + Duration::from_millis(5));
    }

    // B's reply acks exactly what it saw: latest 4 plus bits for 2 and 0.
    let reply = b.process_send(payload(0xFF), 0, t0 + Duration::from_millis(10)).unwrap();
    assert_eq!(wire(&reply).header().ack, 4);
    assert_eq!(wire(&reply).header().ack_bits, 0b1010);

    a.handle_receive(wire(&reply), t0 + Duration::from_millis(15));
    assert_eq!(a.stats().packets_acked, 3);
    assert_eq!(a.packets_in_flight(), 2);
    assert!(a.is_in_flight(1));
    assert!(a.is_in_flight(3));
}

#[test]
fn lost_packet_is_retried_after_timeout_with_decremented_budget() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);

    // The network drops the packet; nothing acks it.
    a.process_send(payload(7), 2, t0).unwrap();

    // 2.1s later the sweep gives up on it and hands back a retry.
    let mut resends = a.sweep_undelivered(t0 + Duration::from_millis(2100));
    assert_eq!(resends.len(), 1);
    let retry = resends.pop().unwrap();
    assert_eq!(retry.resend_limit, 1);
    assert_eq!(a.packets_in_flight(), 0);

    // The retry goes out under a fresh sequence number.
    let out = a
        .process_send(retry.payload, retry.resend_limit, t0 + Duration::from_millis(2100))
        .unwrap();
    assert_eq!(out.seq_num, 1);
    assert_eq!(wire(&out).payload(), &[7]);
    assert_eq!(a.stats().packets_sent, 2);
}

#[test]
fn capacity_displacement_drops_budgetless_packet_silently() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);

    // Fill the 256-slot ring, then one more: seqnum 256 lands on slot 0.
    for i in 0..=256u16 {
        let out = a.process_send(payload(i as u8), 0, t0).unwrap();
        let displaced: Option<Resend> = out.displaced;
        if i < 256 {
            assert!(displaced.is_none());
        } else {
            // Budget 0: the displaced packet is gone for good.
            assert!(displaced.is_none());
            assert_eq!(a.stats().packets_lost, 1);
        }
    }

    assert!(!a.is_in_flight(0));
    assert!(a.is_in_flight(256));
    assert_eq!(a.stats().packets_sent, 257);
}

#[test]
fn capacity_displacement_requeues_packet_with_budget() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);

    let first = a.process_send(payload(0xAA), 3, t0).unwrap();
    assert_eq!(first.seq_num, 0);
    for i in 1..256u16 {
        a.process_send(payload(i as u8), 0, t0).unwrap();
    }

    let out = a.process_send(payload(0xBB), 0, t0).unwrap();
    let displaced = out.displaced.expect("seqnum 0 must be displaced");
    assert_eq!(displaced.payload.as_ref(), &[0xAA]);
    assert_eq!(displaced.resend_limit, 2);
}

#[test]
fn duplicate_reception_dispatches_once() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);
    let mut b = new_connection(t0);

    // Seqnum 7 after a few warmup packets; the network duplicates it.
    for i in 0..7u8 {
        let out = a.process_send(payload(i), 0, t0).unwrap();
        b.handle_receive(wire(&out), t0);
    }
    let out = a.process_send(payload(77), 0, t0).unwrap();
    b.handle_receive(wire(&out), t0);
    b.handle_receive(wire(&out), t0);

    let mut dispatcher = CollectingDispatcher::new();
    b.dispatch_received_packets(&mut dispatcher);
    let sevens: Vec<_> = dispatcher.seen.iter().filter(|(seq, _)| *seq == 7).collect();
    assert_eq!(sevens.len(), 1);
    assert_eq!(b.stats().packets_received, 9);
}

#[test]
fn acks_release_packets_across_seqnum_wrap() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);
    let mut b = new_connection(t0);

    // Drive A's sequence numbering up to 65534.
    for _ in 0..65534u32 {
        a.process_send(payload(0), 0, t0).unwrap();
    }

    // The four packets straddling the wrap reach B.
    let mut sent = Vec::new();
    for byte in 0..4u8 {
        let out = a.process_send(payload(byte), 0, t0).unwrap();
        sent.push(out.seq_num);
        b.handle_receive(wire(&out), t0 + Duration::from_millis(1));
    }
    assert_eq!(sent, vec![65534, 65535, 0, 1]);

    // B's reply acks all four: latest 1, bits covering 0, 65535, 65534.
    let reply = b.process_send(payload(0xFF), 0, t0 + Duration::from_millis(2)).unwrap();
    assert_eq!(wire(&reply).header().ack, 1);
    assert_eq!(wire(&reply).header().ack_bits, 0b0111);

    let acked_before = a.stats().packets_acked;
    a.handle_receive(wire(&reply), t0 + Duration::from_millis(3));
    assert_eq!(a.stats().packets_acked - acked_before, 4);
    for seq in sent {
        assert!(!a.is_in_flight(seq));
    }
}

#[test]
fn average_rtt_stays_within_observed_bounds() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);
    let mut b = new_connection(t0);

    // Round trips alternate between 40ms and 200ms; the average must never
    // leave that band (it starts at 50ms, inside it).
    let mut now = t0;
    for i in 0..50u32 {
        let out = a.process_send(payload(0), 0, now).unwrap();
        let rtt = if i % 2 == 0 { Duration::from_millis(40) } else { Duration::from_millis(200) };
        now += rtt;
        b.handle_receive(wire(&out), now);
        let reply = b.process_send(payload(1), 0, now).unwrap();
        a.handle_receive(wire(&reply), now);

        let average = a.average_rtt();
        assert!(
            average >= Duration::from_millis(40) && average <= Duration::from_millis(200),
            "average {:?} left the observed band after {} samples",
            average,
            i + 1
        );
    }
}

#[test]
fn resend_budget_bounds_total_attempts() {
    let t0 = Instant::now();
    let mut a = new_connection(t0);

    // Budget 3: the packet goes out at most 4 times in total.
    let mut pending = Some((payload(9), 3u32));
    let mut attempts = 0;
    let mut now = t0;
    while let Some((bytes, limit)) = pending.take() {
        a.process_send(bytes, limit, now).unwrap();
        attempts += 1;
        now += Duration::from_millis(2100);
        let mut resends = a.sweep_undelivered(now);
        assert!(resends.len() <= 1);
        pending = resends.pop().map(|r| (r.payload, r.resend_limit));
    }

    assert_eq!(attempts, 4);
    assert_eq!(a.stats().packets_sent, 4);
    assert_eq!(a.stats().packets_lost, 1);
}
