//! The socket demultiplexer: one UDP endpoint, many connections.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Mutex},
    thread::{sleep, yield_now},
    time::{Duration, Instant},
};

use crossbeam_channel::{unbounded, Receiver, Sender};
use socket2::Socket as Socket2;
use tracing::{error, warn};

use acklink_core::{
    config::Config,
    constants::PROTOCOL_ID,
    error::{ErrorKind, Result},
    transport::DatagramSocket,
};
use acklink_connection::{Connection, ConnectionState};
use acklink_protocol::Packet;

use crate::{
    handle::{ConnectionHandle, SendTask},
    observer::SocketStateObserver,
    time::{Clock, SystemClock},
};

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &UdpSocket, config: &Config) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if let Some(ttl) = config.socket_ttl {
        socket.set_ttl(ttl)?;
    }
    if config.socket_broadcast {
        socket.set_broadcast(true)?;
    }

    Ok(())
}

/// A bound UDP socket behind the transport abstraction.
#[derive(Debug)]
struct BoundUdpSocket {
    is_blocking_mode: bool,
    socket: UdpSocket,
}

impl BoundUdpSocket {
    fn new(socket: UdpSocket, is_blocking_mode: bool) -> Result<Self> {
        socket.set_nonblocking(!is_blocking_mode)?;
        Ok(BoundUdpSocket { is_blocking_mode, socket })
    }
}

impl DatagramSocket for BoundUdpSocket {
    fn send_to(&mut self, addr: &SocketAddr, datagram: &[u8]) -> io::Result<usize> {
        self.socket.send_to(datagram, addr)
    }

    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket.recv_from(buffer).map(move |(len, address)| (&buffer[..len], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.is_blocking_mode
    }
}

/// Owns the UDP endpoint and the connection registry, routes inbound
/// datagrams to the right connection, and fans lifecycle events out to
/// observers.
///
/// The thread calling `manual_poll`/`start_polling` is the executor: every
/// mutation of connection state happens there. Other threads interact only
/// through [`ConnectionHandle`]s, which post tasks.
pub struct SmartSocket {
    socket: Box<dyn DatagramSocket + Send>,
    config: Config,
    connections: HashMap<SocketAddr, Arc<Mutex<Connection>>>,
    observers: Vec<Arc<dyn SocketStateObserver>>,
    task_sender: Sender<SendTask>,
    task_receiver: Receiver<SendTask>,
    receive_buffer: Vec<u8>,
    clock: Arc<dyn Clock>,
    shut_down: bool,
}

impl std::fmt::Debug for SmartSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartSocket")
            .field("connections", &self.connections.len())
            .field("observers", &self.observers.len())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl SmartSocket {
    /// Binds to the specified address with default configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, Config::default())
    }

    /// Binds to any available port on localhost with default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(Config::default())
    }

    /// Binds to any available port on localhost with the given configuration.
    pub fn bind_any_with_config(config: Config) -> Result<Self> {
        let loopback = Ipv4Addr::new(127, 0, 0, 1);
        let address = SocketAddrV4::new(loopback, 0);
        let socket = UdpSocket::bind(address)?;
        Self::from_socket(socket, config, Arc::new(SystemClock))
    }

    /// Binds to the specified address with the given configuration.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        Self::from_socket(socket, config, Arc::new(SystemClock))
    }

    /// Wraps an already-bound socket with a custom clock, for tests that
    /// need to drive time by hand.
    pub fn from_socket(socket: UdpSocket, config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        apply_socket_options(&socket, &config)?;
        let socket = BoundUdpSocket::new(socket, config.blocking_mode)?;
        let (task_sender, task_receiver) = unbounded();
        Ok(SmartSocket {
            receive_buffer: vec![0; config.receive_buffer_max_size],
            socket: Box::new(socket),
            config,
            connections: HashMap::new(),
            observers: Vec::new(),
            task_sender,
            task_receiver,
            clock,
            shut_down: false,
        })
    }

    /// Returns the local endpoint this socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Registers an observer. Fan-out follows registration order.
    pub fn add_observer(&mut self, observer: Arc<dyn SocketStateObserver>) {
        self.observers.push(observer);
    }

    /// Looks up or creates the connection for `peer` and returns a shared
    /// handle to it.
    pub fn get_or_create_connection(&mut self, peer: SocketAddr) -> ConnectionHandle {
        let now = self.clock.now();
        let config = &self.config;
        let connection = self
            .connections
            .entry(peer)
            .or_insert_with(|| Arc::new(Mutex::new(Connection::new(peer, config, now))))
            .clone();
        ConnectionHandle::new(peer, connection, self.task_sender.clone())
    }

    /// Number of connections currently in the registry.
    pub fn connections_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of the endpoints currently in the registry.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.connections.keys().copied().collect()
    }

    /// Number of connections that have seen traffic in at least one
    /// direction.
    pub fn established_connections_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.lock().expect("connection mutex poisoned").is_established())
            .count()
    }

    /// Runs one poll iteration at `time`: drains the wire, processes queued
    /// sends, sweeps for lost packets and dead peers.
    pub fn manual_poll(&mut self, time: Instant) {
        if self.shut_down {
            return;
        }

        let mut pending: VecDeque<SendTask> = VecDeque::new();

        self.receive_datagrams(time, &mut pending);
        self.sweep_connections(time, &mut pending);
        while let Ok(task) = self.task_receiver.try_recv() {
            pending.push_back(task);
        }
        self.process_sends(time, pending);
        self.reap_dead_connections(time);
    }

    /// Polls in a loop with 1 ms pauses until the socket is shut down
    /// (blocking call).
    pub fn start_polling(&mut self) {
        self.start_polling_with_duration(Some(Duration::from_millis(1)))
    }

    /// Polls in a loop with a custom pause until the socket is shut down
    /// (blocking call).
    pub fn start_polling_with_duration(&mut self, sleep_duration: Option<Duration>) {
        while !self.shut_down {
            let now = self.clock.now();
            self.manual_poll(now);
            match sleep_duration {
                None => yield_now(),
                Some(duration) => sleep(duration),
            }
        }
    }

    /// Stops the executor: marks every connection dead, drops the registry
    /// and notifies observers. Posts still in flight are discarded.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for (_, connection) in self.connections.drain() {
            connection.lock().expect("connection mutex poisoned").mark_dead();
        }
        self.notify(|observer| observer.on_socket_shutdown());
    }

    fn handle_for(&self, connection: &Arc<Mutex<Connection>>, address: SocketAddr) -> ConnectionHandle {
        ConnectionHandle::new(address, connection.clone(), self.task_sender.clone())
    }

    /// Synchronous, ordered fan-out. A panicking observer is logged and the
    /// remaining observers still run.
    fn notify<F: Fn(&dyn SocketStateObserver)>(&self, f: F) {
        for observer in &self.observers {
            if catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))).is_err() {
                error!("observer panicked during notification");
            }
        }
    }

    fn receive_datagrams(&mut self, time: Instant, pending: &mut VecDeque<SendTask>) {
        loop {
            match self.socket.recv_from(self.receive_buffer.as_mut()) {
                Ok((datagram, address)) => {
                    let decoded = Packet::decode(datagram);
                    match decoded {
                        Err(ErrorKind::BadPacketSize(size)) => {
                            self.notify(|observer| observer.on_bad_packet_size(&address, size));
                        }
                        Err(err) => {
                            error!("dropping undecodable datagram from {}: {}", address, err);
                        }
                        Ok(packet) if packet.header().protocol != PROTOCOL_ID => {
                            warn!(
                                "dropping packet with unknown protocol tag {:#x} from {}",
                                packet.header().protocol,
                                address
                            );
                        }
                        Ok(packet) => {
                            self.route_packet(packet, address, time, pending);
                        }
                    }
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        error!("encountered an error receiving data: {:?}", e);
                    }
                    break;
                }
            }
            if self.socket.is_blocking_mode() {
                break;
            }
        }
    }

    fn route_packet(
        &mut self,
        packet: Packet,
        address: SocketAddr,
        time: Instant,
        pending: &mut VecDeque<SendTask>,
    ) {
        let config = &self.config;
        let connection = self
            .connections
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(Connection::new(address, config, time))))
            .clone();

        let outcome = connection
            .lock()
            .expect("connection mutex poisoned")
            .handle_receive(packet, time);

        for resend in outcome.resends {
            pending.push_back(SendTask {
                address,
                payload: resend.payload,
                resend_limit: resend.resend_limit,
            });
        }
        if outcome.just_established {
            let handle = self.handle_for(&connection, address);
            self.notify(|observer| observer.on_connect(&handle));
        }
    }

    /// Runs the age-based loss sweep on every connection so resends happen
    /// even while the peer is quiet.
    fn sweep_connections(&mut self, time: Instant, pending: &mut VecDeque<SendTask>) {
        for (address, connection) in &self.connections {
            let resends = connection
                .lock()
                .expect("connection mutex poisoned")
                .sweep_undelivered(time);
            for resend in resends {
                pending.push_back(SendTask {
                    address: *address,
                    payload: resend.payload,
                    resend_limit: resend.resend_limit,
                });
            }
        }
    }

    fn process_sends(&mut self, time: Instant, mut pending: VecDeque<SendTask>) {
        while let Some(task) = pending.pop_front() {
            let Some(connection) = self.connections.get(&task.address).cloned() else {
                // The connection was reaped; a posted send for it is dropped.
                continue;
            };

            let outcome = connection
                .lock()
                .expect("connection mutex poisoned")
                .process_send(task.payload, task.resend_limit, time);
            let Some(outcome) = outcome else {
                continue;
            };

            if let Some(displaced) = outcome.displaced {
                pending.push_back(SendTask {
                    address: task.address,
                    payload: displaced.payload,
                    resend_limit: displaced.resend_limit,
                });
            }

            if let Err(err) = self.socket.send_to(&task.address, &outcome.datagram) {
                let resend = connection
                    .lock()
                    .expect("connection mutex poisoned")
                    .handle_send_failure(outcome.seq_num);
                if let Some(resend) = resend {
                    pending.push_back(SendTask {
                        address: task.address,
                        payload: resend.payload,
                        resend_limit: resend.resend_limit,
                    });
                }
                let error = ErrorKind::IOError(err);
                let handle = self.handle_for(&connection, task.address);
                self.notify(|observer| observer.on_error(&handle, &error));
            }

            if outcome.just_established {
                let handle = self.handle_for(&connection, task.address);
                self.notify(|observer| observer.on_connect(&handle));
            }
        }
    }

    fn reap_dead_connections(&mut self, time: Instant) {
        let mut expired = Vec::new();
        for (address, connection) in &self.connections {
            let mut conn = connection.lock().expect("connection mutex poisoned");
            if conn.liveness_expired(time) {
                let was_active = conn.state() == ConnectionState::Active;
                conn.mark_dead();
                expired.push((*address, was_active));
            }
        }
        for (address, was_active) in expired {
            let Some(connection) = self.connections.remove(&address) else {
                continue;
            };
            if was_active {
                let handle = self.handle_for(&connection, address);
                self.notify(|observer| observer.on_peer_disconnect(&handle));
            }
        }
    }
}

impl Drop for SmartSocket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use acklink_connection::PacketDispatcher;

    use crate::time::ManualClock;

    use super::*;

    /// Observer that records every event it sees.
    #[derive(Default)]
    struct RecordingObserver {
        events: StdMutex<Vec<String>>,
    }

    impl RecordingObserver {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn push(&self, event: String) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl SocketStateObserver for RecordingObserver {
        fn on_connect(&self, connection: &ConnectionHandle) {
            self.push(format!("connect {}", connection.remote_address()));
        }

        fn on_peer_disconnect(&self, connection: &ConnectionHandle) {
            self.push(format!("disconnect {}", connection.remote_address()));
        }

        fn on_bad_packet_size(&self, _peer: &SocketAddr, size: usize) {
            self.push(format!("bad_size {}", size));
        }

        fn on_error(&self, _connection: &ConnectionHandle, _error: &ErrorKind) {
            self.push("error".to_string());
        }

        fn on_socket_shutdown(&self) {
            self.push("shutdown".to_string());
        }
    }

    struct CollectingDispatcher {
        payloads: Vec<Vec<u8>>,
    }

    impl PacketDispatcher for CollectingDispatcher {
        fn dispatch_packet(&mut self, _connection: &Connection, packet: Packet) {
            self.payloads.push(packet.payload().to_vec());
        }
    }

    fn poll_both(a: &mut SmartSocket, b: &mut SmartSocket, rounds: usize) {
        for _ in 0..rounds {
            let now = Instant::now();
            a.manual_poll(now);
            b.manual_poll(now);
            sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn binds_to_an_ephemeral_port() {
        let socket = SmartSocket::bind_any().unwrap();
        let addr = socket.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn undersized_and_oversized_datagrams_fire_bad_packet_size() {
        let observer = Arc::new(RecordingObserver::default());
        let mut socket = SmartSocket::bind_any().unwrap();
        socket.add_observer(observer.clone());
        let addr = socket.local_addr().unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        raw.send_to(&[0u8; 5], addr).unwrap();
        raw.send_to(&vec![0u8; 513], addr).unwrap();

        for _ in 0..20 {
            socket.manual_poll(Instant::now());
            if observer.events().len() >= 2 {
                break;
            }
            sleep(Duration::from_millis(2));
        }

        let events = observer.events();
        assert!(events.contains(&"bad_size 5".to_string()), "events: {:?}", events);
        assert!(events.contains(&"bad_size 513".to_string()), "events: {:?}", events);
        // Framing violations never touch the registry.
        assert_eq!(socket.connections_count(), 0);
    }

    #[test]
    fn datagrams_with_wrong_protocol_tag_are_dropped() {
        let mut socket = SmartSocket::bind_any().unwrap();
        let addr = socket.local_addr().unwrap();

        let raw = UdpSocket::bind("127.0.0.1:0").unwrap();
        // Valid size, bogus magic.
        raw.send_to(&[0xFFu8; 12], addr).unwrap();

        for _ in 0..10 {
            socket.manual_poll(Instant::now());
            sleep(Duration::from_millis(2));
        }
        assert_eq!(socket.connections_count(), 0);
    }

    #[test]
    fn two_peers_exchange_and_ack() {
        let observer_a = Arc::new(RecordingObserver::default());
        let observer_b = Arc::new(RecordingObserver::default());

        let mut a = SmartSocket::bind_any().unwrap();
        let mut b = SmartSocket::bind_any().unwrap();
        a.add_observer(observer_a.clone());
        b.add_observer(observer_b.clone());

        let b_addr = b.local_addr().unwrap();
        let conn_ab = a.get_or_create_connection(b_addr);

        // Fire-and-forget payload from A to B.
        conn_ab.send(vec![0x01], 0);
        poll_both(&mut a, &mut b, 10);

        assert_eq!(b.connections_count(), 1);
        let a_addr = a.local_addr().unwrap();
        let conn_ba = b.get_or_create_connection(a_addr);

        // B's packets are dispatched exactly once, in order, with seqnum 0.
        let mut dispatcher = CollectingDispatcher { payloads: Vec::new() };
        conn_ba.dispatch_received_packets(&mut dispatcher);
        assert_eq!(dispatcher.payloads, vec![vec![0x01]]);
        dispatcher.payloads.clear();
        conn_ba.dispatch_received_packets(&mut dispatcher);
        assert!(dispatcher.payloads.is_empty());

        // B replies; the reply carries an ack for A's seqnum 0.
        conn_ba.send(vec![0x02], 0);
        poll_both(&mut a, &mut b, 10);

        assert_eq!(conn_ab.stats().packets_acked, 1);
        assert!(conn_ab.is_established());
        assert!(conn_ba.is_established());
        assert_eq!(a.established_connections_count(), 1);
        assert!(observer_a.events().contains(&format!("connect {}", b_addr)));
        assert!(observer_b.events().contains(&format!("connect {}", a_addr)));
    }

    #[test]
    fn silent_peer_is_disconnected_and_reaped() {
        let observer = Arc::new(RecordingObserver::default());
        let clock = Arc::new(ManualClock::starting_at(Instant::now()));
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut a =
            SmartSocket::from_socket(udp, Config::default(), clock.clone()).unwrap();
        a.add_observer(observer.clone());

        let mut b = SmartSocket::bind_any().unwrap();
        let b_addr = b.local_addr().unwrap();
        let conn = a.get_or_create_connection(b_addr);

        // Activate the connection so the disconnect is observable.
        conn.send(vec![1], 0);
        let reply = b.get_or_create_connection(a.local_addr().unwrap());
        for _ in 0..10 {
            let now = clock.now();
            a.manual_poll(now);
            b.manual_poll(Instant::now());
            reply.send(vec![2], 0);
            b.manual_poll(Instant::now());
            sleep(Duration::from_millis(2));
            if conn.is_established() {
                break;
            }
        }
        assert!(conn.is_established());

        // Drain any replies still in flight while the clock is frozen so the
        // silence below is unambiguous.
        for _ in 0..5 {
            a.manual_poll(clock.now());
            sleep(Duration::from_millis(2));
        }

        // Then B goes silent past the 5s liveness floor.
        clock.advance(Duration::from_secs(6));
        a.manual_poll(clock.now());

        assert!(conn.is_dead());
        assert_eq!(a.connections_count(), 0);
        assert!(observer.events().contains(&format!("disconnect {}", b_addr)));
        // The handle still reads stats after the registry let go.
        assert!(conn.stats().packets_sent >= 1);
    }

    #[test]
    fn fresh_connection_is_reaped_without_notification() {
        let observer = Arc::new(RecordingObserver::default());
        let clock = Arc::new(ManualClock::starting_at(Instant::now()));
        let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut socket =
            SmartSocket::from_socket(udp, Config::default(), clock.clone()).unwrap();
        socket.add_observer(observer.clone());

        socket.get_or_create_connection("127.0.0.1:9".parse().unwrap());
        assert_eq!(socket.connections_count(), 1);

        clock.advance(Duration::from_secs(6));
        socket.manual_poll(clock.now());

        assert_eq!(socket.connections_count(), 0);
        assert!(observer.events().is_empty());
    }

    #[test]
    fn shutdown_notifies_once_and_kills_connections() {
        let observer = Arc::new(RecordingObserver::default());
        let mut socket = SmartSocket::bind_any().unwrap();
        socket.add_observer(observer.clone());
        let conn = socket.get_or_create_connection("127.0.0.1:9".parse().unwrap());

        socket.shutdown();
        socket.shutdown();

        assert!(conn.is_dead());
        assert_eq!(observer.events(), vec!["shutdown".to_string()]);

        // Posts after shutdown are dropped, not executed.
        conn.send(vec![1], 0);
        socket.manual_poll(Instant::now());
        assert_eq!(conn.stats().packets_sent, 0);
    }

    #[test]
    fn panicking_observer_does_not_stop_fan_out() {
        struct PanickyObserver;
        impl SocketStateObserver for PanickyObserver {
            fn on_socket_shutdown(&self) {
                panic!("observer bug");
            }
        }

        let recording = Arc::new(RecordingObserver::default());
        let mut socket = SmartSocket::bind_any().unwrap();
        socket.add_observer(Arc::new(PanickyObserver));
        socket.add_observer(recording.clone());

        socket.shutdown();
        assert_eq!(recording.events(), vec!["shutdown".to_string()]);
    }
}

