//! Echo server: dispatches every received payload back to its sender.
//!
//! Run it first, then point the client at it:
//! - cargo run -p acklink --example server -- 127.0.0.1:13999
//! - cargo run -p acklink --example client -- 127.0.0.1:13999

use std::{
    env,
    net::SocketAddr,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use acklink::{Connection, Packet, PacketDispatcher, SmartSocket, SocketStateLogger};

/// Collects payloads so the poll loop can echo them back.
struct EchoDispatcher {
    replies: Vec<(SocketAddr, Vec<u8>)>,
}

impl PacketDispatcher for EchoDispatcher {
    fn dispatch_packet(&mut self, connection: &Connection, packet: Packet) {
        let text = String::from_utf8_lossy(packet.payload());
        println!(
            "[packet] from={} seq={} payload=\"{}\"",
            connection.remote_address(),
            packet.header().seq_num,
            text
        );
        self.replies.push((connection.remote_address(), packet.payload().to_vec()));
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let listen_addr = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:13999".to_string());
    let mut socket = SmartSocket::bind(listen_addr.as_str())?;
    socket.add_observer(Arc::new(SocketStateLogger));
    println!("acklink server listening on {}", socket.local_addr()?);

    let mut dispatcher = EchoDispatcher { replies: Vec::new() };
    loop {
        socket.manual_poll(Instant::now());

        for peer in socket.peers() {
            let conn = socket.get_or_create_connection(peer);
            conn.dispatch_received_packets(&mut dispatcher);
        }

        // Echo with a small retry budget so a dropped reply gets another try.
        for (peer, payload) in dispatcher.replies.drain(..) {
            let conn = socket.get_or_create_connection(peer);
            conn.send(payload, 1);
        }

        thread::sleep(Duration::from_millis(5));
    }
}
