//! Client that ticks payloads at a server until the connection dies.
//!
//! Run the server first:
//! - cargo run -p acklink --example server -- 127.0.0.1:13999
//!
//! Then run the client:
//! - cargo run -p acklink --example client -- 127.0.0.1:13999
//! - cargo run -p acklink --example client -- localhost:13999 20 100
//!   (20 ticks, 100ms apart)

use std::{
    env,
    net::ToSocketAddrs,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use acklink::{Connection, Packet, PacketDispatcher, SmartSocket, SocketStateLogger};

struct PrintingDispatcher;

impl PacketDispatcher for PrintingDispatcher {
    fn dispatch_packet(&mut self, connection: &Connection, packet: Packet) {
        let text = String::from_utf8_lossy(packet.payload());
        println!(
            "[reply] from={} seq={} payload=\"{}\"",
            connection.remote_address(),
            packet.header().seq_num,
            text
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    // Args: <server_addr> [ticks] [interval_ms]
    let mut args = env::args().skip(1);
    let server = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:13999".to_string())
        .to_socket_addrs()?
        .next()
        .ok_or("could not resolve server address")?;
    let ticks: usize = args.next().unwrap_or_else(|| "10".into()).parse().unwrap_or(10);
    let interval_ms: u64 = args.next().unwrap_or_else(|| "50".into()).parse().unwrap_or(50);

    let mut socket = SmartSocket::bind_any()?;
    socket.add_observer(Arc::new(SocketStateLogger));
    println!("acklink client bound to {} -> {}", socket.local_addr()?, server);

    let conn = socket.get_or_create_connection(server);
    let mut dispatcher = PrintingDispatcher;

    for tick in 0..ticks {
        if conn.is_dead() {
            println!("connection died, stopping");
            break;
        }

        let msg = format!("tick {}", tick);
        conn.send(msg.into_bytes(), 2);

        let deadline = Instant::now() + Duration::from_millis(interval_ms);
        while Instant::now() < deadline {
            socket.manual_poll(Instant::now());
            conn.dispatch_received_packets(&mut dispatcher);
            thread::sleep(Duration::from_millis(5));
        }
    }

    let stats = conn.stats();
    println!(
        "done: sent {} packets, {} confirmed, {} received, average RTT {:?}",
        stats.packets_sent,
        stats.packets_acked,
        stats.packets_received,
        conn.average_rtt()
    );
    Ok(())
}
