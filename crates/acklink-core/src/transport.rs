//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram socket abstraction.
///
/// The demultiplexer is written against this trait so alternative substrates
/// (a real UDP socket, a loss-injecting emulator in tests) can be plugged in
/// without coupling to a concrete implementation.
pub trait DatagramSocket {
    /// Sends a single datagram to the given endpoint.
    fn send_to(&mut self, addr: &SocketAddr, datagram: &[u8]) -> Result<usize>;

    /// Receives a single datagram, returning the filled prefix of `buffer`
    /// and the sender's endpoint.
    fn recv_from<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the local endpoint this socket is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether the socket operates in blocking or non-blocking mode.
    fn is_blocking_mode(&self) -> bool;
}
