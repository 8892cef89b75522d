#![warn(missing_docs)]

//! acklink-host: the socket demultiplexer and poll loop.
//!
//! [`SmartSocket`] owns one UDP endpoint and the registry of per-peer
//! connections. Inbound datagrams are validated, decoded and routed to the
//! right [`acklink_connection::Connection`]; outbound payloads are posted
//! from any thread through a [`ConnectionHandle`] and go out on the poll
//! thread. Lifecycle events fan out to registered
//! [`SocketStateObserver`]s.

/// Shared application-facing connection handles.
pub mod handle;
/// Lifecycle observation.
pub mod observer;
/// The socket demultiplexer.
pub mod socket;
/// Time sources for the poll loop.
pub mod time;

pub use handle::ConnectionHandle;
pub use observer::{SocketStateLogger, SocketStateObserver};
pub use socket::SmartSocket;
pub use time::{Clock, ManualClock, SystemClock};
