use std::{
    fmt::{self, Display, Formatter},
    io,
};

/// Wrapper for all errors that can occur in this library.
#[derive(Debug)]
pub enum ErrorKind {
    /// A datagram was shorter than the packet header or longer than the
    /// maximum packet size. Carries the offending length.
    BadPacketSize(usize),
    /// The packet header could not be decoded.
    CouldNotReadHeader(String),
    /// Wrapper around a `std::io::Error` from the socket.
    IOError(io::Error),
}

impl Display for ErrorKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::BadPacketSize(size) => {
                write!(fmt, "Datagram size {} is outside the valid packet range.", size)
            }
            ErrorKind::CouldNotReadHeader(header) => {
                write!(fmt, "Could not read the {} header.", header)
            }
            ErrorKind::IOError(e) => write!(fmt, "An IO error occurred: {}", e),
        }
    }
}

impl std::error::Error for ErrorKind {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ErrorKind::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(inner: io::Error) -> Self {
        ErrorKind::IOError(inner)
    }
}

/// Convenience result alias used throughout the library.
pub type Result<T> = std::result::Result<T, ErrorKind>;
