//! TCP Port
//!
//! Implements a `RawPort` for a TCP stream, and an MIO event source.
//! Useful for serial-over-network bridges which expose the raw byte
//! stream of a device on a TCP socket.

use super::{iobuf::IOBuf, RawPort, RecvError, SendError};
use mio::net::TcpStream;
use std::io;
use std::io::Write;
use std::net::SocketAddr;

/// RawPort to communicate via TCP
pub struct Port {
    /// Underlying stream
    stream: TcpStream,
    /// Incoming buffer.
    rxbuf: IOBuf,
    /// Outgoing buffer, used when the TCP buffer fills up.
    txbuf: IOBuf,
}

impl Port {
    /// Takes ownership of a MIO `TcpStream` and constructs a `Port` over it.
    pub fn from_stream(stream: TcpStream) -> Port {
        Port {
            stream,
            rxbuf: IOBuf::new(),
            txbuf: IOBuf::new(),
        }
    }

    /// Returns a new `tcp::Port` for communication with the given `address`.
    pub fn new(address: &SocketAddr) -> Result<Port, io::Error> {
        let stream = TcpStream::connect(*address)?;
        Ok(Port::from_stream(stream))
    }
}

impl RawPort for Port {
    fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
        match self.rxbuf.refill(&mut self.stream) {
            Ok(_) => Ok(self.rxbuf.take()),
            // Readable before the nonblocking connect finished.
            Err(RecvError::IO(e)) if e.kind() == io::ErrorKind::NotConnected => {
                Err(RecvError::NotReady)
            }
            Err(e) => Err(e),
        }
    }

    fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.has_data_to_drain() {
            return Err(SendError::Full);
        }

        match self.stream.write(data) {
            Ok(size) if size == data.len() => Ok(()),
            Ok(size) => {
                self.txbuf.add_data(&data[size..]);
                Err(SendError::MustDrain)
            }
            Err(err) => match err.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::NotConnected => {
                    // These errors can occur when data is sent right after the
                    // nonblocking connection is initiated and before the handshake
                    // completes, or with the TCP buffer completely full.
                    self.txbuf.add_data(data);
                    Err(SendError::MustDrain)
                }
                _ => Err(SendError::IO(err)),
            },
        }
    }

    fn drain(&mut self) -> Result<(), SendError> {
        self.txbuf.drain(&mut self.stream)
    }

    fn has_data_to_drain(&self) -> bool {
        !self.txbuf.empty()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.rxbuf.flush();
        Ok(())
    }
}

impl mio::event::Source for Port {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.stream.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.stream.deregister(registry)
    }
}
