//! Abstract port
//!
//! The `Port` object provides a few things:
//! - Abstracting across the specific `RawPort`s (serial devices and
//!   TCP streams), so channels only ever see a stream of bytes.
//! - Connecting the ports to external code via an owned-callback
//!   interface, which bridges the `mio` world of the low level
//!   ports with whatever the caller uses (usually a `ChannelBuffer`).
//! - Automating some basic port operations: polling, send queues,
//!   as-needed port draining, discarding pending input and the
//!   startup holdoff of freshly opened serial ports.
//!
//! Note: `Port` sets up a dedicated thread to perform the above.
//! Dropping the `Port` stops that thread and closes the device.

mod iobuf;
mod serial;
mod tcp;

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Possible errors when receiving from a `Port`
#[derive(Debug)]
pub enum RecvError {
    /// No data available at this time.
    NotReady,
    /// This port got disconnected.
    Disconnected,
    /// Low level IO error.
    IO(io::Error),
}

/// Possible errors when sending to a `Port`
#[derive(Debug)]
pub enum SendError {
    /// Data was written partially and the rest must be drained first.
    /// This should never be returned by a `Port`, only by the internal `RawPort`.
    MustDrain,
    /// The port outgoing queue is full.
    Full,
    /// This port is not connected.
    Disconnected,
    /// Issue with the underlying IO operation.
    IO(io::Error),
}

impl From<SendError> for io::Error {
    fn from(err: SendError) -> io::Error {
        match err {
            SendError::IO(e) => e,
            SendError::Disconnected => io::Error::from(io::ErrorKind::NotConnected),
            SendError::Full | SendError::MustDrain => io::Error::from(io::ErrorKind::WouldBlock),
        }
    }
}

/// Generic interface for the low level part of a port.
trait RawPort {
    /// Returns whatever bytes are available without blocking, or RecvError::NotReady
    /// if there are none. For `Disconnected` the port should be torn down.
    fn recv(&mut self) -> Result<Vec<u8>, RecvError>;

    /// Attempts to send data. If it returned MustDrain, the data was sent partially and
    /// the rest must be drained via drain(). If it returned Full, a previous send is still
    /// waiting to be drained.
    fn send(&mut self, data: &[u8]) -> Result<(), SendError>;

    /// Drain partially written data.
    fn drain(&mut self) -> Result<(), SendError> {
        Ok(())
    }

    /// Returns whether this port has data to drain before more can be sent.
    fn has_data_to_drain(&self) -> bool {
        false
    }

    /// Throw away anything received by the device but not yet read.
    fn discard_input(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Users of this port should discard anything received before this method
    /// returns false. Once it returns false it will always return false afterwards.
    fn startup_holdoff(&self) -> bool {
        false
    }
}

/// In special cases where the default that gets picked when resolving an IP address
/// does not work, this allows to force using either IPv4 or IPv6.
enum AddrFamilyRestrict {
    V4,
    V6,
    Either,
}

/// Resolve a fully specified socket address with address family restrictions.
fn find_addr(addr: &str, family: AddrFamilyRestrict) -> Result<SocketAddr, io::Error> {
    for sa in addr.to_socket_addrs()? {
        match (&sa, &family) {
            (SocketAddr::V4(_), AddrFamilyRestrict::V6) => continue,
            (SocketAddr::V6(_), AddrFamilyRestrict::V4) => continue,
            _ => return Ok(sa),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "address resolution failed",
    ))
}

/// The communication to the `Port` thread occurs over a single
/// channel. This enum is used to multiplex data and control messages.
enum DataOrControl {
    Data(Vec<u8>),
    DiscardInput,
}

const WAKER_TOKEN: mio::Token = mio::Token(0);
const RAW_PORT_TOKEN: mio::Token = mio::Token(1);

/// How often to re-check the startup holdoff while it is active.
static HOLDOFF_POLL: Duration = Duration::from_millis(10);

/// Opaque abstract port object, encapsulating I/O with an underlying
/// `RawPort` as well as automating all the requirements from the
/// RawPort interface.
pub struct Port {
    tx: Option<crossbeam::channel::Sender<DataOrControl>>,
    waker: mio::Waker,
}

impl Port {
    /// Method running the `Port` thread event loop. It bridges `mio` and
    /// the rx callback, and it takes care of tx buffering/draining and
    /// startup holdoff logic.
    fn poller_thread<
        RawPortT: RawPort + mio::event::Source,
        RxCallbackT: Fn(Result<Vec<u8>, RecvError>) -> io::Result<()>,
    >(
        mut raw_port: RawPortT,
        mut poll: mio::Poll,
        rx: RxCallbackT,
        tx: crossbeam::channel::Receiver<DataOrControl>,
    ) {
        use crossbeam::channel::TryRecvError;

        let mut events = mio::Events::with_capacity(4);
        let mut needs_draining = false;

        // This gets set in cases where we ignore the tx queue while draining.
        let mut needs_tx_queue_check = false;

        if let Err(err) =
            poll.registry()
                .register(&mut raw_port, RAW_PORT_TOKEN, mio::Interest::READABLE)
        {
            let _ = rx(Err(RecvError::IO(err)));
            return;
        }

        let mut startup = raw_port.startup_holdoff();

        'ioloop: loop {
            let timeout = if startup { Some(HOLDOFF_POLL) } else { None };
            if let Err(err) = poll.poll(&mut events, timeout) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                let _ = rx(Err(RecvError::IO(err)));
                break 'ioloop;
            }

            if startup {
                startup = raw_port.startup_holdoff();
            }

            let mut check_tx_channel = false;

            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {
                        // Data or control was queued, or the queue was closed.
                        if needs_draining {
                            needs_tx_queue_check = true;
                        } else {
                            check_tx_channel = true;
                        }
                    }
                    RAW_PORT_TOKEN => {
                        if event.is_writable() && needs_draining {
                            match raw_port.drain() {
                                Ok(_) => {
                                    needs_draining = false;
                                    if poll
                                        .registry()
                                        .reregister(
                                            &mut raw_port,
                                            RAW_PORT_TOKEN,
                                            mio::Interest::READABLE,
                                        )
                                        .is_err()
                                    {
                                        break 'ioloop;
                                    }
                                }
                                Err(SendError::MustDrain) => {
                                    // Must keep trying, do nothing
                                }
                                Err(_) => {
                                    break 'ioloop;
                                }
                            }
                        }
                        // Read until the port would block, since events are edge triggered.
                        loop {
                            match raw_port.recv() {
                                Ok(data) => {
                                    if startup {
                                        // Stale data from before the port was opened
                                    } else if rx(Ok(data)).is_err() {
                                        break 'ioloop;
                                    }
                                }
                                Err(RecvError::NotReady) => {
                                    break;
                                }
                                Err(RecvError::Disconnected) => {
                                    let _ = rx(Err(RecvError::Disconnected));
                                    break 'ioloop;
                                }
                                Err(e) => {
                                    // Transient errors are passed along and the port
                                    // waits for the next readiness event.
                                    if rx(Err(e)).is_err() {
                                        break 'ioloop;
                                    }
                                    break;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }

            if !needs_draining && needs_tx_queue_check {
                check_tx_channel = true;
                needs_tx_queue_check = false;
            }

            if check_tx_channel {
                loop {
                    match tx.try_recv() {
                        Ok(DataOrControl::Data(data)) => match raw_port.send(&data) {
                            Err(SendError::MustDrain) => {
                                needs_draining = true;
                                if poll
                                    .registry()
                                    .reregister(
                                        &mut raw_port,
                                        RAW_PORT_TOKEN,
                                        mio::Interest::READABLE.add(mio::Interest::WRITABLE),
                                    )
                                    .is_err()
                                {
                                    break 'ioloop;
                                }
                                break;
                            }
                            Err(SendError::Full) => {
                                // Never happens: MustDrain always comes first and
                                // the queue is not read again until drained.
                            }
                            Err(_) => {
                                break 'ioloop;
                            }
                            Ok(_) => {}
                        },
                        Ok(DataOrControl::DiscardInput) => {
                            if let Err(err) = raw_port.discard_input() {
                                let _ = rx(Err(RecvError::IO(err)));
                            }
                        }
                        Err(TryRecvError::Empty) => {
                            break;
                        }
                        Err(TryRecvError::Disconnected) => {
                            break 'ioloop;
                        }
                    }
                }
            }
        }
    }

    /// Create a `Port` from a `RawPort` and a rx callback.
    fn from_raw<
        RawPortT: RawPort + mio::event::Source + Send + 'static,
        RxCallbackT: Fn(Result<Vec<u8>, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        name: &str,
        raw_port: RawPortT,
        rx: RxCallbackT,
    ) -> io::Result<Port> {
        let (tx, ttx) = crossbeam::channel::bounded::<DataOrControl>(32);
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), WAKER_TOKEN)?;
        thread::Builder::new()
            .name(format!("port {}", name))
            .spawn(move || {
                Port::poller_thread(raw_port, poll, rx, ttx);
            })?;
        Ok(Port {
            tx: Some(tx),
            waker,
        })
    }

    /// Creates a new `Port` for the physical device at `url`, sending the received
    /// bytes or errors to `rx`.
    ///
    /// A valid 'url' has one of the following formats:
    /// - `serial://port[:baud]`. `baud` defaults to 115200. It's possible to omit
    ///   `serial://` if port starts with `COM` on windows or `/dev/` on unix.
    /// - `tcp://address:port`, or `tcp4`/`tcp6` to force a specific version of
    ///   the IP protocol should the default resolution fail.
    ///
    /// The RX callback is called from the port thread. If it returns an `Err()`,
    /// the port is closed.
    pub fn new<RXT: Fn(Result<Vec<u8>, RecvError>) -> io::Result<()> + Send + 'static>(
        url: &str,
        rx: RXT,
    ) -> io::Result<Port> {
        #[cfg(unix)]
        if url.starts_with("/dev/") {
            return Port::from_raw(url, serial::Port::new(url)?, rx);
        }
        #[cfg(windows)]
        if url.starts_with("COM") {
            return Port::from_raw(url, serial::Port::new(url)?, rx);
        }

        let split_url: Vec<&str> = url.splitn(2, "://").collect();
        match split_url[..] {
            ["serial", port] => Port::from_raw(url, serial::Port::new(port)?, rx),
            ["tcp", addr] => Port::from_raw(
                url,
                tcp::Port::new(&find_addr(addr, AddrFamilyRestrict::Either)?)?,
                rx,
            ),
            ["tcp4", addr] => Port::from_raw(
                url,
                tcp::Port::new(&find_addr(addr, AddrFamilyRestrict::V4)?)?,
                rx,
            ),
            ["tcp6", addr] => Port::from_raw(
                url,
                tcp::Port::new(&find_addr(addr, AddrFamilyRestrict::V6)?)?,
                rx,
            ),
            _ => Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid url")),
        }
    }

    /// Create a new port from a `std::net::TcpStream`. See `new()`.
    pub fn from_tcp_stream<
        RXT: Fn(Result<Vec<u8>, RecvError>) -> io::Result<()> + Send + 'static,
    >(
        stream: std::net::TcpStream,
        rx: RXT,
    ) -> io::Result<Port> {
        stream.set_nonblocking(true)?;
        let name = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp".to_string());
        let stream = mio::net::TcpStream::from_std(stream);
        Port::from_raw(&name, tcp::Port::from_stream(stream), rx)
    }

    fn queue(&self, msg: DataOrControl) -> Result<(), SendError> {
        let tx = self.tx.as_ref().ok_or(SendError::Disconnected)?;
        if tx.send(msg).is_err() {
            return Err(SendError::Disconnected);
        }
        self.waker.wake().map_err(SendError::IO)
    }

    /// Queues bytes for sending. This call will block if the port is backed up.
    pub fn send(&self, data: Vec<u8>) -> Result<(), SendError> {
        self.queue(DataOrControl::Data(data))
    }

    /// Asks the port thread to throw away any input the device has buffered.
    pub fn discard_input(&self) -> Result<(), SendError> {
        self.queue(DataOrControl::DiscardInput)
    }
}

impl Drop for Port {
    fn drop(&mut self) {
        // Closing the queue and waking the thread makes it exit, dropping the raw port.
        self.tx.take();
        let _ = self.waker.wake();
    }
}
