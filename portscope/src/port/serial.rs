//! Serial Port
//!
//! Implements a `RawPort` for a serial port, and an MIO event source.
//! Bytes are passed through untouched in both directions.

use super::{iobuf::IOBuf, RawPort, RecvError, SendError};
use mio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};
use std::io;
use std::io::Write;
use std::time::{Duration, Instant};

/// RawPort to communicate via a serial port
pub struct Port {
    /// Underlying serial port stream
    port: mio_serial::SerialStream,
    /// Incoming buffer.
    rxbuf: IOBuf,
    /// Outgoing buffer, used when the OS buffer fills up.
    txbuf: IOBuf,
    /// Time when the port is initialized, used for startup_holdoff
    startup_time: Instant,
}

/// Default data rate on the serial port.
static DEFAULT_RATE: u32 = 115200;

/// Discard anything for this long after the port is opened.
static HOLDOFF_TIME: Duration = Duration::from_millis(50);

impl Port {
    /// Returns a new `serial::Port`. The `url` should look like `serial_port[:rate]`.
    /// It must start with a serial port, like `/dev/tty??` or `COMn`. The rate
    /// defaults to 115200.
    pub fn new(url: &str) -> Result<Port, io::Error> {
        let (port_name, rate) = parse_url(url)?;
        let mio_port = mio_serial::new(port_name, rate).open_native_async()?;
        #[cfg(windows)]
        {
            // Windows requires some custom settings to replicate the unix behavior.
            use std::os::windows::io::AsRawHandle;
            use winapi::um::commapi::SetCommTimeouts;
            use winapi::um::winbase::COMMTIMEOUTS;
            let handle = mio_port.as_raw_handle();
            let mut timeouts = COMMTIMEOUTS {
                ReadIntervalTimeout: 0xFFFFFFFF,
                ReadTotalTimeoutMultiplier: 0xFFFFFFFF,
                ReadTotalTimeoutConstant: 0xFFFFFFFE,
                WriteTotalTimeoutMultiplier: 0,
                WriteTotalTimeoutConstant: 0,
            };
            if unsafe { SetCommTimeouts(handle, &mut timeouts) } == 0 {
                return Err(io::Error::last_os_error());
            }
        }
        // Whatever the driver buffered before we opened is stale.
        mio_port.clear(ClearBuffer::All)?;
        Ok(Port {
            port: mio_port,
            rxbuf: IOBuf::new(),
            txbuf: IOBuf::new(),
            startup_time: Instant::now(),
        })
    }
}

fn parse_url(url: &str) -> io::Result<(&str, u32)> {
    let url_tokens: Vec<&str> = url.split(':').collect();
    match url_tokens[..] {
        [name] if !name.is_empty() => Ok((name, DEFAULT_RATE)),
        [name, rate] if !name.is_empty() => rate
            .parse::<u32>()
            .map(|rate| (name, rate))
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput)),
        _ => Err(io::Error::from(io::ErrorKind::InvalidInput)),
    }
}

impl RawPort for Port {
    fn recv(&mut self) -> Result<Vec<u8>, RecvError> {
        if let Err(e) = self.rxbuf.refill(&mut self.port) {
            #[cfg(target_os = "macos")]
            // On macos, disconnecting a serial port while connected will
            // generate this error, so translate it.
            if let RecvError::IO(ioerr) = &e {
                if Some(6) == ioerr.raw_os_error() {
                    return Err(RecvError::Disconnected);
                }
            }
            return Err(e);
        }
        Ok(self.rxbuf.take())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.has_data_to_drain() {
            return Err(SendError::Full);
        }

        match self.port.write(data) {
            Ok(size) if size == data.len() => Ok(()),
            Ok(size) => {
                self.txbuf.add_data(&data[size..]);
                Err(SendError::MustDrain)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                // The OS buffer is completely full, keep everything for draining.
                self.txbuf.add_data(data);
                Err(SendError::MustDrain)
            }
            Err(e) => Err(SendError::IO(e)),
        }
    }

    fn drain(&mut self) -> Result<(), SendError> {
        self.txbuf.drain(&mut self.port)
    }

    fn has_data_to_drain(&self) -> bool {
        !self.txbuf.empty()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.rxbuf.flush();
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn startup_holdoff(&self) -> bool {
        self.startup_time.elapsed() < HOLDOFF_TIME
    }
}

impl mio::event::Source for Port {
    fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.port.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interests: mio::Interest,
    ) -> io::Result<()> {
        self.port.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        self.port.deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_rate_defaults_to_115200() {
        assert_eq!(parse_url("/dev/ttyUSB0").unwrap(), ("/dev/ttyUSB0", 115200));
        assert_eq!(parse_url("COM3:9600").unwrap(), ("COM3", 9600));
        assert!(parse_url("COM3:fast").is_err());
        assert!(parse_url("COM3:9600:1").is_err());
        assert!(parse_url("").is_err());
    }
}
