use super::ChannelBuffer;
use crate::port::{Port, RecvError};
use std::io;
use tracing::debug;

/// What a channel needs from whatever feeds its buffer.
pub trait ByteSource: Send {
    /// Starts delivering into the channel buffer. Opening an open source is a no-op.
    fn open(&mut self) -> io::Result<()>;

    /// Stops delivery and releases the device.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Drops anything the device has received but not yet delivered.
    fn discard_input(&mut self) {}

    fn send(&mut self, data: &[u8]) -> io::Result<()>;
}

/// A `Port` feeding a `ChannelBuffer`.
pub struct PortSource {
    url: String,
    buffer: ChannelBuffer,
    port: Option<Port>,
}

impl PortSource {
    /// Creates a closed source; call `open()` to connect.
    pub fn new(url: &str, buffer: ChannelBuffer) -> PortSource {
        PortSource {
            url: url.to_string(),
            buffer,
            port: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ByteSource for PortSource {
    fn open(&mut self) -> io::Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let buffer = self.buffer.clone();
        let url = self.url.clone();
        let port = Port::new(&self.url, move |res| match res {
            Ok(data) => {
                buffer.append(&data);
                Ok(())
            }
            Err(RecvError::Disconnected) => {
                buffer.mark_disconnected();
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            Err(RecvError::IO(err)) => {
                debug!(url = %url, "transient read error: {}", err);
                Ok(())
            }
            Err(RecvError::NotReady) => Ok(()),
        })?;
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn discard_input(&mut self) {
        if let Some(port) = &self.port {
            if let Err(err) = port.discard_input() {
                debug!(url = %self.url, "discard input failed: {:?}", err);
            }
        }
    }

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        match &self.port {
            Some(port) => Ok(port.send(data.to_vec())?),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct Calls {
        pub opens: usize,
        pub closes: usize,
        pub discards: usize,
        pub sent: Vec<u8>,
        pub open: bool,
        pub fail_open: bool,
    }

    /// Scriptable source that records what the channel asked of it.
    #[derive(Clone, Default)]
    pub struct MockSource {
        pub calls: Arc<Mutex<Calls>>,
    }

    impl MockSource {
        pub fn opened() -> MockSource {
            let source = MockSource::default();
            source.calls.lock().unwrap().open = true;
            source
        }

        pub fn calls(&self) -> std::sync::MutexGuard<'_, Calls> {
            self.calls.lock().unwrap()
        }
    }

    impl ByteSource for MockSource {
        fn open(&mut self) -> io::Result<()> {
            let mut calls = self.calls();
            calls.opens += 1;
            if calls.fail_open {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
            }
            calls.open = true;
            Ok(())
        }

        fn close(&mut self) {
            let mut calls = self.calls();
            calls.closes += 1;
            calls.open = false;
        }

        fn is_open(&self) -> bool {
            self.calls().open
        }

        fn discard_input(&mut self) {
            self.calls().discards += 1;
        }

        fn send(&mut self, data: &[u8]) -> io::Result<()> {
            let mut calls = self.calls();
            if !calls.open {
                return Err(io::Error::from(io::ErrorKind::NotConnected));
            }
            calls.sent.extend_from_slice(data);
            Ok(())
        }
    }
}
