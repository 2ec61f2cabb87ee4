//! Internal buffer for stream-oriented ports.

use super::{RecvError, SendError};
use std::io;

/// Largest amount of data read from the device in one go.
const IOBUF_CHUNK: usize = 4096;

/// Buffer used internally by ports with an underlying byte stream,
/// for both reception and transmission.
pub struct IOBuf {
    /// Valid data (possibly none) is `buf[start..]`.
    buf: Vec<u8>,
    /// Start offset of valid data in `buf`.
    start: usize,
}

impl IOBuf {
    /// Returns an empty `IOBuf`.
    pub fn new() -> IOBuf {
        IOBuf {
            buf: Vec::with_capacity(IOBUF_CHUNK),
            start: 0,
        }
    }

    /// Returns whether or not this `IOBuf` is empty.
    pub fn empty(&self) -> bool {
        self.start == self.buf.len()
    }

    /// Returns the amount of data contained in this buffer, in bytes.
    pub fn size(&self) -> usize {
        self.buf.len() - self.start
    }

    /// Discards the given amount of bytes off the beginning of the contained data.
    fn consume(&mut self, len: usize) {
        self.start += len.min(self.size());
        if self.empty() {
            self.flush();
        }
    }

    /// Discard the entire content of the buffer.
    pub fn flush(&mut self) {
        self.buf.clear();
        self.start = 0;
    }

    /// Removes and returns the entire content of the buffer.
    pub fn take(&mut self) -> Vec<u8> {
        let data = self.buf.split_off(self.start);
        self.flush();
        data
    }

    /// Moves the data internally to the start of the buffer.
    fn compact(&mut self) {
        if self.start != 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
    }

    /// Reads once from an object implementing `io::Read`, appending to the buffer.
    pub fn refill<T: io::Read>(&mut self, reader: &mut T) -> Result<usize, RecvError> {
        let mut chunk = [0u8; IOBUF_CHUNK];
        match reader.read(&mut chunk) {
            Ok(0) => Err(RecvError::Disconnected),
            Ok(size) => {
                self.compact();
                self.buf.extend_from_slice(&chunk[..size]);
                Ok(size)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(RecvError::NotReady),
            Err(e) => Err(RecvError::IO(e)),
        }
    }

    /// Appends the given data to the existing data.
    pub fn add_data(&mut self, data: &[u8]) {
        self.compact();
        self.buf.extend_from_slice(data);
    }

    /// Sends as much of the contained data as possible to an object implementing `io::Write`.
    pub fn drain<T: io::Write>(&mut self, writer: &mut T) -> Result<(), SendError> {
        if self.empty() {
            return Ok(());
        }
        match writer.write(&self.buf[self.start..]) {
            Ok(size) => {
                self.consume(size);
                if self.empty() {
                    Ok(())
                } else {
                    Err(SendError::MustDrain)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(SendError::MustDrain),
            Err(e) => Err(SendError::IO(e)),
        }
    }
}
