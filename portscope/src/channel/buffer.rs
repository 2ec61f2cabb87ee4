use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Pending {
    data: Vec<u8>,
    disconnected: bool,
}

/// Raw byte accumulator between a source thread and the flush tick.
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct ChannelBuffer {
    inner: Arc<Mutex<Pending>>,
}

impl ChannelBuffer {
    pub fn new() -> ChannelBuffer {
        ChannelBuffer::default()
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn append(&self, bytes: &[u8]) {
        if !bytes.is_empty() {
            self.lock().data.extend_from_slice(bytes);
        }
    }

    /// Takes everything appended since the last drain.
    pub fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().data)
    }

    pub fn discard(&self) {
        self.lock().data.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Called by the producer when its source went away.
    pub fn mark_disconnected(&self) {
        self.lock().disconnected = true;
    }

    /// Returns and clears the disconnect flag.
    pub fn take_disconnected(&self) -> bool {
        std::mem::take(&mut self.lock().disconnected)
    }
}

/// Streaming UTF-8 decoder. A sequence cut at the end of one chunk is
/// completed by the next instead of being replaced.
#[derive(Debug, Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    pub fn new() -> TextDecoder {
        TextDecoder::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut data = std::mem::take(&mut self.pending);
        data.extend_from_slice(bytes);
        let mut out = String::with_capacity(data.len());
        let mut rest = &data[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Bytes held back waiting for the rest of a character.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn drain_swaps_and_clears() {
        let buffer = ChannelBuffer::new();
        buffer.append(b"ab");
        buffer.append(b"");
        buffer.append(b"c");
        assert_eq!(buffer.drain(), b"abc");
        assert!(buffer.drain().is_empty());
    }

    #[test]
    fn concurrent_appends_keep_producer_order() {
        let buffer = ChannelBuffer::new();
        let producer = {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for i in 0..2000u32 {
                    buffer.append(format!("{}\n", i).as_bytes());
                }
            })
        };
        let mut seen = Vec::new();
        while !producer.is_finished() {
            seen.extend(buffer.drain());
        }
        producer.join().unwrap();
        seen.extend(buffer.drain());
        let text = String::from_utf8(seen).unwrap();
        let numbers: Vec<u32> = text.lines().map(|l| l.parse().unwrap()).collect();
        assert_eq!(numbers, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn disconnect_flag_is_one_shot() {
        let buffer = ChannelBuffer::new();
        buffer.mark_disconnected();
        assert!(buffer.take_disconnected());
        assert!(!buffer.take_disconnected());
    }

    #[test]
    fn decoder_joins_split_characters() {
        let mut decoder = TextDecoder::new();
        let bytes = "é😀".as_bytes();
        assert_eq!(decoder.decode(&bytes[..1]), "");
        assert_eq!(decoder.pending(), 1);
        assert_eq!(decoder.decode(&bytes[1..4]), "é");
        assert_eq!(decoder.decode(&bytes[4..]), "😀");
        assert_eq!(decoder.pending(), 0);
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = TextDecoder::new();
        assert_eq!(decoder.decode(b"a\xffb\xc3"), "a\u{fffd}b");
        assert_eq!(decoder.decode(b"\xa9"), "é");
    }
}
