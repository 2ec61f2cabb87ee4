use crate::config::WatchdogConfig;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogVerdict {
    Healthy,
    /// The source has repeated itself enough to be considered wedged.
    Stuck,
}

/// Detects a source stuck replaying the same chunk. Fires once the same
/// non-empty chunk has been drained `threshold` times in a row within
/// the window, then starts counting again from zero.
#[derive(Debug)]
pub struct RepeatWatchdog {
    threshold: u32,
    window: Duration,
    last_chunk: Vec<u8>,
    count: u32,
    window_start: Option<Instant>,
}

impl RepeatWatchdog {
    pub fn new(threshold: u32, window: Duration) -> RepeatWatchdog {
        RepeatWatchdog {
            threshold: threshold.max(1),
            window,
            last_chunk: Vec::new(),
            count: 0,
            window_start: None,
        }
    }

    pub fn from_config(config: &WatchdogConfig) -> RepeatWatchdog {
        RepeatWatchdog::new(config.threshold, Duration::from_millis(config.window_ms))
    }

    pub fn observe(&mut self, chunk: &[u8], now: Instant) -> WatchdogVerdict {
        if chunk.is_empty() {
            return WatchdogVerdict::Healthy;
        }
        let in_window = self
            .window_start
            .is_some_and(|start| now.saturating_duration_since(start) <= self.window);
        if in_window && chunk == self.last_chunk.as_slice() {
            self.count += 1;
        } else {
            self.last_chunk.clear();
            self.last_chunk.extend_from_slice(chunk);
            self.count = 1;
            self.window_start = Some(now);
        }
        if self.count >= self.threshold {
            self.count = 0;
            self.window_start = Some(now);
            WatchdogVerdict::Stuck
        } else {
            WatchdogVerdict::Healthy
        }
    }
}

impl Default for RepeatWatchdog {
    fn default() -> Self {
        RepeatWatchdog::from_config(&WatchdogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(watchdog: &mut RepeatWatchdog, chunk: &[u8], times: u64, spacing_ms: u64) -> usize {
        let start = Instant::now();
        (0..times)
            .filter(|i| {
                watchdog.observe(chunk, start + Duration::from_millis(i * spacing_ms))
                    == WatchdogVerdict::Stuck
            })
            .count()
    }

    #[test]
    fn ten_repeats_within_a_second_fire_once() {
        let mut watchdog = RepeatWatchdog::default();
        assert_eq!(feed(&mut watchdog, b"PING\n", 10, 100), 1);
    }

    #[test]
    fn nine_repeats_do_not_fire() {
        let mut watchdog = RepeatWatchdog::default();
        assert_eq!(feed(&mut watchdog, b"PING\n", 9, 100), 0);
    }

    #[test]
    fn slow_repeats_do_not_fire() {
        let mut watchdog = RepeatWatchdog::default();
        assert_eq!(feed(&mut watchdog, b"PING\n", 30, 150), 0);
    }

    #[test]
    fn different_chunk_restarts_the_count() {
        let mut watchdog = RepeatWatchdog::default();
        let t = Instant::now();
        for _ in 0..9 {
            assert_eq!(watchdog.observe(b"A", t), WatchdogVerdict::Healthy);
        }
        assert_eq!(watchdog.observe(b"B", t), WatchdogVerdict::Healthy);
        for _ in 0..8 {
            assert_eq!(watchdog.observe(b"A", t), WatchdogVerdict::Healthy);
        }
        assert_eq!(watchdog.observe(b"", t), WatchdogVerdict::Healthy);
        assert_eq!(watchdog.observe(b"A", t), WatchdogVerdict::Healthy);
        assert_eq!(watchdog.observe(b"A", t), WatchdogVerdict::Stuck);
    }
}
