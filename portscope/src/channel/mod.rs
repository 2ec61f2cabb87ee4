//! Channels
//!
//! A `Channel` is one live byte source together with everything between its
//! raw bytes and the rendered `OutputSink`: the raw buffer, the stuck source
//! watchdog, the state machine that decides whether drained text is shown or
//! held, the decorator and the optional archive log.
//!
//! A channel does nothing by itself. Something must call `flush()` at a
//! fixed interval (see `monitor`), and the source must append into the
//! channel's `ChannelBuffer`.

mod buffer;
mod session;
mod source;
mod state;
mod watchdog;

pub use buffer::{ChannelBuffer, TextDecoder};
pub use session::{
    channel_label, format_size, list_sessions, parse_session_file_name, session_file_name,
    ArchiveName, ArchivedLog, LogSession,
};
pub use source::{ByteSource, PortSource};
pub use state::{ChannelState, InvalidTransition, StateCommand, Transition};
pub use watchdog::{RepeatWatchdog, WatchdogVerdict};

#[cfg(test)]
pub(crate) use source::testing;

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::highlight::HighlightIndex;
use crate::sink::{self, Decorator, LineSuppressor, OutputSink, SharedSink};
use crossbeam::channel;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FREEZE_WARNING: &str = "[WARN] Port freeze prevented.";
pub const DISCONNECT_WARNING: &str = "[WARN] Source disconnected.";

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("channel {0} is paused")]
    Paused(String),
    #[error("could not reconnect to {id}: {source}")]
    Reconnect { id: String, source: io::Error },
    #[error("send to {id} failed: {source}")]
    Send { id: String, source: io::Error },
    #[error("could not start logging for {id}: {source}")]
    Logging { id: String, source: io::Error },
}

/// Status event reported to an optional user supplied queue.
#[derive(Debug)]
pub enum Event {
    Opened(String),
    Closed(String),
    /// New data arrived while minimized.
    Activity(String),
    StuckSourceRecovered(String),
    ReconnectFailed(String, io::Error),
    Disconnected(String),
    LoggingStarted(String, PathBuf),
    LoggingFailed(String, io::Error),
    CommandRejected(String, String),
}

#[derive(Debug, Clone, Default)]
pub struct StatusQueue {
    dest: Option<channel::Sender<Event>>,
}

impl StatusQueue {
    pub fn new(dest: Option<channel::Sender<Event>>) -> StatusQueue {
        StatusQueue { dest }
    }

    /// Never blocks; events are dropped when the queue is full.
    pub fn send(&self, event: Event) {
        if let Some(dest) = &self.dest {
            if let Err(err) = dest.try_send(event) {
                debug!("status event dropped: {:?}", err.into_inner());
            }
        }
    }
}

pub struct Channel {
    id: String,
    state: ChannelState,
    buffer: ChannelBuffer,
    decoder: TextDecoder,
    /// Text drained while withholding, rendered on the way out.
    held: String,
    decorator: Decorator,
    highlights: HighlightIndex,
    sink: SharedSink,
    watchdog: RepeatWatchdog,
    source: Box<dyn ByteSource>,
    log_dir: PathBuf,
    session: Option<LogSession>,
    logging: bool,
    reconnect_pause: Duration,
    activity_cooldown: Duration,
    last_activity: Option<Instant>,
    clock: Arc<dyn Clock>,
    status: StatusQueue,
}

impl Channel {
    /// Builds an `Active` channel around an already open `source` that
    /// appends into `buffer`.
    pub fn new(
        id: &str,
        source: Box<dyn ByteSource>,
        buffer: ChannelBuffer,
        highlights: HighlightIndex,
        config: &MonitorConfig,
        clock: Arc<dyn Clock>,
        status: StatusQueue,
    ) -> Channel {
        let decorator = Decorator::new(
            highlights.clone(),
            LineSuppressor::from_config(&config.suppression),
            clock.clone(),
        );
        Channel {
            id: id.to_string(),
            state: ChannelState::Active,
            buffer,
            decoder: TextDecoder::new(),
            held: String::new(),
            decorator,
            highlights,
            sink: OutputSink::shared(config.sink_capacity),
            watchdog: RepeatWatchdog::from_config(&config.watchdog),
            source,
            log_dir: config.log_dir.clone(),
            session: None,
            logging: false,
            reconnect_pause: Duration::from_millis(config.watchdog.reconnect_pause_ms),
            activity_cooldown: config.activity_cooldown(),
            last_activity: None,
            clock,
            status,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn sink(&self) -> SharedSink {
        self.sink.clone()
    }

    pub fn buffer(&self) -> &ChannelBuffer {
        &self.buffer
    }

    /// Characters waiting to be shown.
    pub fn held_len(&self) -> usize {
        self.held.chars().count()
    }

    pub fn is_logging(&self) -> bool {
        self.logging
    }

    /// Archive path, fixed once logging has been enabled the first time.
    pub fn log_path(&self) -> Option<&Path> {
        self.session.as_ref().map(|s| s.path())
    }

    /// One flush tick: drain the raw buffer and route it.
    pub fn flush(&mut self) {
        if self.buffer.take_disconnected() {
            self.on_disconnect();
        }
        let raw = self.buffer.drain();
        if raw.is_empty() {
            return;
        }
        let now = self.clock.now();
        let verdict = self.watchdog.observe(&raw, now);
        let text = self.decoder.decode(&raw);

        if self.logging {
            self.write_log(&text);
        }
        if self.state.withholds() {
            self.held.push_str(&text);
            if self.state == ChannelState::Minimized {
                self.notify_activity(now);
            }
        } else {
            self.render(&text);
        }

        if verdict == WatchdogVerdict::Stuck {
            self.recover_stuck_source();
        }
    }

    pub fn apply(&mut self, command: StateCommand) -> Result<ChannelState, ChannelError> {
        let transition = self.state.apply(command)?;
        if transition.opens_source() {
            if let Err(err) = self.source.open() {
                warn!(id = %self.id, "reconnect failed: {}", err);
                self.status.send(Event::ReconnectFailed(
                    self.id.clone(),
                    io::Error::new(err.kind(), err.to_string()),
                ));
                return Err(ChannelError::Reconnect {
                    id: self.id.clone(),
                    source: err,
                });
            }
            self.source.discard_input();
        }
        if transition.closes_source() {
            self.source.close();
        }
        self.enter(transition.to);
        Ok(self.state)
    }

    pub fn pause(&mut self) -> Result<ChannelState, ChannelError> {
        self.apply(StateCommand::Pause)
    }

    pub fn resume(&mut self) -> Result<ChannelState, ChannelError> {
        self.apply(StateCommand::Resume)
    }

    pub fn freeze(&mut self) -> Result<ChannelState, ChannelError> {
        self.apply(StateCommand::Freeze)
    }

    pub fn scrolled_to_bottom(&mut self) -> Result<ChannelState, ChannelError> {
        self.apply(StateCommand::ScrolledToBottom)
    }

    pub fn minimize(&mut self) -> Result<ChannelState, ChannelError> {
        self.apply(StateCommand::Minimize)
    }

    pub fn restore(&mut self) -> Result<ChannelState, ChannelError> {
        self.apply(StateCommand::Restore)
    }

    /// Sends `text` followed by CRLF, and shows it as a sent line.
    pub fn send_line(&mut self, text: &str) -> Result<(), ChannelError> {
        if self.state == ChannelState::Paused {
            return Err(ChannelError::Paused(self.id.clone()));
        }
        let mut data = text.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.source.send(&data).map_err(|source| ChannelError::Send {
            id: self.id.clone(),
            source,
        })?;
        let mut sink = sink::lock(&self.sink);
        self.decorator.transmit(&mut sink, text);
        Ok(())
    }

    /// Empties the sink and forgets held text.
    pub fn clear(&mut self) {
        sink::lock(&self.sink).clear();
        self.held.clear();
        self.decorator.reset_line();
    }

    /// Re-runs the highlight overlay over everything already rendered.
    pub fn reapply_highlights(&mut self) {
        sink::lock(&self.sink).reapply_highlights(&self.highlights.snapshot());
    }

    /// Starts or stops archiving drained data. The archive file is created
    /// the first time and reused afterwards.
    pub fn set_logging(&mut self, enabled: bool) -> Result<Option<&Path>, ChannelError> {
        if enabled && self.session.is_none() {
            let label = channel_label(&self.id);
            match LogSession::create(&self.log_dir, &label, &self.clock.wall()) {
                Ok(session) => {
                    info!(id = %self.id, path = %session.path().display(), "logging started");
                    self.status.send(Event::LoggingStarted(
                        self.id.clone(),
                        session.path().to_path_buf(),
                    ));
                    self.session = Some(session);
                }
                Err(err) => {
                    warn!(id = %self.id, "could not create log file: {}", err);
                    self.status.send(Event::LoggingFailed(
                        self.id.clone(),
                        io::Error::new(err.kind(), err.to_string()),
                    ));
                    return Err(ChannelError::Logging {
                        id: self.id.clone(),
                        source: err,
                    });
                }
            }
        }
        self.logging = enabled;
        Ok(self.log_path())
    }

    fn enter(&mut self, to: ChannelState) {
        let from = std::mem::replace(&mut self.state, to);
        if from == to {
            return;
        }
        debug!(id = %self.id, "{:?} -> {:?}", from, to);
        if from.withholds() && !to.withholds() {
            let held = std::mem::take(&mut self.held);
            self.render(&held);
        }
        if to != ChannelState::Minimized {
            self.last_activity = None;
        }
    }

    fn render(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut sink = sink::lock(&self.sink);
        self.decorator.render(&mut sink, text);
    }

    fn notice(&mut self, text: &str) {
        let mut sink = sink::lock(&self.sink);
        self.decorator.notice(&mut sink, text);
    }

    fn notify_activity(&mut self, now: Instant) {
        let due = self
            .last_activity
            .map_or(true, |last| now.saturating_duration_since(last) >= self.activity_cooldown);
        if due {
            self.last_activity = Some(now);
            self.status.send(Event::Activity(self.id.clone()));
        }
    }

    fn write_log(&mut self, text: &str) {
        if let Some(session) = self.session.as_mut() {
            if let Err(err) = session.write(text, &self.clock.wall()) {
                debug!(id = %self.id, "log write failed: {}", err);
            }
        }
    }

    /// Close, pause, reopen and discard whatever the wedged source had queued.
    fn recover_stuck_source(&mut self) {
        warn!(id = %self.id, "source is repeating itself, reconnecting");
        self.source.close();
        thread::sleep(self.reconnect_pause);
        match self.source.open() {
            Ok(()) => {
                self.source.discard_input();
                self.buffer.discard();
                self.notice(FREEZE_WARNING);
                self.status.send(Event::StuckSourceRecovered(self.id.clone()));
            }
            Err(err) => {
                warn!(id = %self.id, "reconnect after freeze failed: {}", err);
                self.enter(ChannelState::Paused);
                self.notice(&format!("[WARN] Port reconnect failed: {}", err));
                self.status.send(Event::ReconnectFailed(self.id.clone(), err));
            }
        }
    }

    fn on_disconnect(&mut self) {
        if self.state == ChannelState::Paused {
            return;
        }
        warn!(id = %self.id, "source disconnected");
        self.source.close();
        self.enter(ChannelState::Paused);
        self.notice(DISCONNECT_WARNING);
        self.status.send(Event::Disconnected(self.id.clone()));
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            debug!(id = %self.id, "discarding {} held bytes", self.held.len());
        }
        self.source.close();
    }
}
