//! Monitor
//!
//! Owns every open channel. Each channel lives on its own worker thread,
//! which runs the flush tick and applies commands sent through the
//! channel's `ChannelHandle`. Commands never block the caller.
//!
//! Note: there is no global lock; the only state shared between channels is
//! the `HighlightIndex`.

use crate::channel::{
    ByteSource, Channel, ChannelBuffer, ChannelState, Event, PortSource, StateCommand, StatusQueue,
};
use crate::clock::SystemClock;
use crate::config::MonitorConfig;
use crate::highlight::HighlightIndex;
use crate::loader::BulkLogLoader;
use crate::sink::SharedSink;
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    State(StateCommand),
    SetLogging(bool),
    SendLine(String),
    Clear,
    ReapplyHighlights,
    Close,
}

/// What the worker last reported about its channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatus {
    pub state: ChannelState,
    pub logging: bool,
    pub log_path: Option<PathBuf>,
    /// Characters held while frozen or minimized.
    pub held: usize,
}

impl Default for ChannelStatus {
    fn default() -> Self {
        ChannelStatus {
            state: ChannelState::Active,
            logging: false,
            log_path: None,
            held: 0,
        }
    }
}

/// Front end of a channel running on its worker thread. Dropping the
/// handle stops the worker and destroys the channel.
pub struct ChannelHandle {
    id: String,
    control: Sender<Command>,
    sink: SharedSink,
    status: Arc<Mutex<ChannelStatus>>,
    worker: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    fn spawn(
        chan: Channel,
        interval: Duration,
        events: StatusQueue,
    ) -> io::Result<ChannelHandle> {
        let id = chan.id().to_string();
        let sink = chan.sink();
        let status = Arc::new(Mutex::new(ChannelStatus::default()));
        let (control, commands) = channel::unbounded();
        let worker_status = status.clone();
        let worker = thread::Builder::new()
            .name(format!("channel {}", id))
            .spawn(move || run(chan, commands, worker_status, interval, events))?;
        Ok(ChannelHandle {
            id,
            control,
            sink,
            status,
            worker: Some(worker),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sink(&self) -> SharedSink {
        self.sink.clone()
    }

    pub fn status(&self) -> ChannelStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn command(&self, command: Command) {
        if self.control.send(command).is_err() {
            debug!(id = %self.id, "channel worker is gone");
        }
    }

    pub fn pause(&self) {
        self.command(Command::State(StateCommand::Pause));
    }

    pub fn resume(&self) {
        self.command(Command::State(StateCommand::Resume));
    }

    pub fn freeze(&self) {
        self.command(Command::State(StateCommand::Freeze));
    }

    pub fn scrolled_to_bottom(&self) {
        self.command(Command::State(StateCommand::ScrolledToBottom));
    }

    pub fn minimize(&self) {
        self.command(Command::State(StateCommand::Minimize));
    }

    pub fn restore(&self) {
        self.command(Command::State(StateCommand::Restore));
    }

    pub fn set_logging(&self, enabled: bool) {
        self.command(Command::SetLogging(enabled));
    }

    pub fn send_line(&self, text: &str) {
        self.command(Command::SendLine(text.to_string()));
    }

    pub fn clear(&self) {
        self.command(Command::Clear);
    }

    pub fn reapply_highlights(&self) {
        self.command(Command::ReapplyHighlights);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        let _ = self.control.send(Command::Close);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                debug!(id = %self.id, "channel worker panicked");
            }
        }
    }
}

fn run(
    mut chan: Channel,
    commands: Receiver<Command>,
    status: Arc<Mutex<ChannelStatus>>,
    interval: Duration,
    events: StatusQueue,
) {
    let ticker = channel::tick(interval);
    loop {
        channel::select! {
            recv(ticker) -> _ => chan.flush(),
            recv(commands) -> cmd => {
                let cmd = match cmd {
                    Ok(Command::Close) | Err(_) => break,
                    Ok(cmd) => cmd,
                };
                let result = match cmd {
                    Command::State(command) => chan.apply(command).map(|_| ()),
                    Command::SetLogging(enabled) => chan.set_logging(enabled).map(|_| ()),
                    Command::SendLine(text) => chan.send_line(&text),
                    Command::Clear => {
                        chan.clear();
                        Ok(())
                    }
                    Command::ReapplyHighlights => {
                        chan.reapply_highlights();
                        Ok(())
                    }
                    Command::Close => Ok(()),
                };
                if let Err(err) = result {
                    debug!(id = %chan.id(), "command rejected: {}", err);
                    events.send(Event::CommandRejected(chan.id().to_string(), err.to_string()));
                }
            }
        }
        let mut status = status.lock().unwrap_or_else(PoisonError::into_inner);
        status.state = chan.state();
        status.logging = chan.is_logging();
        status.log_path = chan.log_path().map(|p| p.to_path_buf());
        status.held = chan.held_len();
    }
    info!(id = %chan.id(), "channel closed");
    events.send(Event::Closed(chan.id().to_string()));
}

/// Result of reconciling open channels with the ports the OS reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortChanges {
    pub opened: Vec<String>,
    pub closed: Vec<String>,
    /// Ports that exist but could not be opened.
    pub busy: Vec<String>,
}

pub struct Monitor {
    config: MonitorConfig,
    highlights: HighlightIndex,
    status: StatusQueue,
    channels: BTreeMap<String, ChannelHandle>,
    /// Channels opened by `sync_ports`, which may also close them.
    auto_opened: HashSet<String>,
    ignored: HashSet<String>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        highlights: HighlightIndex,
        status: Option<Sender<Event>>,
    ) -> Monitor {
        Monitor {
            config,
            highlights,
            status: StatusQueue::new(status),
            channels: BTreeMap::new(),
            auto_opened: HashSet::new(),
            ignored: HashSet::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn highlights(&self) -> &HighlightIndex {
        &self.highlights
    }

    /// A loader sharing this monitor's rules.
    pub fn loader(&self) -> BulkLogLoader {
        BulkLogLoader::from_config(self.highlights.clone(), &self.config)
    }

    pub fn get(&self, id: &str) -> Option<&ChannelHandle> {
        self.channels.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Opens `url` as a port channel, or returns the channel already open on it.
    pub fn open(&mut self, url: &str) -> io::Result<&ChannelHandle> {
        if !self.channels.contains_key(url) {
            let buffer = ChannelBuffer::new();
            let mut source = PortSource::new(url, buffer.clone());
            source.open()?;
            self.start(url, Box::new(source), buffer)?;
        }
        self.get(url)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, url.to_string()))
    }

    /// Runs a channel over any open source that appends into `buffer`.
    pub fn attach(
        &mut self,
        id: &str,
        source: Box<dyn ByteSource>,
        buffer: ChannelBuffer,
    ) -> io::Result<&ChannelHandle> {
        self.close(id);
        self.start(id, source, buffer)?;
        self.get(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, id.to_string()))
    }

    fn start(&mut self, id: &str, source: Box<dyn ByteSource>, buffer: ChannelBuffer) -> io::Result<()> {
        let channel = Channel::new(
            id,
            source,
            buffer,
            self.highlights.clone(),
            &self.config,
            Arc::new(SystemClock),
            self.status.clone(),
        );
        let handle = ChannelHandle::spawn(channel, self.config.flush_interval(), self.status.clone())?;
        info!(id = %id, "channel opened");
        self.channels.insert(id.to_string(), handle);
        self.status.send(Event::Opened(id.to_string()));
        Ok(())
    }

    /// Stops and destroys a channel. Returns whether it was open.
    pub fn close(&mut self, id: &str) -> bool {
        self.auto_opened.remove(id);
        self.channels.remove(id).is_some()
    }

    /// Closes a channel and keeps `sync_ports` from reopening it.
    pub fn ignore(&mut self, id: &str) -> bool {
        self.ignored.insert(id.to_string());
        self.close(id)
    }

    pub fn is_ignored(&self, id: &str) -> bool {
        self.ignored.contains(id)
    }

    pub fn reset_ignored(&mut self) {
        self.ignored.clear();
    }

    /// Opens newly available ports and closes auto-opened channels whose
    /// port went away.
    pub fn sync_ports(&mut self, available: &[String]) -> PortChanges {
        let mut changes = PortChanges::default();
        let present: HashSet<&str> = available.iter().map(|p| p.as_str()).collect();

        let gone: Vec<String> = self
            .auto_opened
            .iter()
            .filter(|id| !present.contains(id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            self.close(&id);
            changes.closed.push(id);
        }
        self.ignored.retain(|id| present.contains(id.as_str()));

        for port in available {
            if self.channels.contains_key(port) || self.ignored.contains(port) {
                continue;
            }
            match self.open(port).map(|_| ()) {
                Ok(_) => {
                    self.auto_opened.insert(port.clone());
                    changes.opened.push(port.clone());
                }
                Err(err) => {
                    debug!(port = %port, "port busy: {}", err);
                    changes.busy.push(port.clone());
                }
            }
        }
        changes
    }

    /// `sync_ports` against the serial ports the OS currently reports.
    pub fn scan(&mut self) -> io::Result<PortChanges> {
        let ports: Vec<String> = mio_serial::available_ports()?
            .into_iter()
            .map(|p| p.port_name)
            .collect();
        Ok(self.sync_ports(&ports))
    }

    /// Re-runs the highlight overlay on every channel, after a rule change.
    pub fn reapply_highlights(&self) {
        for handle in self.channels.values() {
            handle.reapply_highlights();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::MockSource;
    use crate::highlight::{Color, HighlightRule};
    use crate::sink::{self, Style};
    use std::time::Instant;

    fn monitor() -> (Monitor, Receiver<Event>) {
        let config = MonitorConfig {
            flush_interval_ms: 5,
            ..MonitorConfig::default()
        };
        let (tx, rx) = channel::bounded(256);
        (Monitor::new(config, HighlightIndex::new(), Some(tx)), rx)
    }

    fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn attach(monitor: &mut Monitor, id: &str) -> (MockSource, ChannelBuffer) {
        let source = MockSource::opened();
        let buffer = ChannelBuffer::new();
        monitor
            .attach(id, Box::new(source.clone()), buffer.clone())
            .unwrap();
        (source, buffer)
    }

    #[test]
    fn attached_channel_renders_on_its_tick() {
        let (mut monitor, events) = monitor();
        let (_, buffer) = attach(&mut monitor, "mock0");
        assert!(matches!(events.try_recv(), Ok(Event::Opened(id)) if id == "mock0"));

        buffer.append(b"hello\nworld\n");
        let sink = monitor.get("mock0").unwrap().sink();
        wait_for("render", || sink::lock(&sink).styled(Style::Plain).concat() == "hello\nworld\n");
    }

    #[test]
    fn commands_are_applied_by_the_worker() {
        let (mut monitor, events) = monitor();
        let (source, buffer) = attach(&mut monitor, "mock0");
        let handle = monitor.get("mock0").unwrap();

        handle.freeze();
        wait_for("freeze", || handle.status().state == ChannelState::Frozen);
        buffer.append(b"held\n");
        wait_for("hold", || handle.status().held == 5);

        handle.pause();
        wait_for("rejection", || {
            events
                .try_iter()
                .any(|e| matches!(e, Event::CommandRejected(..)))
        });
        assert_eq!(handle.status().state, ChannelState::Frozen);

        handle.scrolled_to_bottom();
        handle.send_line("AT");
        wait_for("send", || source.calls().sent == b"AT\r\n");
        assert_eq!(handle.status().held, 0);
    }

    #[test]
    fn closing_stops_the_worker() {
        let (mut monitor, events) = monitor();
        let (source, _) = attach(&mut monitor, "mock0");
        assert!(monitor.close("mock0"));
        assert!(!monitor.close("mock0"));
        assert!(monitor.is_empty());
        assert!(!source.calls().open);
        assert!(events.try_iter().any(|e| matches!(e, Event::Closed(id) if id == "mock0")));
    }

    #[test]
    fn rule_changes_reach_open_channels() {
        let (mut monitor, _events) = monitor();
        let (_, buffer) = attach(&mut monitor, "mock0");
        buffer.append(b"link up\n");
        let sink = monitor.get("mock0").unwrap().sink();
        wait_for("render", || sink::lock(&sink).text().contains("link up"));

        monitor
            .highlights()
            .upsert(HighlightRule::new("up", Color::BLACK, Color::rgb(0, 200, 0)).unwrap())
            .unwrap();
        monitor.reapply_highlights();
        wait_for("highlight", || {
            sink::lock(&sink)
                .spans()
                .any(|s| matches!(s.style, Style::Highlight { .. }))
        });
    }

    #[test]
    fn unopenable_ports_are_busy_and_ignored_ports_skipped() {
        let (mut monitor, _events) = monitor();
        let missing = "/dev/portscope-test-missing".to_string();
        let skipped = "/dev/portscope-test-skipped".to_string();
        monitor.ignore(&skipped);

        let changes = monitor.sync_ports(&[missing.clone(), skipped.clone()]);
        assert!(changes.opened.is_empty());
        assert_eq!(changes.busy, vec![missing]);
        assert!(monitor.is_ignored(&skipped));

        // Ports that disappear are forgotten from the ignore list.
        monitor.sync_ports(&[]);
        assert!(!monitor.is_ignored(&skipped));
    }
}
