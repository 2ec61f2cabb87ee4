//! portscope-monitor
//!
//! Terminal monitor for one or more serial/TCP channels. Shows one channel
//! at a time; Tab switches between them.
//!
//! Keys: q/Esc quit, Tab next channel, p pause/resume, f freeze/follow,
//! m minimize/restore, l logging on/off, c clear, s send a line,
//! i ignore channel, r forget ignored ports, / search, n/N next/previous
//! hit. Esc clears an active search before it quits.

use clap::Parser;
use crossterm::event::{Event as TermEvent, EventStream, KeyCode, KeyEvent, KeyModifiers};
use crossterm::{cursor::*, style::*, terminal::*, ExecutableCommand, QueueableCommand};
use futures::{future::FutureExt, select, StreamExt};
use futures_timer::Delay;
use portscope::channel::{ChannelState, Event};
use portscope::monitor::Monitor;
use portscope::sink::{self, SearchCursor};
use portscope_tools::{
    enum_ports, init_logging, log, tail_start, window_at, write_styled, CommonOpts,
};
use std::io::{self, stdout, Write};
use std::process::ExitCode;
use std::time::Instant;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(
    name = "portscope-monitor",
    version,
    about = "Watch serial and TCP byte streams with highlighting and logging"
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Channels to open (serial://NAME[:baud], /dev/..., COMn, tcp://host:port)
    urls: Vec<String>,

    /// Open serial ports as they appear, and close them when they go away
    #[arg(long)]
    auto: bool,

    /// Start archiving every channel as soon as it opens
    #[arg(short = 'l', long)]
    log: bool,

    /// List serial ports, then quit
    #[arg(long = "enum")]
    enumerate: bool,

    /// With --enum, include non-USB ports
    #[arg(long)]
    all: bool,
}

enum Input {
    Keys,
    Line(String),
    Search(String),
}

struct View {
    selected: usize,
    status: String,
    input: Input,
    search: Option<SearchCursor>,
    drawn: Option<(String, u64)>,
}

fn describe(event: &Event) -> String {
    match event {
        Event::Opened(id) => format!("opened {}", id),
        Event::Closed(id) => format!("closed {}", id),
        Event::Activity(id) => format!("new data on {}", id),
        Event::StuckSourceRecovered(id) => format!("{} was stuck and has been reconnected", id),
        Event::ReconnectFailed(id, err) => format!("reconnecting {} failed: {}", id, err),
        Event::Disconnected(id) => format!("{} disconnected", id),
        Event::LoggingStarted(id, path) => format!("logging {} to {}", id, path.display()),
        Event::LoggingFailed(id, err) => format!("logging {} failed: {}", id, err),
        Event::CommandRejected(id, why) => format!("{}: {}", id, why),
    }
}

fn draw(monitor: &Monitor, view: &mut View, force: bool) -> io::Result<()> {
    let ids: Vec<&str> = monitor.ids().collect();
    if ids.is_empty() {
        view.selected = 0;
    } else if view.selected >= ids.len() {
        view.selected = ids.len() - 1;
    }
    let handle = ids.get(view.selected).and_then(|id| monitor.get(id));
    let snapshot = handle.map(|h| sink::lock(&h.sink()).snapshot());

    let key = handle.map(|h| h.id().to_string()).unwrap_or_default();
    let revision = snapshot.as_ref().map_or(0, |s| s.revision);
    if !force && view.drawn.as_ref() == Some(&(key.clone(), revision)) {
        return Ok(());
    }
    view.drawn = Some((key, revision));

    let (_, rows) = size()?;
    let mut out = stdout();
    out.queue(Clear(ClearType::All))?.queue(MoveTo(0, 0))?;

    let header = match handle {
        Some(h) => {
            let status = h.status();
            let state = match status.state {
                ChannelState::Active => "active",
                ChannelState::Paused => "paused",
                ChannelState::Frozen => "frozen",
                ChannelState::Minimized => "minimized",
            };
            format!(
                "[{}/{}] {}  {}{}{}",
                view.selected + 1,
                ids.len(),
                h.id(),
                state,
                if status.logging { "  logging" } else { "" },
                if status.held > 0 {
                    format!("  {} held", status.held)
                } else {
                    String::new()
                }
            )
        }
        None => "no open channels".to_string(),
    };
    out.queue(SetAttribute(Attribute::Reverse))?
        .queue(Print(header))?
        .queue(SetAttribute(Attribute::Reset))?
        .queue(Print("\r\n"))?;

    if let Some(snapshot) = &snapshot {
        let body_rows = rows.saturating_sub(3) as usize;
        let hit = view.search.as_mut().and_then(|cursor| {
            cursor.refresh(&snapshot.text);
            cursor.current()
        });
        let window = match hit {
            Some(hit) => window_at(&snapshot.text, hit.start, body_rows),
            None => tail_start(&snapshot.text, body_rows)..snapshot.text.len(),
        };
        write_styled(&mut out, snapshot, window, true)?;
    }

    out.queue(MoveTo(0, rows.saturating_sub(1)))?;
    match (&view.input, &view.search) {
        (Input::Line(line), _) => out.queue(Print(format!("send> {}", line)))?,
        (Input::Search(term), _) => out.queue(Print(format!("search> {}", term)))?,
        (Input::Keys, Some(cursor)) => out.queue(Print(format!(
            "search {:?}: {}  {}",
            cursor.term(),
            cursor.counter(),
            view.status
        )))?,
        (Input::Keys, None) => out.queue(Print(&view.status))?,
    };
    out.flush()
}

/// Returns false when the monitor should quit.
fn handle_key(monitor: &mut Monitor, view: &mut View, key: KeyEvent) -> bool {
    let ids: Vec<String> = monitor.ids().map(|s| s.to_string()).collect();
    let current = ids.get(view.selected).cloned();

    if let Input::Search(term) = &mut view.input {
        match key.code {
            KeyCode::Enter => {
                let text = current
                    .as_deref()
                    .and_then(|id| monitor.get(id))
                    .map(|h| sink::lock(&h.sink()).text().to_string())
                    .unwrap_or_default();
                view.search = Some(SearchCursor::new(term, &text)).filter(|c| !c.term().is_empty());
                view.input = Input::Keys;
            }
            KeyCode::Esc => view.input = Input::Keys,
            KeyCode::Backspace => {
                term.pop();
            }
            KeyCode::Char(c) => term.push(c),
            _ => {}
        }
        return true;
    }

    if let Input::Line(line) = &mut view.input {
        match key.code {
            KeyCode::Enter => {
                if let Some(handle) = current.as_deref().and_then(|id| monitor.get(id)) {
                    handle.send_line(line);
                }
                view.input = Input::Keys;
            }
            KeyCode::Esc => view.input = Input::Keys,
            KeyCode::Backspace => {
                line.pop();
            }
            KeyCode::Char(c) => line.push(c),
            _ => {}
        }
        return true;
    }

    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return false;
    }
    match key.code {
        KeyCode::Esc if view.search.is_some() => view.search = None,
        KeyCode::Char('q') | KeyCode::Esc => return false,
        KeyCode::Tab if !ids.is_empty() => {
            view.selected = (view.selected + 1) % ids.len();
            view.search = None;
        }
        KeyCode::Char('/') => view.input = Input::Search(String::new()),
        KeyCode::Char('n') => {
            if let Some(cursor) = view.search.as_mut() {
                cursor.next();
            }
        }
        KeyCode::Char('N') => {
            if let Some(cursor) = view.search.as_mut() {
                cursor.prev();
            }
        }
        KeyCode::Char('r') => {
            monitor.reset_ignored();
            view.status = "ignore list cleared".to_string();
        }
        KeyCode::Char('i') => {
            if let Some(id) = &current {
                monitor.ignore(id);
                view.status = format!("ignoring {}", id);
            }
        }
        KeyCode::Char(c) => {
            let Some(handle) = current.as_deref().and_then(|id| monitor.get(id)) else {
                return true;
            };
            let status = handle.status();
            match c {
                'p' if status.state == ChannelState::Paused => handle.resume(),
                'p' => handle.pause(),
                'f' if status.state == ChannelState::Frozen => handle.scrolled_to_bottom(),
                'f' => handle.freeze(),
                'm' if status.state == ChannelState::Minimized => handle.restore(),
                'm' => handle.minimize(),
                'l' => handle.set_logging(!status.logging),
                'c' => handle.clear(),
                's' => view.input = Input::Line(String::new()),
                _ => {}
            }
        }
        _ => {}
    }
    true
}

async fn run_monitor(
    mut monitor: Monitor,
    events: crossbeam::channel::Receiver<Event>,
    auto: bool,
    log_all: bool,
) -> io::Result<()> {
    let mut reader = EventStream::new();
    let mut view = View {
        selected: 0,
        status: String::new(),
        input: Input::Keys,
        search: None,
        drawn: None,
    };
    let refresh = monitor.config().flush_interval();
    let scan_interval = monitor.config().scan_interval();
    let mut last_scan: Option<Instant> = None;

    'drawing: loop {
        let mut delay = Delay::new(refresh).fuse();
        let mut event = reader.next().fuse();

        select! {
            _ = delay => {
                if auto && last_scan.map_or(true, |t| t.elapsed() >= scan_interval) {
                    last_scan = Some(Instant::now());
                    match monitor.scan() {
                        Ok(changes) => {
                            if log_all {
                                for id in &changes.opened {
                                    if let Some(handle) = monitor.get(id) {
                                        handle.set_logging(true);
                                    }
                                }
                            }
                            if !changes.busy.is_empty() {
                                view.status = format!("busy: {}", changes.busy.join(", "));
                            }
                        }
                        Err(err) => {
                            warn!("port scan failed: {}", err);
                            view.status = format!("port scan failed: {}", err);
                        }
                    }
                }
                let mut force = false;
                for status in events.try_iter() {
                    view.status = describe(&status);
                    force = true;
                }
                draw(&monitor, &mut view, force)?;
            },
            some_event = event => {
                match some_event {
                    Some(Ok(TermEvent::Key(key))) => {
                        if !handle_key(&mut monitor, &mut view, key) {
                            break 'drawing;
                        }
                        draw(&monitor, &mut view, true)?;
                    }
                    Some(Ok(TermEvent::Resize(..))) => draw(&monitor, &mut view, true)?,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => view.status = format!("terminal error: {}", e),
                    None => break 'drawing,
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    if cli.enumerate {
        for port in enum_ports(cli.all) {
            println!("serial://{}", port);
        }
        return ExitCode::SUCCESS;
    }

    let config = match cli.common.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let highlights = cli.common.open_highlights(&config);
    let (tx, events) = crossbeam::channel::bounded(256);
    let mut monitor = Monitor::new(config, highlights, Some(tx));

    for url in &cli.urls {
        match monitor.open(url) {
            Ok(handle) => {
                if cli.log {
                    handle.set_logging(true);
                }
                log!("%T%.3f ", "opened {}", url);
            }
            Err(err) => {
                eprintln!("ERROR: cannot open {}: {}", url, err);
                return ExitCode::FAILURE;
            }
        }
    }
    if cli.urls.is_empty() && !cli.auto {
        eprintln!("ERROR: nothing to monitor, give a port or use --auto");
        return ExitCode::FAILURE;
    }

    let result = (|| -> io::Result<()> {
        let mut out = stdout();
        enable_raw_mode()?;
        out.execute(EnterAlternateScreen)?;
        out.execute(Hide)?;
        let result = async_std::task::block_on(run_monitor(monitor, events, cli.auto, cli.log));
        out.execute(LeaveAlternateScreen)?;
        out.execute(Show)?;
        disable_raw_mode()?;
        result
    })();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            ExitCode::FAILURE
        }
    }
}
