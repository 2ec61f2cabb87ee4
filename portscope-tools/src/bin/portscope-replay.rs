//! portscope-replay
//!
//! Lists archived channel logs and replays one with the current highlight
//! rules. Loading can be cancelled with q or Esc. Once loaded, / searches
//! the log and n/N step through the hits.

use clap::Parser;
use crossterm::event::{Event as TermEvent, EventStream, KeyCode, KeyEvent};
use crossterm::{cursor::*, style::*, terminal::*, ExecutableCommand, QueueableCommand};
use futures::{future::FutureExt, select, StreamExt};
use futures_timer::Delay;
use portscope::channel::{format_size, list_sessions};
use portscope::loader::{BulkLogLoader, CancellationToken, LoadEvent, LoadOutcome};
use portscope::sink::{self, OutputSink, SearchCursor, SharedSink};
use portscope_tools::{init_logging, tail_start, window_at, write_styled, CommonOpts};
use std::io::{self, stdout, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "portscope-replay",
    version,
    about = "List and replay archived channel logs"
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,

    /// Log file to replay; without it, the archived logs are listed
    file: Option<PathBuf>,

    /// Directory to list, instead of the configured log directory
    #[arg(short = 'd', long = "dir")]
    dir: Option<PathBuf>,

    /// Print the whole replay to stdout instead of using the terminal UI
    #[arg(long)]
    plain: bool,
}

fn list(dir: &std::path::Path) -> io::Result<()> {
    let logs = list_sessions(dir)?;
    if logs.is_empty() {
        println!("no logs in {}", dir.display());
    }
    for log in logs {
        let started = match &log.name {
            Some(name) => format!("{}  {}", name.started.format("%Y-%m-%d %H:%M:%S"), name.label),
            None => "-".to_string(),
        };
        println!(
            "{:>10}  {}  {}",
            format_size(log.size),
            started,
            log.path.display()
        );
    }
    Ok(())
}

fn outcome_line(outcome: &LoadOutcome) -> String {
    match outcome {
        LoadOutcome::Completed { lines } => format!("{} lines loaded, q to quit", lines),
        LoadOutcome::Cancelled => "cancelled, q to quit".to_string(),
        LoadOutcome::Failed(err) => format!("failed: {}, q to quit", err),
    }
}

#[derive(Default)]
struct Search {
    /// Term being typed, if the prompt is open.
    typing: Option<String>,
    cursor: Option<SearchCursor>,
}

impl Search {
    /// Returns false for keys it does not consume.
    fn handle_key(&mut self, key: KeyEvent, sink: &SharedSink) -> bool {
        if let Some(term) = &mut self.typing {
            match key.code {
                KeyCode::Enter => {
                    let cursor = SearchCursor::new(term, sink::lock(sink).text());
                    self.cursor = Some(cursor).filter(|c| !c.term().is_empty());
                    self.typing = None;
                }
                KeyCode::Esc => self.typing = None,
                KeyCode::Backspace => {
                    term.pop();
                }
                KeyCode::Char(c) => term.push(c),
                _ => {}
            }
            return true;
        }
        match key.code {
            KeyCode::Char('/') => self.typing = Some(String::new()),
            KeyCode::Esc if self.cursor.is_some() => self.cursor = None,
            KeyCode::Char(c @ ('n' | 'N')) => match self.cursor.as_mut() {
                Some(cursor) if c == 'n' => {
                    cursor.next();
                }
                Some(cursor) => {
                    cursor.prev();
                }
                None => return false,
            },
            _ => return false,
        }
        true
    }
}

fn draw(sink: &SharedSink, footer: &str, search: &Search) -> io::Result<()> {
    let snapshot = sink::lock(sink).snapshot();
    let (_, rows) = size()?;
    let mut out = stdout();
    out.queue(Clear(ClearType::All))?.queue(MoveTo(0, 0))?;
    let body_rows = rows.saturating_sub(2) as usize;
    let window = match search.cursor.as_ref().and_then(|c| c.current()) {
        Some(hit) => window_at(&snapshot.text, hit.start, body_rows),
        None => tail_start(&snapshot.text, body_rows)..snapshot.text.len(),
    };
    write_styled(&mut out, &snapshot, window, true)?;
    let footer = match (&search.typing, &search.cursor) {
        (Some(term), _) => format!("search> {}", term),
        (None, Some(cursor)) => format!("search {:?}: {}  {}", cursor.term(), cursor.counter(), footer),
        (None, None) => footer.to_string(),
    };
    out.queue(MoveTo(0, rows.saturating_sub(1)))?
        .queue(SetAttribute(Attribute::Reverse))?
        .queue(Print(footer))?
        .queue(SetAttribute(Attribute::Reset))?;
    out.flush()
}

async fn run_replay(loader: BulkLogLoader, path: PathBuf, sink: SharedSink) -> io::Result<()> {
    let token = CancellationToken::new();
    let progress = loader.spawn(path, sink.clone(), token.clone())?;
    let mut reader = EventStream::new();
    let mut footer = "loading 0%, q to cancel".to_string();
    let mut finished = false;
    let mut search = Search::default();

    'drawing: loop {
        let mut delay = Delay::new(Duration::from_millis(50)).fuse();
        let mut event = reader.next().fuse();

        select! {
            _ = delay => {
                for update in progress.try_iter() {
                    match update {
                        LoadEvent::Progress(pct) => footer = format!("loading {}%, q to cancel", pct),
                        LoadEvent::Finished(outcome) => {
                            footer = outcome_line(&outcome);
                            finished = true;
                        }
                    }
                }
                draw(&sink, &footer, &search)?;
            },
            some_event = event => {
                match some_event {
                    Some(Ok(TermEvent::Key(key))) => {
                        if finished && search.handle_key(key, &sink) {
                            draw(&sink, &footer, &search)?;
                        } else if key.code == KeyCode::Char('q') || key.code == KeyCode::Esc {
                            if finished {
                                break 'drawing;
                            }
                            token.cancel();
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => footer = format!("terminal error: {}", e),
                    None => break 'drawing,
                }
            }
        }
    }
    Ok(())
}

fn replay_plain(loader: &BulkLogLoader, path: &std::path::Path, sink: &SharedSink) -> io::Result<bool> {
    let outcome = loader.load(path, sink, &CancellationToken::new(), |_| {});
    let snapshot = sink::lock(sink).snapshot();
    write_styled(&mut stdout(), &snapshot, 0..snapshot.text.len(), false)?;
    Ok(matches!(outcome, LoadOutcome::Completed { .. }))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let config = match cli.common.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let Some(path) = cli.file else {
        let dir = cli.dir.unwrap_or_else(|| config.log_dir.clone());
        return match list(&dir) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("ERROR: cannot list {}: {}", dir.display(), err);
                ExitCode::FAILURE
            }
        };
    };

    let loader = BulkLogLoader::from_config(cli.common.open_highlights(&config), &config);
    let sink = OutputSink::shared(config.sink_capacity);

    let result = if cli.plain {
        replay_plain(&loader, &path, &sink).and_then(|ok| {
            if ok {
                Ok(())
            } else {
                Err(io::Error::new(io::ErrorKind::Other, "replay did not complete"))
            }
        })
    } else {
        (|| -> io::Result<()> {
            let mut out = stdout();
            enable_raw_mode()?;
            out.execute(EnterAlternateScreen)?;
            out.execute(Hide)?;
            let result = async_std::task::block_on(run_replay(loader, path, sink));
            out.execute(LeaveAlternateScreen)?;
            out.execute(Show)?;
            disable_raw_mode()?;
            result
        })()
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {}", err);
            ExitCode::FAILURE
        }
    }
}
