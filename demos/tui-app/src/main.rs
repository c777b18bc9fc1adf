//! Terminal front end for cmdlink command servers.
//!
//! Run with: cargo run -p cmdlink-tui -- --server localhost
//!
//! The console runs in its own task; the UI loop talks to it over channels
//! and drains client events between frames.

mod input;

use std::{future::Future, io, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use cmdlink_client::{Console, FirstServer, MulticastDiscovery, Outcome};
use cmdlink_core::{
    ChannelSink, ClientConfig, ClientEvent, Completion, ConnectionState, StatusSnapshot,
    events::EVENT_CHANNEL_CAPACITY,
};
use cmdlink_transport::JsonLineConnector;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};
use tokio::sync::mpsc;

use crate::input::{Action, LineEditor, handle_key};

#[derive(Parser, Debug)]
#[command(
    name = "cmdlink",
    about = "Terminal client for cmdlink command servers",
    version
)]
struct Args {
    /// Configuration file (defaults to <config_dir>/cmdlink/client.toml)
    #[arg(short, long, env = "CMDLINK_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Server to connect to at startup
    #[arg(short, long)]
    server: Option<String>,

    /// Server port
    #[arg(short, long)]
    port: Option<u16>,

    /// Request TLS
    #[arg(long)]
    tls: bool,

    /// Discover servers via multicast at startup
    #[arg(long)]
    discover: bool,

    /// Write logs to this file
    #[arg(long, env = "CMDLINK_LOG_FILE", value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log filter used with --log-file
    #[arg(long, env = "CMDLINK_LOG", default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(&self, config: &mut ClientConfig) {
        if let Some(server) = &self.server {
            config.server.address = Some(server.clone());
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.tls {
            config.server.use_tls = true;
        }
        if self.discover {
            config.server.auto_discover = true;
        }
    }
}

fn init_logging(file: Option<&std::path::Path>, level: &str) -> anyhow::Result<()> {
    // Logging to the terminal would corrupt the UI.
    let Some(path) = file else {
        return Ok(());
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_file.as_deref(), &args.log_level)?;

    let mut config =
        ClientConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, config).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// Work for the console task.
enum Request {
    Submit(String),
    Login { username: String, password: String },
    Complete(String),
    ShowSuggestions(Vec<String>),
    HistoryPrevious,
    HistoryNext,
    /// Abandon the submit or login in flight.
    Cancel,
    Shutdown,
}

/// Answer from the console task.
enum Reply {
    Submitted(Result<Outcome, String>),
    LoggedIn(Result<(), String>),
    Completed(Completion),
    History(Option<String>),
    Cancelled,
    Failed(String),
    ShutDown,
}

/// Why a request in flight was abandoned.
enum Interrupt {
    Cancel,
    Shutdown,
}

/// Wait for a cancel or shutdown request, dropping anything else.
async fn interruption(requests: &mut mpsc::UnboundedReceiver<Request>) -> Interrupt {
    while let Some(request) = requests.recv().await {
        match request {
            Request::Cancel => return Interrupt::Cancel,
            Request::Shutdown => return Interrupt::Shutdown,
            _ => tracing::debug!("Console busy, request dropped"),
        }
    }
    Interrupt::Shutdown
}

/// Run `work` unless a cancel or shutdown request arrives first.
///
/// Losing the race drops `work`, which cancels its remote call.
async fn interruptible<F: Future>(
    work: F,
    requests: &mut mpsc::UnboundedReceiver<Request>,
) -> Result<F::Output, Interrupt> {
    tokio::select! {
        output = work => Ok(output),
        interrupt = interruption(requests) => Err(interrupt),
    }
}

async fn startup(console: &mut Console, replies: &mpsc::UnboundedSender<Reply>) {
    if let Err(e) = console.load_state().await {
        tracing::warn!("Failed to load saved state: {e}");
        let _ = replies.send(Reply::Failed(format!("Failed to load saved state: {e}")));
    }

    let server = console.config().server.clone();
    let result = if server.auto_discover {
        match MulticastDiscovery::from_config(&server) {
            Ok(discovery) => console
                .session()
                .discover_and_connect(&discovery, &FirstServer, console.config().discover_timeout())
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        }
    } else if let Some(address) = &server.address {
        console
            .session()
            .connect(address, server.port, server.use_tls)
            .await
            .map(|_| ())
    } else {
        Ok(())
    };

    if let Err(e) = result {
        let _ = replies.send(Reply::Failed(e.to_string()));
    }
}

async fn run_console(
    mut console: Console,
    mut requests: mpsc::UnboundedReceiver<Request>,
    replies: mpsc::UnboundedSender<Reply>,
) {
    startup(&mut console, &replies).await;

    while let Some(request) = requests.recv().await {
        let reply = match request {
            Request::Submit(line) => {
                match interruptible(console.submit(&line), &mut requests).await {
                    Ok(result) => Reply::Submitted(result.map_err(|e| e.to_string())),
                    Err(Interrupt::Cancel) => Reply::Cancelled,
                    Err(Interrupt::Shutdown) => break,
                }
            }
            Request::Login { username, password } => {
                match interruptible(console.login(&username, &password), &mut requests).await {
                    Ok(result) => Reply::LoggedIn(result.map(|_| ()).map_err(|e| e.to_string())),
                    Err(Interrupt::Cancel) => Reply::Cancelled,
                    Err(Interrupt::Shutdown) => break,
                }
            }
            Request::Complete(text) => Reply::Completed(console.complete(&text).await),
            Request::ShowSuggestions(suggestions) => {
                console.show_suggestions(&suggestions).await;
                continue;
            }
            Request::HistoryPrevious => Reply::History(console.history_previous()),
            Request::HistoryNext => Reply::History(console.history_next()),
            Request::Cancel => continue,
            Request::Shutdown => break,
        };
        if replies.send(reply).is_err() {
            break;
        }
    }

    if let Err(e) = console.shutdown().await {
        tracing::warn!("Failed to save state: {e}");
    }
    let _ = replies.send(Reply::ShutDown);
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Echo,
    Output,
    Notice,
    Error,
    Completed,
}

enum Mode {
    Command,
    Username,
    Password { username: String },
}

struct App {
    lines: Vec<(Kind, String)>,
    editor: LineEditor,
    mode: Mode,
    back: u16,
    status: StatusSnapshot,
    busy: bool,
}

impl App {
    fn new() -> Self {
        let mut app = Self {
            lines: Vec::new(),
            editor: LineEditor::default(),
            mode: Mode::Command,
            back: 0,
            status: StatusSnapshot::default(),
            busy: false,
        };
        app.push(Kind::Notice, "cmdlink - type 'help' for local commands");
        app
    }

    fn push(&mut self, kind: Kind, text: &str) {
        for line in text.lines() {
            let clean: String = line
                .chars()
                .filter(|c| !c.is_control() || *c == '\t')
                .collect();
            self.lines.push((kind, clean));
        }
        self.back = 0;
    }

    fn on_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Output(text) => self.push(Kind::Output, &text),
            ClientEvent::Notice(text) => self.push(Kind::Notice, &text),
            ClientEvent::Error(text) => self.push(Kind::Error, &format!("Error: {text}")),
            ClientEvent::Completed(text) => {
                self.push(Kind::Completed, &format!("Completed: {text}"));
            }
            ClientEvent::Status(status) => self.status = status,
        }
    }

    /// Returns `true` when the application should exit.
    fn on_reply(&mut self, reply: Reply, requests: &mpsc::UnboundedSender<Request>) -> bool {
        match reply {
            Reply::Submitted(result) => {
                self.busy = false;
                match result {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::Exit) => return true,
                    Ok(Outcome::ClearScreen) => self.lines.clear(),
                    Ok(Outcome::PromptLogin { username }) => {
                        self.mode = match username {
                            Some(username) => Mode::Password { username },
                            None => Mode::Username,
                        };
                    }
                    Err(e) => self.push(Kind::Error, &format!("Error: {e}")),
                }
            }
            Reply::LoggedIn(result) => {
                self.busy = false;
                if let Err(e) = result {
                    self.push(Kind::Error, &format!("Error: {e}"));
                }
            }
            Reply::Completed(completion) => self.apply_completion(completion, requests),
            Reply::History(Some(text)) => self.editor.set(&text),
            Reply::History(None) => {}
            Reply::Cancelled => {
                self.busy = false;
                self.push(Kind::Notice, "Cancelled");
            }
            Reply::Failed(e) => self.push(Kind::Error, &format!("Error: {e}")),
            Reply::ShutDown => return true,
        }
        false
    }

    fn apply_completion(
        &mut self,
        completion: Completion,
        requests: &mpsc::UnboundedSender<Request>,
    ) {
        match completion.suggestions.as_slice() {
            [] => {}
            [only] => self.editor.set(only),
            _ => {
                if completion.common_prefix.len() > self.editor.as_str().len() {
                    self.editor.set(&completion.common_prefix);
                }
                let _ = requests.send(Request::ShowSuggestions(completion.suggestions));
            }
        }
    }

    /// Handle Enter in the current mode.
    fn submit(&mut self, requests: &mpsc::UnboundedSender<Request>) {
        let text = self.editor.take();
        match std::mem::replace(&mut self.mode, Mode::Command) {
            Mode::Command => {
                if text.trim().is_empty() {
                    return;
                }
                self.push(Kind::Echo, &format!("> {text}"));
                self.busy = true;
                let _ = requests.send(Request::Submit(text));
            }
            Mode::Username => {
                let username = text.trim().to_string();
                if !username.is_empty() {
                    self.mode = Mode::Password { username };
                }
            }
            Mode::Password { username } => {
                self.busy = true;
                let _ = requests.send(Request::Login {
                    username,
                    password: text,
                });
            }
        }
    }
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    config: ClientConfig,
) -> anyhow::Result<()> {
    let mut app = App::new();

    let (sink, mut events) = ChannelSink::channel(EVENT_CHANNEL_CAPACITY);
    let connector = Arc::new(JsonLineConnector::new(config.timeouts.connect()));
    let console = Console::new(connector, Arc::new(sink), config);

    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_console(console, request_rx, reply_tx));

    loop {
        while let Ok(event) = events.try_recv() {
            app.on_event(event);
        }
        while let Ok(reply) = reply_rx.try_recv() {
            if app.on_reply(reply, &request_tx) {
                return shutdown(&request_tx, &mut reply_rx).await;
            }
        }

        terminal.draw(|f| ui(f, &app))?;

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match handle_key(&mut app.editor, &key) {
            Action::Quit => return shutdown(&request_tx, &mut reply_rx).await,
            Action::Cancel if app.busy => {
                let _ = request_tx.send(Request::Cancel);
            }
            Action::Cancel => {
                app.mode = Mode::Command;
                app.editor.take();
            }
            Action::Submit if !app.busy => app.submit(&request_tx),
            Action::Complete if !app.busy && matches!(app.mode, Mode::Command) => {
                let _ = request_tx.send(Request::Complete(app.editor.as_str().to_string()));
            }
            Action::HistoryPrevious if !app.busy && matches!(app.mode, Mode::Command) => {
                let _ = request_tx.send(Request::HistoryPrevious);
            }
            Action::HistoryNext if !app.busy && matches!(app.mode, Mode::Command) => {
                let _ = request_tx.send(Request::HistoryNext);
            }
            Action::ScrollUp(n) => app.back = app.back.saturating_add(n),
            Action::ScrollDown(n) => app.back = app.back.saturating_sub(n),
            _ => {}
        }
    }
}

async fn shutdown(
    requests: &mpsc::UnboundedSender<Request>,
    replies: &mut mpsc::UnboundedReceiver<Reply>,
) -> anyhow::Result<()> {
    if requests.send(Request::Shutdown).is_err() {
        return Ok(());
    }
    let wait = async {
        while let Some(reply) = replies.recv().await {
            if matches!(reply, Reply::ShutDown) {
                break;
            }
        }
    };
    if tokio::time::timeout(Duration::from_secs(3), wait).await.is_err() {
        tracing::warn!("Console did not shut down in time");
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Output
            Constraint::Length(3), // Input
            Constraint::Length(1), // Status
        ])
        .split(f.area());

    // Output area, pinned to the bottom unless scrolled back
    let visible = usize::from(chunks[0].height.saturating_sub(2));
    let end = app.lines.len().saturating_sub(usize::from(app.back));
    let start = end.saturating_sub(visible);
    let output_text: Vec<Line> = app.lines[start..end]
        .iter()
        .map(|(kind, text)| Line::styled(text.as_str(), style_for(*kind)))
        .collect();
    let output = Paragraph::new(output_text)
        .block(Block::default().borders(Borders::ALL).title("Output"));
    f.render_widget(output, chunks[0]);

    // Input area
    let (title, shown) = match &app.mode {
        Mode::Command if app.busy => ("Running...", app.editor.as_str().to_string()),
        Mode::Command => ("Input", app.editor.as_str().to_string()),
        Mode::Username => ("Username", app.editor.as_str().to_string()),
        Mode::Password { .. } => ("Password", "*".repeat(app.editor.as_str().chars().count())),
    };
    let input = Paragraph::new(shown)
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(input, chunks[1]);

    let column = u16::try_from(app.editor.cursor()).unwrap_or(u16::MAX);
    f.set_cursor_position((
        chunks[1].x.saturating_add(column).saturating_add(1),
        chunks[1].y + 1,
    ));

    // Status bar
    let status_style = match app.status.connection {
        ConnectionState::Connected => Style::default().fg(Color::Green),
        ConnectionState::ConnectionError => Style::default().fg(Color::Red),
        _ => Style::default().fg(Color::Yellow),
    };
    let status = Paragraph::new(Line::from(vec![
        Span::raw(" "),
        Span::styled(app.status.summary(), status_style),
        Span::raw(" | "),
        Span::styled("Ctrl+C", Style::default().fg(Color::Yellow)),
        Span::raw(" quit | "),
        Span::styled("Esc", Style::default().fg(Color::Yellow)),
        Span::raw(" cancel | "),
        Span::styled("Tab", Style::default().fg(Color::Yellow)),
        Span::raw(" complete | "),
        Span::styled("PgUp/PgDn", Style::default().fg(Color::Yellow)),
        Span::raw(" scroll "),
    ]));
    f.render_widget(status, chunks[2]);
}

fn style_for(kind: Kind) -> Style {
    match kind {
        Kind::Echo => Style::default().fg(Color::Yellow),
        Kind::Output => Style::default(),
        Kind::Notice => Style::default().fg(Color::Cyan),
        Kind::Error => Style::default().fg(Color::Red),
        Kind::Completed => Style::default().fg(Color::Green),
    }
}
