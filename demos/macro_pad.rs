//! Terminal macro pad for a HEOS receiver and an LG webOS TV
//!
//! Usage: `cargo run --example macro_pad -- <receiver-ip> <tv-ip>`
//!
//! Keys 1-7 run the same macros as an eight-button hardware pad: each one
//! connects, sends its commands and disconnects again. The discovered player
//! id and the TV's client key are saved to `macro_pad.json` so later runs
//! skip discovery and pairing. Logs go to `macro_pad.log`.

use av_remote::{InputId, InputSource, Receiver, Television};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

const STATE_FILE: &str = "macro_pad.json";
const LOG_FILE: &str = "macro_pad.log";

/// Identifiers kept between runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Saved {
    player_id: Option<i64>,
    client_key: Option<String>,
}

impl Saved {
    fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    fn store(&self, path: &Path) -> io::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
    }
}

#[derive(Debug, Clone, Copy)]
enum Macro {
    Receiver { input: Option<InputSource>, volume: u8 },
    Television(InputId),
}

impl Macro {
    fn for_key(key: char) -> Option<Self> {
        let action = match key {
            '1' => Self::Receiver { input: None, volume: 20 },
            '2' => Self::Receiver { input: Some(InputSource::UsbDac), volume: 25 },
            '3' => Self::Receiver { input: Some(InputSource::OpticalIn1), volume: 30 },
            '4' => Self::Television(InputId::Hdmi1),
            '5' => Self::Television(InputId::Hdmi2),
            '6' => Self::Television(InputId::Hdmi3),
            '7' => Self::Television(InputId::Hdmi4),
            _ => return None,
        };
        Some(action)
    }

    fn describe(self) -> String {
        match self {
            Self::Receiver { input: None, volume } => format!("AVR volume {}", volume),
            Self::Receiver { input: Some(input), volume } => {
                format!("AVR {} at volume {}", input, volume)
            }
            Self::Television(input) => format!("TV input {}", input),
        }
    }
}

/// Progress reported by a running macro
enum Update {
    Status(String),
    PlayerId(i64),
    ClientKey(String),
}

struct App {
    receiver: Arc<Receiver>,
    television: Arc<Television>,
    receiver_host: String,
    tv_host: String,
    saved: Saved,
    busy: bool,
    status_message: String,
    updates_tx: mpsc::UnboundedSender<Update>,
    updates_rx: mpsc::UnboundedReceiver<Update>,
}

impl App {
    fn new(receiver_host: String, tv_host: String, saved: Saved) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        Self {
            receiver: Arc::new(Receiver::new()),
            television: Arc::new(Television::new()),
            receiver_host,
            tv_host,
            saved,
            busy: false,
            status_message: "Press 1-7 to run a macro, q to quit".to_string(),
            updates_tx,
            updates_rx,
        }
    }

    fn run_macro(&mut self, action: Macro) {
        if self.busy {
            self.status_message = "A macro is still running".to_string();
            return;
        }
        self.busy = true;
        self.status_message = format!("Running: {}", action.describe());

        let updates = self.updates_tx.clone();
        match action {
            Macro::Receiver { input, volume } => {
                let receiver = self.receiver.clone();
                let host = self.receiver_host.clone();
                let pid = self.saved.player_id;
                tokio::spawn(async move {
                    let result = async {
                        receiver.connect(&host, pid).await?;
                        if let Some(input) = input {
                            receiver.play_input(input)?;
                        }
                        receiver.set_volume(volume)?;
                        if let Some(pid) = receiver.player_id() {
                            let _ = updates.send(Update::PlayerId(pid));
                        }
                        Ok::<_, av_remote::RemoteError>(())
                    }
                    .await;
                    receiver.disconnect().await;
                    let _ = updates.send(Update::Status(finished("AVR", action, result)));
                });
            }
            Macro::Television(input) => {
                let television = self.television.clone();
                let host = self.tv_host.clone();
                let key = self.saved.client_key.clone();
                if key.is_none() {
                    self.status_message = "Pairing: accept the prompt on the TV".to_string();
                }
                tokio::spawn(async move {
                    let result = async {
                        television.connect(&host, key).await?;
                        television.switch_input(input)?;
                        if let Some(key) = television.client_key() {
                            let _ = updates.send(Update::ClientKey(key));
                        }
                        Ok::<_, av_remote::RemoteError>(())
                    }
                    .await;
                    television.disconnect().await;
                    let _ = updates.send(Update::Status(finished("TV", action, result)));
                });
            }
        }
    }

    fn handle_updates(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            match update {
                Update::Status(message) => {
                    self.busy = false;
                    self.status_message = message;
                }
                Update::PlayerId(pid) => {
                    self.saved.player_id = Some(pid);
                    self.persist();
                }
                Update::ClientKey(key) => {
                    self.saved.client_key = Some(key);
                    self.persist();
                }
            }
        }
    }

    fn persist(&mut self) {
        if let Err(e) = self.saved.store(Path::new(STATE_FILE)) {
            tracing::error!("Failed to save {}: {}", STATE_FILE, e);
            self.status_message = format!("Failed to save {}: {}", STATE_FILE, e);
        }
    }
}

fn finished(device: &str, action: Macro, result: av_remote::Result<()>) -> String {
    match result {
        Ok(()) => format!("Done: {}", action.describe()),
        Err(e) => {
            tracing::error!("({}) {} failed: {}", device, action.describe(), e);
            format!("({}) {} failed: {}", device, action.describe(), e)
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([Constraint::Min(0), Constraint::Length(3)])
        .split(f.size());

    let panes = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(chunks[0]);

    render_macros(f, panes[0]);
    render_devices(f, app, panes[1]);
    render_status(f, app, chunks[1]);
}

fn render_macros(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Macros (1-7, q to quit) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let items: Vec<ListItem> = ('1'..='7')
        .filter_map(|key| Macro::for_key(key).map(|action| (key, action)))
        .map(|(key, action)| {
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("[{}] ", key),
                    Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
                ),
                Span::raw(action.describe()),
            ]))
        })
        .collect();

    f.render_widget(List::new(items).block(block), area);
}

fn render_devices(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Devices ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::Yellow));
    let lines = vec![
        Line::from(vec![label("Receiver: "), Span::raw(app.receiver_host.clone())]),
        Line::from(vec![label("  State: "), Span::raw(format!("{:?}", app.receiver.state()))]),
        Line::from(vec![
            label("  Player: "),
            Span::raw(app.saved.player_id.map_or("-".to_string(), |pid| pid.to_string())),
        ]),
        Line::from(""),
        Line::from(vec![label("TV: "), Span::raw(app.tv_host.clone())]),
        Line::from(vec![label("  State: "), Span::raw(format!("{:?}", app.television.state()))]),
        Line::from(vec![
            label("  Paired: "),
            Span::raw(if app.saved.client_key.is_some() { "yes" } else { "no" }),
        ]),
    ];

    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .title(" Status ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Gray));

    let text = Paragraph::new(app.status_message.clone())
        .block(block)
        .wrap(Wrap { trim: true });

    f.render_widget(text, area);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(receiver_host), Some(tv_host)) = (args.next(), args.next()) else {
        eprintln!("usage: macro_pad <receiver-ip> <tv-ip>");
        std::process::exit(2);
    };

    // The terminal belongs to the UI, so logs go to a file
    let log = File::create(LOG_FILE)?;
    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log))
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let saved = Saved::load(Path::new(STATE_FILE));

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(receiver_host, tv_host, saved);
    let res = run_app(&mut terminal, &mut app).await;

    app.receiver.disconnect().await;
    app.television.disconnect().await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {}", err);
    }

    Ok(())
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<(), Box<dyn std::error::Error>> {
    loop {
        app.handle_updates();
        terminal.draw(|f| ui(f, app))?;

        if event::poll(std::time::Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char(c) => {
                            if let Some(action) = Macro::for_key(c) {
                                app.run_macro(action);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}
