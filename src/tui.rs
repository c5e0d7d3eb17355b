use crate::app::{self, ChatApp, StreamEvent};
use crate::cli::Args;
use crate::config::Config;
use crate::registry::PersonaId;
use crate::store::{MessageStatus, Role};
use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use tokio::sync::mpsc;

pub async fn run_tui(cfg: Option<&Config>, args: Args) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let provider_name = args
        .provider
        .or_else(|| cfg.and_then(|c| c.provider.clone()))
        .unwrap_or_else(|| "google".to_string());
    let provider = app::build_provider(&http, cfg, &provider_name);

    let model = args
        .model
        .or_else(|| cfg.and_then(|c| c.model.clone()))
        .unwrap_or_else(|| app::DEFAULT_MODEL.to_string());

    let active = args
        .chat
        .as_deref()
        .and_then(PersonaId::parse)
        .unwrap_or(PersonaId::Gemini);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<StreamEvent>();
    let mut chat = ChatApp::new(provider, model, active, events_tx);

    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        loop {
            match crossterm::event::read() {
                Ok(ev) => {
                    if ev_tx.send(ev).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut input = String::new();
    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = draw(&mut terminal, &chat, &input) {
                    break Err(e);
                }
            }
            Some(ev) = ev_rx.recv() => {
                match ev {
                    Event::Key(key) => {
                        if handle_key(key, &mut input, &mut chat) {
                            break Ok(());
                        }
                    }
                    Event::Resize(_, _) => {}
                    _ => {}
                }
            }
            Some(msg) = events_rx.recv() => {
                chat.handle_event(msg);
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Returns true when the app should quit.
fn handle_key(key: KeyEvent, input: &mut String, chat: &mut ChatApp) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => return true,
            // "New chat" for the active persona.
            KeyCode::Char('n') => {
                chat.reset(chat.active());
                return false;
            }
            _ => {}
        }
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Tab => {
            chat.set_active(neighbor(chat.active(), 1));
        }
        KeyCode::BackTab => {
            chat.set_active(neighbor(chat.active(), -1));
        }
        KeyCode::Char(c) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Enter => {
            let msg = std::mem::take(input);
            // Empty input and in-flight sends are ignored inside send.
            chat.send(chat.active(), &msg);
        }
        _ => {}
    }

    false
}

fn neighbor(id: PersonaId, step: isize) -> PersonaId {
    let n = PersonaId::ALL.len() as isize;
    let cur = PersonaId::ALL
        .iter()
        .position(|&p| p == id)
        .unwrap_or(0) as isize;
    PersonaId::ALL[((cur + step + n) % n) as usize]
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    chat: &ChatApp,
    input: &str,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Length(32), Constraint::Min(1)])
            .split(f.area());

        f.render_widget(sidebar(chat), columns[0]);

        let has_banner = chat.banner().is_some();
        let rows = if has_banner {
            Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(1), Constraint::Length(3), Constraint::Length(3)])
                .split(columns[1])
        } else {
            Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(1), Constraint::Length(3)])
                .split(columns[1])
        };

        f.render_widget(conversation(chat), rows[0]);

        if let Some(banner) = chat.banner() {
            let w = Paragraph::new(banner.to_string())
                .style(Style::default().fg(Color::Red))
                .block(Block::default().borders(Borders::ALL).title("error"))
                .wrap(Wrap { trim: true });
            f.render_widget(w, rows[1]);
        }

        let input_area = rows[rows.len() - 1];
        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("message"));
        f.render_widget(input_w, input_area);

        let x = input_area.x + 1 + input.chars().count() as u16;
        let y = input_area.y + 1;
        f.set_cursor_position((x.min(input_area.x + input_area.width.saturating_sub(2)), y));
    })?;
    Ok(())
}

fn sidebar(chat: &ChatApp) -> Paragraph<'static> {
    let mut text = Text::default();
    for id in PersonaId::ALL {
        let persona = id.persona();
        let name_style = if id == chat.active() {
            Style::default().add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default().add_modifier(Modifier::BOLD)
        };
        text.lines.push(Line::styled(persona.display_name, name_style));

        let preview = if chat.is_loading(id) {
            Line::styled("typing...", Style::default().fg(Color::Green))
        } else {
            let p = chat.store().preview(id);
            if p.is_error {
                Line::styled("Error", Style::default().fg(Color::Red))
            } else {
                Line::styled(truncate(&p.text, 28), Style::default().fg(Color::DarkGray))
            }
        };
        text.lines.push(preview);
        text.lines.push(Line::from(""));
    }

    Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("chats"))
}

fn conversation(chat: &ChatApp) -> Paragraph<'static> {
    let active = chat.active();
    let persona = active.persona();

    let mut text = Text::default();
    for msg in chat.store().messages(active) {
        let (label, style) = match (msg.role, msg.status) {
            (Role::User, _) => ("You: ", Style::default().add_modifier(Modifier::BOLD)),
            (Role::Assistant, MessageStatus::Error) => {
                (persona.display_name, Style::default().fg(Color::Red))
            }
            (Role::Assistant, MessageStatus::Normal) => {
                (persona.display_name, Style::default().fg(Color::Cyan))
            }
        };
        text.lines.push(Line::styled(label.to_string(), style));

        // Streaming placeholder shows a typing mark until the first fragment.
        if msg.content.is_empty() && chat.is_loading(active) {
            text.lines.push(Line::from("..."));
        } else {
            text.lines.extend(Text::from(msg.content.clone()).lines);
        }
        text.lines.push(Line::from(""));
    }

    Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title(format!(
            "{} (model: {})",
            persona.display_name,
            chat.model()
        )))
        .wrap(Wrap { trim: false })
}

fn truncate(s: &str, max_chars: usize) -> String {
    let flat: String = s
        .chars()
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut out: String = flat.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
