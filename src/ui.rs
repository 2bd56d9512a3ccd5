use crate::client::{ApiClient, ApiError};
use crate::protocol::{ChatRequest, StoredMessage, StreamEvent};
use crate::reply::PendingReply;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 6;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl TerminalGuard {
    fn new() -> Self {
        Self
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

#[derive(Debug, Clone)]
pub enum ChatMessage {
    User(String),
    Assistant(String),
    Thoughts(String),
    ToolResult { name: String, result: String },
    Info(String),
}

#[derive(Debug, Clone)]
struct LineSpec {
    text: String,
    style: Style,
}

impl LineSpec {
    fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

impl ChatMessage {
    fn line_specs(&self) -> Vec<LineSpec> {
        match self {
            ChatMessage::User(msg) => {
                let header_style = Style::default()
                    .fg(Color::Blue)
                    .add_modifier(Modifier::BOLD);
                let body_style = Style::default().fg(Color::Blue);
                let mut lines = vec![LineSpec::new("You:", header_style)];
                for line in msg.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), body_style));
                }
                lines
            }
            ChatMessage::Assistant(msg) => {
                let header_style = Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD);
                let body_style = Style::default().fg(Color::Yellow);
                let mut lines = vec![LineSpec::new("JARVIS:", header_style)];
                for line in msg.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), body_style));
                }
                lines
            }
            ChatMessage::Thoughts(msg) => {
                let style = Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC);
                let thoughts = Self::truncate(msg, 400, "...\n[thoughts truncated]");
                let mut lines = vec![LineSpec::new("thoughts:", style)];
                for line in thoughts.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), style));
                }
                lines
            }
            ChatMessage::ToolResult { name, result } => {
                let header_style = Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD);
                let body_style = Style::default().fg(Color::Cyan);
                let result_str = Self::truncate(result, 300, "...\n[output truncated]");
                let mut lines = vec![LineSpec::new(format!("→ {}:", name), header_style)];
                for line in result_str.lines() {
                    lines.push(LineSpec::new(format!("  {}", line), body_style));
                }
                lines
            }
            ChatMessage::Info(msg) => vec![LineSpec::new(
                format!("ℹ {}", msg),
                Style::default()
                    .fg(Color::Gray)
                    .add_modifier(Modifier::ITALIC),
            )],
        }
    }

    fn to_text(&self) -> Text<'static> {
        let lines = self
            .line_specs()
            .into_iter()
            .map(|spec| Line::from(Span::styled(spec.text, spec.style)))
            .collect::<Vec<_>>();
        Text::from(lines)
    }

    fn plain_lines(&self) -> Vec<String> {
        self.line_specs()
            .into_iter()
            .map(|spec| spec.text)
            .collect()
    }

    fn rendered_height(&self, width: u16) -> u16 {
        let width = width.max(1) as usize;
        let mut total = 0usize;
        for line in self.plain_lines() {
            let len = line.len().max(1);
            total += (len + width - 1) / width;
        }
        total as u16
    }

    fn truncate(value: &str, max: usize, suffix: &str) -> String {
        if value.len() > max {
            // back up to a char boundary so the cut never splits a
            // multi-byte character
            let mut end = max.min(value.len());
            while !value.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}{}", &value[..end], suffix)
        } else {
            value.to_string()
        }
    }
}

#[derive(Debug)]
pub enum UiEvent {
    Stream(StreamEvent),
    StreamClosed(Option<String>),
    Cancelled,
    Quit,
}

enum ReplyOutcome {
    Complete,
    Failed(String),
    Cancelled,
}

struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        self.lines = vec![String::new()];
        self.cursor_x = 0;
        self.cursor_y = 0;
    }

    // cursor_x counts characters, not bytes; convert before touching the
    // string so multi-byte input never lands inside a char boundary.
    fn byte_index(line: &str, char_idx: usize) -> usize {
        line.char_indices()
            .nth(char_idx)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len())
    }

    fn char_count(line: &str) -> usize {
        line.chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let line = &mut self.lines[self.cursor_y];
        let idx = Self::byte_index(line, self.cursor_x);
        line.insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            let line = &mut self.lines[self.cursor_y];
            let idx = Self::byte_index(line, self.cursor_x - 1);
            line.remove(idx);
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            let prev_line = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = Self::char_count(&self.lines[self.cursor_y]);
            self.lines[self.cursor_y].push_str(&prev_line);
        }
    }

    fn new_line(&mut self) {
        let line = &self.lines[self.cursor_y];
        let remaining: String = line.chars().skip(self.cursor_x).collect();
        self.lines[self.cursor_y] = line.chars().take(self.cursor_x).collect();
        self.lines.insert(self.cursor_y + 1, remaining);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = Self::char_count(&self.lines[self.cursor_y]);
        }
    }

    fn move_right(&mut self) {
        let line_len = Self::char_count(&self.lines[self.cursor_y]);
        if self.cursor_x < line_len {
            self.cursor_x += 1;
        } else if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn move_up(&mut self) {
        if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.cursor_x.min(Self::char_count(&self.lines[self.cursor_y]));
        }
    }

    fn move_down(&mut self) {
        if self.cursor_y < self.lines.len() - 1 {
            self.cursor_y += 1;
            self.cursor_x = self.cursor_x.min(Self::char_count(&self.lines[self.cursor_y]));
        }
    }

    fn to_string(&self) -> String {
        self.lines.join("\n")
    }

    fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| l.is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.is_empty() {
            return Text::from(Span::styled(
                "Type your message here...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(
            self.lines
                .iter()
                .map(|l| Line::from(l.clone()))
                .collect::<Vec<_>>(),
        )
    }
}

impl Default for InputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub struct App {
    messages: Vec<ChatMessage>,
    input: InputBuffer,
    should_quit: bool,
    sender: mpsc::UnboundedSender<UiEvent>,
    receiver: mpsc::UnboundedReceiver<UiEvent>,
    is_sending: bool,
    client: Arc<ApiClient>,
    session_id: Option<String>,
    pending: Option<PendingReply>,
    cancel: Option<CancellationToken>,
}

impl App {
    pub fn new(client: ApiClient, session_id: Option<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            messages: Vec::new(),
            input: InputBuffer::new(),
            should_quit: false,
            sender,
            receiver,
            is_sending: false,
            client: Arc::new(client),
            session_id,
            pending: None,
            cancel: None,
        }
    }

    fn draw(&mut self, f: &mut Frame) {
        let area = f.area();
        let title = if self.is_sending {
            " Input (Esc to cancel reply) [Streaming...] "
        } else {
            " Input (Enter to send, Esc to quit) "
        };

        let input_paragraph = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });

        f.render_widget(input_paragraph, area);

        let position = Self::cursor_position(area, self.input.cursor_x, self.input.cursor_y);
        f.set_cursor_position(position);
    }

    // Clamps the cursor inside the input border; saturates so a
    // terminal narrower or shorter than the border does not underflow.
    fn cursor_position(area: Rect, cursor_x: usize, cursor_y: usize) -> (u16, u16) {
        let x = (area.x + cursor_x as u16 + 1).min(area.x + area.width.saturating_sub(2));
        let y = (area.y + 1 + cursor_y as u16).min(area.y + area.height.saturating_sub(2));
        (x, y)
    }

    fn append_message(&mut self, terminal: &mut TuiTerminal, message: ChatMessage) -> UiResult<()> {
        let width = terminal.size()?.width;
        let height = message.rendered_height(width).saturating_add(1);
        let mut text = message.to_text();
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            let paragraph = Paragraph::new(text).wrap(Wrap { trim: false });
            paragraph.render(buf.area, buf);
        })?;
        self.messages.push(message);
        Ok(())
    }

    fn replay_history(
        &mut self,
        terminal: &mut TuiTerminal,
        history: Vec<StoredMessage>,
    ) -> UiResult<()> {
        for stored in history {
            match stored.role.as_str() {
                "user" => self.append_message(terminal, ChatMessage::User(stored.content))?,
                _ => {
                    if let Some(tools) = stored.tool_results {
                        for tool in tools {
                            self.append_message(
                                terminal,
                                ChatMessage::ToolResult {
                                    name: tool.tool_name,
                                    result: tool.result,
                                },
                            )?;
                        }
                    }
                    self.append_message(terminal, ChatMessage::Assistant(stored.content))?;
                }
            }
        }
        Ok(())
    }

    fn start_send(&mut self, message: String) {
        self.is_sending = true;
        self.pending = Some(PendingReply::new());

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let mut request = ChatRequest::text(message);
        request.session_id = self.session_id.clone();

        let client = Arc::clone(&self.client);
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let events = sender.clone();
            let result = client
                .stream_chat(&request, &cancel, |event| {
                    let _ = events.send(UiEvent::Stream(event));
                })
                .await;

            let _ = match result {
                Ok(()) => sender.send(UiEvent::StreamClosed(None)),
                Err(ApiError::Cancelled) => sender.send(UiEvent::Cancelled),
                Err(err) => sender.send(UiEvent::StreamClosed(Some(err.to_string()))),
            };
        });
    }

    fn finish_reply(&mut self, terminal: &mut TuiTerminal, outcome: ReplyOutcome) -> UiResult<()> {
        let Some(mut reply) = self.pending.take() else {
            self.is_sending = false;
            self.cancel = None;
            return Ok(());
        };

        match outcome {
            ReplyOutcome::Complete => reply.finalized = true,
            ReplyOutcome::Failed(error) => reply.fail(&error),
            ReplyOutcome::Cancelled => reply.cancel(),
        }

        // The durable session id from `done` becomes the session for the
        // next send.
        if let Some(id) = reply.session_id.clone() {
            self.session_id = Some(id);
        }

        if !reply.thoughts.is_empty() {
            self.append_message(terminal, ChatMessage::Thoughts(reply.thoughts.clone()))?;
        }
        for tool in &reply.tool_results {
            self.append_message(
                terminal,
                ChatMessage::ToolResult {
                    name: tool.tool_name.clone(),
                    result: tool.result.clone(),
                },
            )?;
        }
        self.append_message(terminal, ChatMessage::Assistant(reply.message.clone()))?;

        self.is_sending = false;
        self.cancel = None;
        Ok(())
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        while let Ok(event) = self.receiver.try_recv() {
            match event {
                UiEvent::Stream(event) => {
                    if let Some(reply) = self.pending.as_mut() {
                        reply.apply(event);
                    }
                }
                UiEvent::StreamClosed(error) => {
                    let outcome = match error {
                        Some(error) => ReplyOutcome::Failed(error),
                        None => ReplyOutcome::Complete,
                    };
                    self.finish_reply(terminal, outcome)?;
                }
                UiEvent::Cancelled => {
                    self.finish_reply(terminal, ReplyOutcome::Cancelled)?;
                }
                UiEvent::Quit => {
                    self.should_quit = true;
                    return Ok(false);
                }
            }
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
                {
                    if let Some(cancel) = &self.cancel {
                        cancel.cancel();
                    }
                    self.should_quit = true;
                    let _ = self.sender.send(UiEvent::Quit);
                    return Ok(false);
                }

                match key.code {
                    KeyCode::Esc => {
                        // Esc cancels an in-flight reply; quits otherwise.
                        if let Some(cancel) = self.cancel.as_ref() {
                            cancel.cancel();
                        } else {
                            self.should_quit = true;
                            let _ = self.sender.send(UiEvent::Quit);
                            return Ok(false);
                        }
                    }
                    KeyCode::Enter => {
                        if key.modifiers.contains(KeyModifiers::SHIFT) {
                            self.input.new_line();
                        } else if !self.is_sending && !self.input.is_empty() {
                            let msg = self.input.to_string();
                            if !msg.trim().is_empty() {
                                self.append_message(terminal, ChatMessage::User(msg.clone()))?;
                                self.input.clear();
                                self.start_send(msg);
                            }
                        }
                    }
                    KeyCode::Char(c) => {
                        self.input.insert_char(c);
                    }
                    KeyCode::Backspace => {
                        self.input.delete_char();
                    }
                    KeyCode::Left => {
                        self.input.move_left();
                    }
                    KeyCode::Right => {
                        self.input.move_right();
                    }
                    KeyCode::Up => {
                        self.input.move_up();
                    }
                    KeyCode::Down => {
                        self.input.move_down();
                    }
                    KeyCode::Home => {
                        self.input.cursor_x = 0;
                    }
                    KeyCode::End => {
                        self.input.cursor_x =
                            InputBuffer::char_count(&self.input.lines[self.input.cursor_y]);
                    }
                    _ => {}
                }
            }
        }

        Ok(true)
    }
}

pub fn run_tui(
    client: ApiClient,
    session_id: Option<String>,
    history: Vec<StoredMessage>,
) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(INPUT_HEIGHT),
        },
    )?;

    let mut app = App::new(client, session_id);

    let _guard = TerminalGuard::new();

    app.replay_history(&mut terminal, history)?;

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;

        std::thread::sleep(Duration::from_millis(10));
    }

    disable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{App, ChatMessage, InputBuffer};
    use ratatui::layout::Rect;

    #[test]
    fn input_buffer_shift_enter_inserts_new_line() {
        let mut buffer = InputBuffer::new();
        for ch in "hello".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        for ch in "world".chars() {
            buffer.insert_char(ch);
        }

        assert_eq!(buffer.to_string(), "hello\nworld");
        assert_eq!(buffer.lines.len(), 2);
        assert_eq!(buffer.cursor_y, 1);
    }

    #[test]
    fn input_buffer_handles_multi_byte_characters() {
        let mut buffer = InputBuffer::new();
        buffer.insert_char('à');
        buffer.insert_char('b');
        buffer.insert_char('漢');
        assert_eq!(buffer.to_string(), "àb漢");
        assert_eq!(buffer.cursor_x, 3);

        buffer.move_left();
        buffer.insert_char('é');
        assert_eq!(buffer.to_string(), "àbé漢");

        buffer.delete_char();
        buffer.delete_char();
        assert_eq!(buffer.to_string(), "à漢");
        assert_eq!(buffer.cursor_x, 1);
    }

    #[test]
    fn input_buffer_merges_multi_byte_lines_on_backspace() {
        let mut buffer = InputBuffer::new();
        for ch in "héllo".chars() {
            buffer.insert_char(ch);
        }
        buffer.new_line();
        buffer.delete_char();

        assert_eq!(buffer.to_string(), "héllo");
        assert_eq!(buffer.cursor_x, 5);
        buffer.insert_char('!');
        assert_eq!(buffer.to_string(), "héllo!");
    }

    #[test]
    fn truncate_cuts_on_a_character_boundary() {
        let value = format!("x{}", "à".repeat(250));
        let truncated = ChatMessage::truncate(&value, 400, "...");
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() < value.len());

        let lines = ChatMessage::Thoughts(value).plain_lines();
        assert!(!lines.is_empty());
    }

    #[test]
    fn cursor_stays_inside_tiny_terminals() {
        let area = Rect::new(0, 0, 1, 1);
        let (x, y) = App::cursor_position(area, 5, 3);
        assert!(x <= 1);
        assert!(y <= 1);

        let area = Rect::new(2, 2, 40, 6);
        let (x, y) = App::cursor_position(area, 3, 1);
        assert_eq!((x, y), (6, 4));
    }
}
