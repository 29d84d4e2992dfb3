//! Chat view and its update queue
//!
//! Network events arrive on reader tasks, so views never mutate state in
//! place. Every change is queued as a [`ViewUpdate`] and applied by a single
//! dispatcher task that owns the [`ViewState`] and the renderer.

use std::io::Write;

use bitflags::bitflags;
use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CliError, Result};

/// Text shown instead of a run whose style has no decoration
pub const UNKNOWN_STYLE_TEXT: &str = "Error: Attempted to add unknown text with unknown font style.";

// ----------------------------------------------------------------------------
// Styles and Updates
// ----------------------------------------------------------------------------

bitflags! {
    /// Font style flags; the empty set is regular text
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FontStyle: u8 {
        const BOLD = 0b0001;
        const ITALIC = 0b0010;
        const UNDERLINE = 0b0100;
        const STRIKEOUT = 0b1000;
    }
}

impl FontStyle {
    pub const REGULAR: Self = Self::empty();
}

/// Decoration of one run of chat text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoration {
    Plain,
    Bold,
    Italic,
}

impl Decoration {
    /// Only regular, bold and italic map to a decoration
    pub fn for_style(style: FontStyle) -> Option<Self> {
        if style == FontStyle::REGULAR {
            Some(Decoration::Plain)
        } else if style == FontStyle::BOLD {
            Some(Decoration::Bold)
        } else if style == FontStyle::ITALIC {
            Some(Decoration::Italic)
        } else {
            None
        }
    }
}

/// Element of the chat history
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Run { text: String, decoration: Decoration },
    LineBreak,
}

/// A single queued change to the view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewUpdate {
    AppendLine {
        style: FontStyle,
        text: String,
        add_new_line: bool,
    },
    ClearHistory,
    ClearInput,
    ShowMessage(String),
    SetUsers(Vec<String>),
}

// ----------------------------------------------------------------------------
// View State
// ----------------------------------------------------------------------------

/// Everything a chat window displays
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub history: Vec<Inline>,
    /// Users box contents, one name per line
    pub users_text: String,
    pub input_line: String,
    pub notices: Vec<String>,
    pub scrolled_to_bottom: bool,
}

impl ViewState {
    pub fn apply(&mut self, update: &ViewUpdate) {
        match update {
            ViewUpdate::AppendLine {
                style,
                text,
                add_new_line,
            } => {
                let run = match Decoration::for_style(*style) {
                    Some(decoration) => Inline::Run {
                        text: text.clone(),
                        decoration,
                    },
                    None => Inline::Run {
                        text: UNKNOWN_STYLE_TEXT.to_string(),
                        decoration: Decoration::Plain,
                    },
                };
                self.history.push(run);
                if *add_new_line {
                    self.history.push(Inline::LineBreak);
                }
                self.scrolled_to_bottom = true;
            }
            ViewUpdate::ClearHistory => {
                self.history.clear();
                self.scrolled_to_bottom = true;
            }
            ViewUpdate::ClearInput => self.input_line.clear(),
            ViewUpdate::ShowMessage(message) => self.notices.push(message.clone()),
            ViewUpdate::SetUsers(users) => {
                self.users_text.clear();
                for user in users {
                    self.users_text.push_str(user);
                    self.users_text.push('\n');
                }
            }
        }
    }

    /// History flattened to plain text
    pub fn history_text(&self) -> String {
        self.history
            .iter()
            .map(|inline| match inline {
                Inline::Run { text, .. } => text.as_str(),
                Inline::LineBreak => "\n",
            })
            .collect()
    }

    pub fn users(&self) -> Vec<&str> {
        self.users_text.lines().collect()
    }
}

// ----------------------------------------------------------------------------
// Chat View Trait
// ----------------------------------------------------------------------------

/// Presentation hooks the chat session drives
///
/// Implementations must be callable from any task and must not block.
pub trait ChatView: Send + Sync {
    fn append_styled_line(&self, style: FontStyle, text: &str, add_new_line: bool);

    /// Regular text followed by a line break
    fn append_line(&self, text: &str) {
        self.append_styled_line(FontStyle::REGULAR, text, true);
    }

    fn clear_chat_history(&self);

    fn clear_input_line(&self);

    /// Notice shown outside the chat history
    fn show_message(&self, message: &str);

    fn set_users(&self, users: Vec<String>);
}

// ----------------------------------------------------------------------------
// Renderers
// ----------------------------------------------------------------------------

/// Draws applied updates somewhere
pub trait Renderer: Send + 'static {
    fn render(&mut self, update: &ViewUpdate, state: &ViewState) -> std::io::Result<()>;
}

/// Renders to a terminal stream with crossterm styling
pub struct ConsoleRenderer<W: Write + Send + 'static> {
    out: W,
}

impl<W: Write + Send + 'static> ConsoleRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl ConsoleRenderer<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send + 'static> Renderer for ConsoleRenderer<W> {
    fn render(&mut self, update: &ViewUpdate, state: &ViewState) -> std::io::Result<()> {
        match update {
            ViewUpdate::AppendLine { add_new_line, .. } => {
                // The appended run is the last one, or the one before a line break
                let skip = usize::from(*add_new_line);
                if let Some(Inline::Run { text, decoration }) = state.history.iter().rev().nth(skip)
                {
                    match decoration {
                        Decoration::Plain => write!(self.out, "{}", text)?,
                        Decoration::Bold => write!(self.out, "{}", text.as_str().bold())?,
                        Decoration::Italic => write!(self.out, "{}", text.as_str().italic())?,
                    }
                }
                if *add_new_line {
                    writeln!(self.out)?;
                }
            }
            ViewUpdate::ClearHistory => {
                queue!(self.out, Clear(ClearType::All), MoveTo(0, 0))?;
            }
            ViewUpdate::ClearInput => {}
            ViewUpdate::ShowMessage(message) => {
                writeln!(self.out, "{}", format!("[!] {}", message).yellow())?;
            }
            ViewUpdate::SetUsers(users) => {
                writeln!(self.out, "{}", format!("Users seen: {}", users.join(", ")).dim())?;
            }
        }
        self.out.flush()
    }
}

// ----------------------------------------------------------------------------
// Queued View and Dispatcher
// ----------------------------------------------------------------------------

enum QueueItem {
    Update(ViewUpdate),
    Snapshot(oneshot::Sender<ViewState>),
}

/// [`ChatView`] that forwards every call to the dispatcher queue
#[derive(Clone)]
pub struct QueuedView {
    queue: mpsc::UnboundedSender<QueueItem>,
}

impl QueuedView {
    /// Start a dispatcher task that applies updates in order and draws them
    pub fn spawn<R: Renderer>(renderer: R) -> (Self, JoinHandle<ViewState>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(dispatch(receiver, renderer));
        (Self { queue }, task)
    }

    fn enqueue(&self, update: ViewUpdate) {
        if self.queue.send(QueueItem::Update(update)).is_err() {
            debug!("view dispatcher gone, update dropped");
        }
    }

    /// State after every update queued so far has been applied
    pub async fn snapshot(&self) -> Result<ViewState> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(QueueItem::Snapshot(tx))
            .map_err(|_| CliError::UI("view dispatcher stopped".to_string()))?;
        rx.await
            .map_err(|_| CliError::UI("view dispatcher stopped".to_string()))
    }
}

impl ChatView for QueuedView {
    fn append_styled_line(&self, style: FontStyle, text: &str, add_new_line: bool) {
        self.enqueue(ViewUpdate::AppendLine {
            style,
            text: text.to_string(),
            add_new_line,
        });
    }

    fn clear_chat_history(&self) {
        self.enqueue(ViewUpdate::ClearHistory);
    }

    fn clear_input_line(&self) {
        self.enqueue(ViewUpdate::ClearInput);
    }

    fn show_message(&self, message: &str) {
        self.enqueue(ViewUpdate::ShowMessage(message.to_string()));
    }

    fn set_users(&self, users: Vec<String>) {
        self.enqueue(ViewUpdate::SetUsers(users));
    }
}

async fn dispatch<R: Renderer>(
    mut receiver: mpsc::UnboundedReceiver<QueueItem>,
    mut renderer: R,
) -> ViewState {
    let mut state = ViewState::default();
    while let Some(item) = receiver.recv().await {
        match item {
            QueueItem::Update(update) => {
                state.apply(&update);
                if let Err(e) = renderer.render(&update, &state) {
                    warn!("failed to render view update: {}", e);
                }
            }
            QueueItem::Snapshot(reply) => {
                let _ = reply.send(state.clone());
            }
        }
    }
    debug!("view dispatcher stopped");
    state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_style_falls_back_to_error_text() {
        let mut state = ViewState::default();
        state.apply(&ViewUpdate::AppendLine {
            style: FontStyle::UNDERLINE,
            text: "hidden".to_string(),
            add_new_line: false,
        });
        assert_eq!(state.history_text(), UNKNOWN_STYLE_TEXT);

        state.apply(&ViewUpdate::AppendLine {
            style: FontStyle::BOLD | FontStyle::ITALIC,
            text: "hidden".to_string(),
            add_new_line: true,
        });
        assert_eq!(
            state.history_text(),
            format!("{}{}\n", UNKNOWN_STYLE_TEXT, UNKNOWN_STYLE_TEXT)
        );
    }

    #[test]
    fn test_known_styles_decorate_runs() {
        let mut state = ViewState::default();
        for (style, text) in [
            (FontStyle::REGULAR, "a"),
            (FontStyle::BOLD, "b"),
            (FontStyle::ITALIC, "c"),
        ] {
            state.apply(&ViewUpdate::AppendLine {
                style,
                text: text.to_string(),
                add_new_line: false,
            });
        }
        let decorations: Vec<Decoration> = state
            .history
            .iter()
            .filter_map(|i| match i {
                Inline::Run { decoration, .. } => Some(*decoration),
                Inline::LineBreak => None,
            })
            .collect();
        assert_eq!(
            decorations,
            vec![Decoration::Plain, Decoration::Bold, Decoration::Italic]
        );
        assert_eq!(state.history_text(), "abc");
        assert!(state.scrolled_to_bottom);
    }

    #[test]
    fn test_clear_and_users() {
        let mut state = ViewState::default();
        state.input_line = "draft".to_string();
        state.apply(&ViewUpdate::AppendLine {
            style: FontStyle::REGULAR,
            text: "x".to_string(),
            add_new_line: true,
        });
        state.apply(&ViewUpdate::ClearHistory);
        state.apply(&ViewUpdate::ClearInput);
        state.apply(&ViewUpdate::SetUsers(vec!["ann".into(), "bob".into()]));

        assert!(state.history.is_empty());
        assert!(state.input_line.is_empty());
        assert_eq!(state.users_text, "ann\nbob\n");
        assert_eq!(state.users(), vec!["ann", "bob"]);
    }

    #[tokio::test]
    async fn test_queued_updates_apply_in_order() {
        let (view, task) = QueuedView::spawn(ConsoleRenderer::new(Vec::new()));
        view.append_line("first");
        view.append_styled_line(FontStyle::ITALIC, "second", false);
        view.show_message("careful");

        let state = view.snapshot().await.unwrap();
        assert_eq!(state.history_text(), "first\nsecond");
        assert_eq!(state.notices, vec!["careful".to_string()]);

        drop(view);
        let final_state = task.await.unwrap();
        assert_eq!(final_state, state);
    }

    #[test]
    fn test_console_renderer_writes_appended_text() {
        let mut renderer = ConsoleRenderer::new(Vec::new());
        let mut state = ViewState::default();
        let update = ViewUpdate::AppendLine {
            style: FontStyle::REGULAR,
            text: "alice - hi".to_string(),
            add_new_line: true,
        };
        state.apply(&update);
        renderer.render(&update, &state).unwrap();
        let out = String::from_utf8(renderer.into_inner()).unwrap();
        assert_eq!(out, "alice - hi\n");
    }
}
