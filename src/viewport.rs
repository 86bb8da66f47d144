//! Scroll state over an already rendered document.
//!
//! The only mutable state is the top offset. It always satisfies
//! `0 <= offset <= max(0, total_lines - height)`.

use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::markdown::{RenderedLine, RenderedText};

/// What a key press asks the viewport to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    LineUp,
    LineDown,
    PageUp,
    PageDown,
    HalfPageUp,
    HalfPageDown,
    Top,
    Bottom,
    Quit,
}

impl Action {
    /// Map a key to an action. Unbound keys map to `None`.
    pub fn from_key(key: &KeyEvent) -> Option<Self> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        let action = match key.code {
            KeyCode::Char('c') if ctrl => Action::Quit,
            KeyCode::Char('u') if ctrl => Action::HalfPageUp,
            KeyCode::Char('d') if ctrl => Action::HalfPageDown,
            _ if ctrl => return None,
            KeyCode::Char('q') | KeyCode::Esc => Action::Quit,
            KeyCode::Up | KeyCode::Char('k') => Action::LineUp,
            KeyCode::Down | KeyCode::Char('j') => Action::LineDown,
            KeyCode::PageUp | KeyCode::Char('b') => Action::PageUp,
            KeyCode::PageDown | KeyCode::Char('f') | KeyCode::Char(' ') => Action::PageDown,
            KeyCode::Char('u') => Action::HalfPageUp,
            KeyCode::Char('d') => Action::HalfPageDown,
            KeyCode::Home | KeyCode::Char('g') => Action::Top,
            KeyCode::End | KeyCode::Char('G') => Action::Bottom,
            _ => return None,
        };
        Some(action)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViewportStatus {
    Running,
    QuitRequested,
}

#[derive(Clone, Debug)]
pub struct Viewport {
    text: RenderedText,
    offset: usize,
    width: u16,
    height: usize,
    status: ViewportStatus,
}

impl Viewport {
    pub fn new(text: RenderedText, width: u16, height: u16) -> Self {
        Self {
            text,
            offset: 0,
            width,
            height: usize::from(height).max(1),
            status: ViewportStatus::Running,
        }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn total_lines(&self) -> usize {
        self.text.len()
    }

    pub fn status(&self) -> ViewportStatus {
        self.status
    }

    pub fn is_quit(&self) -> bool {
        self.status == ViewportStatus::QuitRequested
    }

    pub fn max_offset(&self) -> usize {
        self.total_lines().saturating_sub(self.height)
    }

    pub fn at_bottom(&self) -> bool {
        self.offset >= self.max_offset()
    }

    fn set_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.max_offset());
    }

    /// Feed one key press. Once quit has been requested every further key is
    /// ignored.
    pub fn apply(&mut self, key: KeyEvent) -> ViewportStatus {
        if let Some(action) = Action::from_key(&key) {
            self.perform(action);
        }
        self.status
    }

    pub fn perform(&mut self, action: Action) {
        if self.is_quit() {
            return;
        }

        let half_page = (self.height / 2).max(1);
        match action {
            Action::LineUp => self.set_offset(self.offset.saturating_sub(1)),
            Action::LineDown => self.set_offset(self.offset.saturating_add(1)),
            Action::PageUp => self.set_offset(self.offset.saturating_sub(self.height)),
            Action::PageDown => self.set_offset(self.offset.saturating_add(self.height)),
            Action::HalfPageUp => self.set_offset(self.offset.saturating_sub(half_page)),
            Action::HalfPageDown => self.set_offset(self.offset.saturating_add(half_page)),
            Action::Top => self.set_offset(0),
            Action::Bottom => self.set_offset(self.max_offset()),
            Action::Quit => self.status = ViewportStatus::QuitRequested,
        }
    }

    /// The client window changed height. The offset is clamped again.
    pub fn resize(&mut self, height: u16) {
        self.height = usize::from(height).max(1);
        self.set_offset(self.offset);
    }

    /// The lines currently visible, top to bottom.
    pub fn render_frame(&self) -> &[RenderedLine] {
        let end = (self.offset + self.height).min(self.total_lines());
        &self.text.lines[self.offset..end]
    }

    /// How far the offset is through its range, 0.0 at the top to 1.0 once
    /// the last line is visible.
    pub fn scroll_percent(&self) -> f64 {
        if self.max_offset() == 0 {
            return 1.0;
        }
        self.offset as f64 / self.max_offset() as f64
    }
}
