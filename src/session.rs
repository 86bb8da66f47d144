//! One client's interactive program: resolve, render, then scroll until the
//! client quits, disconnects or the server shuts down.

use std::sync::Arc;

use ratatui::layout::Alignment;
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::block::{Padding, Position, Title};
use ratatui::widgets::{Block, BorderType, Borders, Paragraph};
use ratatui::Frame;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::config::ViewConfig;
use crate::content::ContentSource;
use crate::error::SessionError;
use crate::input::KeyDecoder;
use crate::markdown::{RenderAdapter, RenderedLine};
use crate::style::{ColorProfile, Palette};
use crate::terminal::{
    client_terminal, enter_full_screen, leave_full_screen, ClientTerminal, OutputSink,
};
use crate::viewport::Viewport;

/// Border plus one column of padding on each side.
const HORIZONTAL_CHROME: u16 = 4;
/// Top and bottom border.
const VERTICAL_CHROME: u16 = 2;

/// What the client told us about its terminal.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TerminalInfo {
    pub term: Option<String>,
    pub colorterm: Option<String>,
    pub cols: u16,
    pub rows: u16,
}

impl TerminalInfo {
    pub fn color_profile(&self) -> ColorProfile {
        ColorProfile::detect(self.term.as_deref(), self.colorterm.as_deref())
    }
}

/// Outer size of the bordered frame drawn for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u16,
    pub height: u16,
}

impl FrameSize {
    /// A zero dimension means the client did not report one.
    pub fn new(cols: u16, rows: u16, view: &ViewConfig) -> Self {
        let width = match cols {
            0 => view.max_width,
            cols => cols.min(view.max_width),
        };
        let height = match rows {
            0 => view.default_height,
            rows => rows,
        };
        Self { width, height }
    }

    pub fn wrap_width(&self) -> u16 {
        self.width.saturating_sub(HORIZONTAL_CHROME).max(1)
    }

    pub fn visible_height(&self) -> u16 {
        self.height.saturating_sub(VERTICAL_CHROME).max(1)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionOutcome {
    Quit,
    Disconnected,
    Shutdown,
}

/// Everything a driver needs that is shared by all sessions. Cloned per
/// connection; nothing in it is mutable.
#[derive(Clone)]
pub struct SessionContext {
    pub content: ContentSource,
    pub adapter: Arc<RenderAdapter>,
    pub view: ViewConfig,
    pub shutdown: watch::Receiver<bool>,
}

pub struct SessionDriver {
    context: SessionContext,
    info: TerminalInfo,
    profile: ColorProfile,
    palette: Palette,
    size: FrameSize,
}

impl SessionDriver {
    pub fn new(context: SessionContext, info: TerminalInfo) -> Self {
        let profile = info.color_profile();
        let palette = context.adapter.palette(profile);
        let size = FrameSize::new(info.cols, info.rows, &context.view);
        Self {
            context,
            info,
            profile,
            palette,
            size,
        }
    }

    pub fn info(&self) -> &TerminalInfo {
        &self.info
    }

    pub fn frame_size(&self) -> FrameSize {
        self.size
    }

    /// Resolve and render the document for this session. Nothing is sent to
    /// the client, so a failure here ends the session without output.
    pub async fn prepare(&self) -> Result<Viewport, SessionError> {
        let document = self.context.content.resolve().await?;
        let text = self
            .context
            .adapter
            .render(&document.bytes, self.size.wrap_width(), self.profile)?;
        debug!(
            origin = ?document.origin,
            lines = text.len(),
            width = self.size.wrap_width(),
            "rendered document"
        );
        Ok(Viewport::new(
            text,
            self.size.wrap_width(),
            self.size.visible_height(),
        ))
    }

    pub async fn run(
        mut self,
        events: mpsc::Receiver<SessionEvent>,
        sink: OutputSink,
    ) -> Result<SessionOutcome, SessionError> {
        let mut viewport = self.prepare().await?;
        self.drive(&mut viewport, events, sink).await
    }

    /// Full-screen event loop over a prepared viewport. The client's screen
    /// is restored whichever way the loop ends.
    pub async fn drive(
        &mut self,
        viewport: &mut Viewport,
        mut events: mpsc::Receiver<SessionEvent>,
        sink: OutputSink,
    ) -> Result<SessionOutcome, SessionError> {
        let mut terminal = client_terminal(sink.clone(), self.size.width, self.size.height)?;
        enter_full_screen(terminal.backend_mut())?;

        let result = self
            .event_loop(viewport, &mut terminal, &mut events, &sink)
            .await;

        let restored = leave_full_screen(terminal.backend_mut());
        match result {
            Ok(SessionOutcome::Disconnected) => Ok(SessionOutcome::Disconnected),
            Ok(outcome) => {
                restored?;
                Ok(outcome)
            }
            Err(err) => Err(err),
        }
    }

    async fn event_loop(
        &mut self,
        viewport: &mut Viewport,
        terminal: &mut ClientTerminal,
        events: &mut mpsc::Receiver<SessionEvent>,
        sink: &OutputSink,
    ) -> Result<SessionOutcome, SessionError> {
        let mut decoder = KeyDecoder::new();
        let mut shutdown = self.context.shutdown.clone();

        loop {
            if *shutdown.borrow_and_update() {
                return Ok(SessionOutcome::Shutdown);
            }
            // A client that stops reading holds up the next frame.
            tokio::select! {
                () = sink.ready() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(SessionOutcome::Shutdown);
                    }
                    continue;
                }
            }
            terminal.draw(|frame| draw(frame, viewport, &self.palette))?;

            let event = tokio::select! {
                event = events.recv() => event,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(SessionOutcome::Shutdown);
                    }
                    continue;
                }
            };

            match event {
                Some(SessionEvent::Input(bytes)) => {
                    for key in decoder.feed(&bytes) {
                        viewport.apply(key);
                    }
                    if viewport.is_quit() {
                        return Ok(SessionOutcome::Quit);
                    }
                }
                Some(SessionEvent::Resize { cols, rows }) => {
                    self.resize(viewport, terminal, sink, cols, rows)?;
                }
                Some(SessionEvent::Closed) | None => return Ok(SessionOutcome::Disconnected),
            }
        }
    }

    /// The frame keeps the width the document was wrapped for; only the
    /// height follows the client.
    fn resize(
        &mut self,
        viewport: &mut Viewport,
        terminal: &mut ClientTerminal,
        sink: &OutputSink,
        cols: u16,
        rows: u16,
    ) -> Result<(), SessionError> {
        self.info.cols = cols;
        self.info.rows = rows;
        let height = FrameSize::new(cols, rows, &self.context.view).height;
        if height == self.size.height {
            return Ok(());
        }
        self.size.height = height;
        viewport.resize(self.size.visible_height());
        debug!(cols, rows, offset = viewport.offset(), "client resized");

        *terminal = client_terminal(sink.clone(), self.size.width, self.size.height)?;
        terminal.clear()?;
        Ok(())
    }
}

fn to_line(line: &RenderedLine) -> Line<'static> {
    line.segments
        .iter()
        .map(|segment| Span::styled(segment.text.clone(), segment.style))
        .collect::<Vec<_>>()
        .into()
}

fn draw(frame: &mut Frame, viewport: &Viewport, palette: &Palette) {
    let lines: Vec<Line> = viewport.render_frame().iter().map(to_line).collect();
    let percent = format!(" {:>3.0}% ", viewport.scroll_percent() * 100.0);

    let block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(palette.border)
        .padding(Padding::new(1, 1, 0, 0))
        .title(
            Title::from(Span::styled(percent, palette.status))
                .position(Position::Bottom)
                .alignment(Alignment::Right),
        );

    frame.render_widget(Paragraph::new(Text::from(lines)).block(block), frame.size());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::style::StylePolicy;
    use crate::terminal::{OutputStream, MAX_QUEUED_FRAMES};

    fn readme(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn context(path: &std::path::Path) -> (SessionContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let context = SessionContext {
            content: ContentSource::local(path),
            adapter: Arc::new(RenderAdapter::new(StylePolicy::NoColorOverride)),
            view: ViewConfig::default(),
            shutdown: rx,
        };
        (context, tx)
    }

    fn info(cols: u16, rows: u16) -> TerminalInfo {
        TerminalInfo {
            term: Some("xterm-256color".to_string()),
            colorterm: None,
            cols,
            rows,
        }
    }

    fn long_document(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|idx| format!("Paragraph {idx} has a few words in it.\n"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn drain(rx: &mut OutputStream) -> String {
        let mut out = Vec::new();
        while let Ok(chunk) = rx.try_recv() {
            out.extend(chunk);
        }
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_frame_size_caps_width() {
        let view = ViewConfig::default();
        let size = FrameSize::new(200, 50, &view);
        assert_eq!(size, FrameSize { width: 78, height: 50 });
        assert_eq!(size.wrap_width(), 74);
        assert_eq!(size.visible_height(), 48);

        let narrow = FrameSize::new(40, 10, &view);
        assert_eq!(narrow.width, 40);
        assert_eq!(narrow.wrap_width(), 36);
    }

    #[test]
    fn test_frame_size_defaults_when_unreported() {
        let size = FrameSize::new(0, 0, &ViewConfig::default());
        assert_eq!(size, FrameSize { width: 78, height: 24 });
    }

    #[test]
    fn test_tiny_terminal_still_has_a_line() {
        let size = FrameSize::new(2, 1, &ViewConfig::default());
        assert_eq!(size.wrap_width(), 1);
        assert_eq!(size.visible_height(), 1);
    }

    #[test]
    fn test_profile_comes_from_client_env() {
        let mut info = info(80, 24);
        assert_eq!(info.color_profile(), ColorProfile::Ansi256);
        info.colorterm = Some("truecolor".to_string());
        assert_eq!(info.color_profile(), ColorProfile::TrueColor);
        info.term = None;
        info.colorterm = None;
        assert_eq!(info.color_profile(), ColorProfile::Ascii);
    }

    #[tokio::test]
    async fn test_quit_restores_screen() {
        let file = readme(&long_document(40));
        let (context, _shutdown) = context(file.path());
        let driver = SessionDriver::new(context, info(80, 24));

        let (events_tx, events_rx) = mpsc::channel(8);
        let (sink, mut out) = OutputSink::channel();
        events_tx.send(SessionEvent::Input(b"jjq".to_vec())).await.unwrap();

        let outcome = driver.run(events_rx, sink).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Quit);

        let output = drain(&mut out);
        assert!(output.contains("\x1b[?1049h"));
        // Unchanged blank cells are skipped, so look for a single word.
        assert!(output.contains("Paragraph"));
        assert!(output.ends_with("\x1b[?25h\x1b[?1049l"));
    }

    #[tokio::test]
    async fn test_keys_move_the_viewport() {
        let file = readme(&long_document(40));
        let (context, _shutdown) = context(file.path());
        let mut driver = SessionDriver::new(context, info(80, 12));
        let mut viewport = driver.prepare().await.unwrap();
        assert_eq!(viewport.height(), 10);

        let (events_tx, events_rx) = mpsc::channel(8);
        let (sink, _out) = OutputSink::channel();
        events_tx.send(SessionEvent::Input(b"\x1b[6~jx".to_vec())).await.unwrap();
        events_tx.send(SessionEvent::Input(b"q".to_vec())).await.unwrap();

        let outcome = driver.drive(&mut viewport, events_rx, sink).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Quit);
        assert_eq!(viewport.offset(), 11);
    }

    #[tokio::test]
    async fn test_resize_changes_visible_height() {
        let file = readme(&long_document(40));
        let (context, _shutdown) = context(file.path());
        let mut driver = SessionDriver::new(context, info(80, 24));
        let mut viewport = driver.prepare().await.unwrap();

        let (events_tx, events_rx) = mpsc::channel(8);
        let (sink, _out) = OutputSink::channel();
        events_tx
            .send(SessionEvent::Resize { cols: 120, rows: 12 })
            .await
            .unwrap();
        events_tx.send(SessionEvent::Input(b"G".to_vec())).await.unwrap();
        events_tx.send(SessionEvent::Closed).await.unwrap();

        let outcome = driver.drive(&mut viewport, events_rx, sink).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Disconnected);
        assert_eq!(viewport.height(), 10);
        assert_eq!(viewport.offset(), viewport.total_lines() - 10);
        assert_eq!(driver.frame_size(), FrameSize { width: 78, height: 12 });
        assert_eq!(driver.info().cols, 120);
    }

    #[tokio::test]
    async fn test_dropped_input_is_a_disconnect() {
        let file = readme("# short");
        let (context, _shutdown) = context(file.path());
        let driver = SessionDriver::new(context, info(80, 24));

        let (events_tx, events_rx) = mpsc::channel(8);
        drop(events_tx);
        let (sink, _out) = OutputSink::channel();
        let outcome = driver.run(events_rx, sink).await.unwrap();
        assert_eq!(outcome, SessionOutcome::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_flag_ends_session() {
        let file = readme("# short");
        let (context, shutdown) = context(file.path());
        let driver = SessionDriver::new(context, info(80, 24));

        let (_events_tx, events_rx) = mpsc::channel(8);
        let (sink, mut out) = OutputSink::channel();
        let task = tokio::spawn(driver.run(events_rx, sink));
        shutdown.send(true).unwrap();

        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Shutdown);
        assert!(drain(&mut out).ends_with("\x1b[?25h\x1b[?1049l"));
    }

    #[tokio::test]
    async fn test_unread_output_holds_back_drawing() {
        let file = readme(&long_document(80));
        let (context, _shutdown) = context(file.path());
        let driver = SessionDriver::new(context, info(80, 24));

        let (events_tx, events_rx) = mpsc::channel(64);
        let (sink, mut out) = OutputSink::channel();
        let backlog = sink.clone();
        for _ in 0..40 {
            events_tx.send(SessionEvent::Input(b"j".to_vec())).await.unwrap();
        }
        let task = tokio::spawn(driver.run(events_rx, sink));

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(!task.is_finished());
        assert!(backlog.queued() <= MAX_QUEUED_FRAMES + 1);

        events_tx.send(SessionEvent::Input(b"q".to_vec())).await.unwrap();
        for _ in 0..500 {
            drain(&mut out);
            if task.is_finished() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, SessionOutcome::Quit);
    }

    #[tokio::test]
    async fn test_missing_document_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (context, _shutdown) = context(&dir.path().join("README.md"));
        let driver = SessionDriver::new(context, info(80, 24));

        let (_events_tx, events_rx) = mpsc::channel(8);
        let (sink, mut out) = OutputSink::channel();
        let err = driver.run(events_rx, sink).await.unwrap_err();
        assert!(matches!(err, SessionError::Content(_)));
        assert!(out.try_recv().is_err());
    }
}
