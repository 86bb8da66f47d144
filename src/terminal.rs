//! A ratatui terminal whose output goes to a remote client instead of stdout.

use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossterm::cursor::{Hide, Show};
use crossterm::queue;
use crossterm::terminal::{Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::{Terminal, TerminalOptions, Viewport as TerminalViewport};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Notify};

/// Frames that may wait for the client before the session stops drawing.
pub const MAX_QUEUED_FRAMES: usize = 16;

#[derive(Debug, Default)]
struct Backlog {
    queued: AtomicUsize,
    drained: Notify,
}

/// Ordered byte stream to one client. Each flushed frame is one message.
#[derive(Clone, Debug)]
pub struct OutputSink {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    backlog: Arc<Backlog>,
}

impl OutputSink {
    pub fn channel() -> (Self, OutputStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let backlog = Arc::new(Backlog::default());
        let stream = OutputStream {
            rx,
            backlog: backlog.clone(),
        };
        (Self { tx, backlog }, stream)
    }

    pub fn send(&self, bytes: Vec<u8>) -> io::Result<()> {
        self.backlog.queued.fetch_add(1, Ordering::AcqRel);
        self.tx.send(bytes).map_err(|_| {
            self.backlog.queued.fetch_sub(1, Ordering::AcqRel);
            io::Error::new(io::ErrorKind::BrokenPipe, "client output closed")
        })
    }

    pub fn queued(&self) -> usize {
        self.backlog.queued.load(Ordering::Acquire)
    }

    /// Wait until fewer than [`MAX_QUEUED_FRAMES`] frames are unsent.
    /// Returns at once when the receiving side is gone.
    pub async fn ready(&self) {
        loop {
            let drained = self.backlog.drained.notified();
            if self.queued() < MAX_QUEUED_FRAMES || self.tx.is_closed() {
                return;
            }
            drained.await;
        }
    }
}

/// Receiving end of an [`OutputSink`].
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    backlog: Arc<Backlog>,
}

impl OutputStream {
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        let bytes = self.rx.recv().await?;
        self.taken();
        Some(bytes)
    }

    pub fn try_recv(&mut self) -> Result<Vec<u8>, TryRecvError> {
        let bytes = self.rx.try_recv()?;
        self.taken();
        Ok(bytes)
    }

    fn taken(&self) {
        self.backlog.queued.fetch_sub(1, Ordering::AcqRel);
        self.backlog.drained.notify_waiters();
    }
}

impl Drop for OutputStream {
    fn drop(&mut self) {
        self.rx.close();
        self.backlog.drained.notify_waiters();
    }
}

/// Buffers writes and hands them to the [`OutputSink`] on flush.
pub struct ClientWriter {
    sink: OutputSink,
    buf: Vec<u8>,
}

impl ClientWriter {
    pub fn new(sink: OutputSink) -> Self {
        Self {
            sink,
            buf: Vec::new(),
        }
    }
}

impl Write for ClientWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.sink.send(std::mem::take(&mut self.buf))
    }
}

pub type ClientTerminal = Terminal<CrosstermBackend<ClientWriter>>;

/// A terminal with a fixed area. The server cannot query the client's size,
/// so it is never asked; the session passes the size the client reported.
pub fn client_terminal(sink: OutputSink, width: u16, height: u16) -> io::Result<ClientTerminal> {
    let backend = CrosstermBackend::new(ClientWriter::new(sink));
    Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: TerminalViewport::Fixed(Rect::new(0, 0, width, height)),
        },
    )
}

pub fn enter_full_screen<W: Write>(out: &mut W) -> io::Result<()> {
    queue!(out, EnterAlternateScreen, Hide, Clear(ClearType::All))?;
    out.flush()
}

pub fn leave_full_screen<W: Write>(out: &mut W) -> io::Result<()> {
    queue!(out, Show, LeaveAlternateScreen)?;
    out.flush()
}
