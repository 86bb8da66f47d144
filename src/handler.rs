//! SSH side of a connection: authentication, channel requests and wiring each
//! shell channel to its own [`SessionDriver`].

use std::collections::HashMap;
use std::net::SocketAddr;

use async_trait::async_trait;
use russh::server::{Auth, Handle, Handler, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use russh_keys::key::PublicKey;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::session::{SessionContext, SessionDriver, SessionEvent, SessionOutcome, TerminalInfo};
use crate::terminal::OutputSink;

pub const NO_PTY_MESSAGE: &str = "Requires an active PTY\n";

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Default)]
struct ChannelState {
    info: TerminalInfo,
    pty: bool,
    events: Option<mpsc::Sender<SessionEvent>>,
}

/// One per TCP connection. Dropping it aborts every session it started.
pub struct ConnectionHandler {
    peer: SocketAddr,
    user: Option<String>,
    context: SessionContext,
    channels: HashMap<ChannelId, ChannelState>,
    tasks: JoinSet<()>,
}

impl ConnectionHandler {
    pub fn new(peer: SocketAddr, context: SessionContext) -> Self {
        Self {
            peer,
            user: None,
            context,
            channels: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    fn accept(&mut self, user: &str, method: &str) -> Auth {
        debug!(peer = %self.peer, user, method, "accepting client");
        self.user = Some(user.to_string());
        Auth::Accept
    }

    async fn forward(&mut self, channel: ChannelId, event: SessionEvent) {
        let Some(events) = self.channels.get(&channel).and_then(|s| s.events.clone()) else {
            return;
        };
        // The driver may already be gone after a quit.
        let _ = events.send(event).await;
    }

    fn start_program(&mut self, channel: ChannelId, session: &mut Session) {
        let handle = session.handle();
        while self.tasks.try_join_next().is_some() {}

        let Some(state) = self.channels.get_mut(&channel) else {
            return;
        };
        if !state.pty {
            warn!(peer = %self.peer, "rejecting session without a PTY");
            self.tasks.spawn(reject_without_pty(handle, channel));
            return;
        }
        if state.events.is_some() {
            return;
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        state.events = Some(tx);
        info!(
            peer = %self.peer,
            user = self.user.as_deref().unwrap_or(""),
            term = state.info.term.as_deref().unwrap_or(""),
            cols = state.info.cols,
            rows = state.info.rows,
            "session started"
        );
        let driver = SessionDriver::new(self.context.clone(), state.info.clone());
        self.tasks
            .spawn(run_program(driver, rx, handle, channel, self.peer));
    }
}

async fn reject_without_pty(handle: Handle, channel: ChannelId) {
    let _ = handle
        .data(channel, CryptoVec::from_slice(NO_PTY_MESSAGE.as_bytes()))
        .await;
    let _ = handle.exit_status_request(channel, 1).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

/// Drive one session and forward its output to the channel in order.
async fn run_program(
    driver: SessionDriver,
    events: mpsc::Receiver<SessionEvent>,
    handle: Handle,
    channel: ChannelId,
    peer: SocketAddr,
) {
    let (sink, mut output) = OutputSink::channel();
    let writer = handle.clone();
    let pump = async move {
        let mut open = true;
        while let Some(bytes) = output.recv().await {
            // Keep draining after a failed write so the driver is never
            // blocked by a vanished client.
            if open && writer.data(channel, CryptoVec::from_slice(&bytes)).await.is_err() {
                open = false;
            }
        }
    };

    let (result, ()) = tokio::join!(driver.run(events, sink), pump);
    match result {
        Ok(SessionOutcome::Quit) => {
            debug!(%peer, "client quit");
            let _ = handle.exit_status_request(channel, 0).await;
        }
        Ok(outcome) => debug!(%peer, ?outcome, "session ended"),
        Err(err) => error!(%peer, "session failed: {err}"),
    }
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}

#[async_trait]
impl Handler for ConnectionHandler {
    type Error = ServerError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "none"))
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "password"))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "publickey"))
    }

    async fn auth_keyboard_interactive(
        &mut self,
        user: &str,
        _submethods: &str,
        _response: Option<russh::server::Response<'async_trait>>,
    ) -> Result<Auth, Self::Error> {
        Ok(self.accept(user, "keyboard-interactive"))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.pty = true;
            state.info.term = (!term.is_empty()).then(|| term.to_string());
            state.info.cols = clamp_dimension(col_width);
            state.info.rows = clamp_dimension(row_height);
        }
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if variable_name == "COLORTERM" {
            if let Some(state) = self.channels.get_mut(&channel) {
                state.info.colorterm = Some(variable_value.to_string());
            }
        }
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel);
        self.start_program(channel, session);
        Ok(())
    }

    /// Commands are not supported; the program only runs interactively.
    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        warn!(peer = %self.peer, "rejecting exec request");
        let _ = session.channel_success(channel);
        self.tasks
            .spawn(reject_without_pty(session.handle(), channel));
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        let cols = clamp_dimension(col_width);
        let rows = clamp_dimension(row_height);
        if let Some(state) = self.channels.get_mut(&channel) {
            state.info.cols = cols;
            state.info.rows = rows;
        }
        self.forward(channel, SessionEvent::Resize { cols, rows }).await;
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, SessionEvent::Input(data.to_vec())).await;
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, SessionEvent::Closed).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.forward(channel, SessionEvent::Closed).await;
        self.channels.remove(&channel);
        Ok(())
    }
}

fn clamp_dimension(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
