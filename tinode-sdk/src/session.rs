//! One session attempt, from opening the transport to closing it.
//!
//! A [`Session`] is single use: create it, `run` it, read the
//! [`SessionOutcome`]. The run loop is one `select!` over the shutdown
//! signal, the auth deadline (only while awaiting auth), the next inbound
//! frame and commands queued through [`SessionHandle`].

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;

use crate::config::ConnectConfig;
use crate::credentials::Credentials;
use crate::dispatch::{Dispatch, Dispatcher};
use crate::error::SessionError;
use crate::event::{Event, EventHandler};
use crate::handshake::{self, RequestIds};
use crate::proto::{self, OutboundMessage};
use crate::shutdown::Shutdown;
use crate::transport::{Connector, Transport};

/// Lifecycle of one attempt. Transitions only move forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingAuth,
    Authenticated,
    /// Authenticated and listening until the stream ends.
    Draining,
    Closed,
    Failed(SessionError),
}

impl SessionState {
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Idle, Connecting)
            | (Connecting, AwaitingAuth)
            | (Connecting, Failed(_))
            | (AwaitingAuth, Authenticated)
            | (AwaitingAuth, Failed(_))
            | (Authenticated, Draining)
            | (Authenticated, Failed(_))
            | (Draining, Failed(_)) => true,
            _ => false,
        }
    }
}

/// How an attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ending {
    /// The server closed the stream after we were listening.
    Clean,
    /// Shutdown was requested.
    Cancelled,
    Failed(SessionError),
}

/// What the supervisor learns from one attempt.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Login succeeded at some point.
    pub authenticated: bool,
    /// Authenticated and listened for at least one listening cycle.
    pub productive: bool,
    pub ending: Ending,
    /// Every state the attempt went through, starting with `Idle`.
    pub trail: Vec<SessionState>,
}

impl SessionOutcome {
    pub fn error(&self) -> Option<&SessionError> {
        match &self.ending {
            Ending::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.ending == Ending::Cancelled
    }
}

/// Commands a consumer can queue on a live session.
#[derive(Debug)]
pub enum Command {
    Subscribe(String),
    Publish { topic: String, content: Value },
}

/// Commands queued per session before handlers get an error.
pub const COMMAND_QUEUE: usize = 256;

/// A handle to a running session, passed to the event handler.
///
/// Commands are queued without waiting; the session sends them between
/// inbound frames. A full queue or an ended session is an error.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub fn subscribe(&self, topic: &str) -> anyhow::Result<()> {
        self.queue(Command::Subscribe(topic.to_string()))
    }

    pub fn publish(&self, topic: &str, content: Value) -> anyhow::Result<()> {
        self.queue(Command::Publish {
            topic: topic.to_string(),
            content,
        })
    }

    fn queue(&self, cmd: Command) -> anyhow::Result<()> {
        match self.cmd_tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(cmd)) => {
                anyhow::bail!("session command queue full, dropping {cmd:?}")
            }
            Err(TrySendError::Closed(_)) => anyhow::bail!("session has ended"),
        }
    }
}

/// State machine for a single attempt.
pub struct Session {
    config: ConnectConfig,
    credentials: Credentials,
    state: SessionState,
    trail: Vec<SessionState>,
    ids: RequestIds,
    dispatcher: Dispatcher,
    listening_since: Option<Instant>,
}

impl Session {
    pub fn new(config: ConnectConfig, credentials: Credentials) -> Self {
        Self {
            config,
            credentials,
            state: SessionState::Idle,
            trail: vec![SessionState::Idle],
            ids: RequestIds::new(),
            dispatcher: Dispatcher::new(),
            listening_since: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run the attempt to completion. The transport, if it was opened, is
    /// closed exactly once before this returns.
    pub async fn run<C: Connector>(
        mut self,
        connector: &C,
        handler: Option<&EventHandler>,
        shutdown: &mut Shutdown,
    ) -> SessionOutcome {
        if shutdown.is_triggered() {
            return self.finish(Ending::Cancelled);
        }
        self.transition(SessionState::Connecting);
        tracing::info!(url = %self.config.url, login = self.credentials.login(), "Connecting");

        let opened = tokio::select! {
            biased;
            _ = shutdown.wait() => None,
            result = connector.open() => Some(result),
        };
        let mut transport = match opened {
            None => return self.finish(Ending::Cancelled),
            Some(Err(e)) => {
                let ending = self.fail(e);
                return self.finish(ending);
            }
            Some(Ok(transport)) => transport,
        };
        tracing::info!("Connected");

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = SessionHandle { cmd_tx };
        let ending = self
            .drive(&mut transport, &handle, cmd_rx, handler, shutdown)
            .await;
        transport.close().await;

        if self.dispatcher.is_authenticated() {
            let reason = match &ending {
                Ending::Clean => "closed by server".to_string(),
                Ending::Cancelled => "shutdown".to_string(),
                Ending::Failed(e) => e.to_string(),
            };
            deliver(handler, &handle, Event::Disconnected { reason }).await;
        }
        self.finish(ending)
    }

    async fn drive<T: Transport>(
        &mut self,
        transport: &mut T,
        handle: &SessionHandle,
        mut cmd_rx: mpsc::Receiver<Command>,
        handler: Option<&EventHandler>,
        shutdown: &mut Shutdown,
    ) -> Ending {
        let sent = tokio::select! {
            biased;
            _ = shutdown.wait() => return Ending::Cancelled,
            sent = handshake::perform(transport, &mut self.ids, &self.config, &self.credentials) => sent,
        };
        if let Err(e) = sent {
            return self.fail(e);
        }
        self.transition(SessionState::AwaitingAuth);

        let auth_timeout = self.config.auth_timeout;
        let deadline = Instant::now() + auth_timeout;
        tracing::info!(timeout_secs = auth_timeout.as_secs(), "Waiting for authentication");

        loop {
            let awaiting = self.state == SessionState::AwaitingAuth;
            tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    tracing::info!("Shutdown requested, closing session");
                    return Ending::Cancelled;
                }
                _ = tokio::time::sleep_until(deadline), if awaiting => {
                    return self.fail(SessionError::AuthTimeout(auth_timeout));
                }
                Some(cmd) = cmd_rx.recv() => {
                    if let Err(e) = self.execute(transport, cmd).await {
                        return self.fail(e);
                    }
                }
                frame = transport.recv() => match frame {
                    Ok(Some(text)) => {
                        // A slow handler must not hold off shutdown.
                        let step = tokio::select! {
                            biased;
                            _ = shutdown.wait() => {
                                tracing::info!("Shutdown requested while handling a frame");
                                return Ending::Cancelled;
                            }
                            step = self.on_frame(&text, handle, handler) => step,
                        };
                        if let Some(ending) = step {
                            return ending;
                        }
                        // Flush what the handler queued before reading on.
                        while let Ok(cmd) = cmd_rx.try_recv() {
                            if let Err(e) = self.execute(transport, cmd).await {
                                return self.fail(e);
                            }
                        }
                    }
                    Ok(None) if self.listening_since.is_some() => {
                        tracing::warn!("Connection closed by server");
                        return Ending::Clean;
                    }
                    Ok(None) => {
                        return self.fail(SessionError::Transport(
                            "connection closed before authentication".to_string(),
                        ));
                    }
                    Err(e) => return self.fail(e),
                },
            }
        }
    }

    async fn on_frame(
        &mut self,
        frame: &str,
        handle: &SessionHandle,
        handler: Option<&EventHandler>,
    ) -> Option<Ending> {
        let msg = match proto::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                let head: String = frame.chars().take(150).collect();
                tracing::warn!(error = %e, frame = %head, "Skipping undecodable frame");
                return None;
            }
        };

        match self.dispatcher.dispatch(msg) {
            Dispatch::Ignore => None,
            Dispatch::Authenticated { user } => {
                self.transition(SessionState::Authenticated);
                self.transition(SessionState::Draining);
                self.listening_since = Some(Instant::now());
                tracing::info!("Listening for messages");
                deliver(handler, handle, Event::Authenticated { user }).await;
                None
            }
            Dispatch::Deliver(event) => {
                deliver(handler, handle, event).await;
                None
            }
            Dispatch::Fatal(e) => Some(self.fail(e)),
        }
    }

    async fn execute<T: Transport>(&mut self, transport: &mut T, cmd: Command) -> Result<(), SessionError> {
        let message = match cmd {
            Command::Subscribe(topic) => OutboundMessage::Subscribe { topic },
            Command::Publish { topic, content } => OutboundMessage::Publish { topic, content },
        };
        handshake::send_request(transport, &mut self.ids, message).await?;
        Ok(())
    }

    fn fail(&mut self, error: SessionError) -> Ending {
        tracing::warn!(error = %error, "Session attempt failed");
        self.transition(SessionState::Failed(error.clone()));
        Ending::Failed(error)
    }

    fn transition(&mut self, next: SessionState) {
        let allowed = self.state.can_transition_to(&next);
        debug_assert!(allowed, "illegal session transition {:?} -> {:?}", self.state, next);
        if !allowed {
            tracing::error!(from = ?self.state, to = ?next, "Ignoring illegal session transition");
            return;
        }
        tracing::info!(from = ?self.state, to = ?next, "Session state");
        self.state = next.clone();
        self.trail.push(next);
    }

    fn finish(mut self, ending: Ending) -> SessionOutcome {
        let productive = self
            .listening_since
            .is_some_and(|since| since.elapsed() >= self.config.listen_cycle);
        self.transition(SessionState::Closed);
        SessionOutcome {
            authenticated: self.dispatcher.is_authenticated(),
            productive,
            ending,
            trail: self.trail,
        }
    }
}

async fn deliver(handler: Option<&EventHandler>, handle: &SessionHandle, event: Event) {
    if let Some(handler) = handler {
        if let Err(e) = handler(handle.clone(), event).await {
            tracing::error!(error = %e, "Handler error");
        }
    }
}
