//! Classifies inbound messages and tracks authentication from ctrl replies.

use crate::error::SessionError;
use crate::event::Event;
use crate::proto::{CtrlMessage, InboundMessage};

/// Consecutive 5xx replies tolerated before the attempt is abandoned.
pub const MAX_CONSECUTIVE_SERVER_ERRORS: u32 = 3;

/// What the session should do with one inbound message.
#[derive(Debug)]
pub enum Dispatch {
    /// Nothing beyond logging.
    Ignore,
    /// First successful login reply of this attempt.
    Authenticated { user: Option<String> },
    /// Hand this event to the consumer.
    Deliver(Event),
    /// End the attempt.
    Fatal(SessionError),
}

/// Per-attempt inbound classifier.
#[derive(Debug, Default)]
pub struct Dispatcher {
    authenticated: bool,
    server_errors: u32,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn dispatch(&mut self, msg: InboundMessage) -> Dispatch {
        match msg {
            InboundMessage::Control(ctrl) => self.on_ctrl(ctrl),
            InboundMessage::Data(data) => {
                tracing::debug!(
                    from = data.from.as_deref().unwrap_or("?"),
                    topic = %data.topic,
                    seq = data.seq,
                    "New message"
                );
                Dispatch::Deliver(Event::Data(data))
            }
            InboundMessage::Presence(pres) => {
                tracing::debug!(topic = %pres.topic, src = ?pres.src, what = %pres.what, "Presence update");
                Dispatch::Deliver(Event::Presence(pres))
            }
            InboundMessage::Meta(meta) => {
                tracing::debug!(topic = %meta.topic, "Meta update");
                Dispatch::Deliver(Event::Meta(meta))
            }
            InboundMessage::Info(info) => {
                tracing::trace!(topic = %info.topic, what = %info.what, "Info");
                Dispatch::Deliver(Event::Info(info))
            }
        }
    }

    fn on_ctrl(&mut self, ctrl: CtrlMessage) -> Dispatch {
        let id = ctrl.id.as_deref().unwrap_or("?");
        tracing::info!(code = ctrl.code, id, text = %ctrl.text, "Control reply");

        if ctrl.code >= 500 {
            self.server_errors += 1;
            tracing::warn!(
                code = ctrl.code,
                consecutive = self.server_errors,
                text = %ctrl.text,
                "Server error"
            );
            if self.server_errors > MAX_CONSECUTIVE_SERVER_ERRORS {
                return Dispatch::Fatal(SessionError::ServerError {
                    count: self.server_errors,
                    code: ctrl.code,
                    text: ctrl.text,
                });
            }
            return Dispatch::Ignore;
        }

        self.server_errors = 0;
        match ctrl.code {
            400..=499 => {
                tracing::error!(
                    code = ctrl.code,
                    id,
                    text = %ctrl.text,
                    "Request rejected, check credentials and permissions"
                );
                Dispatch::Fatal(SessionError::ProtocolReject {
                    code: ctrl.code,
                    text: ctrl.text,
                })
            }
            200 if !self.authenticated => {
                self.authenticated = true;
                let user = ctrl.user().map(str::to_string);
                tracing::info!(user = ?user, "Authenticated");
                Dispatch::Authenticated { user }
            }
            201 => {
                tracing::info!("Session registered");
                Dispatch::Ignore
            }
            _ => Dispatch::Ignore,
        }
    }
}
