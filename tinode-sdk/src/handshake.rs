//! The hi → login → sub bootstrap sequence.
//!
//! Requests are fired back to back without waiting for replies: the
//! websocket preserves order and the server handles requests in arrival
//! order, so sending login before sub is all the ordering we need.

use crate::config::{ConnectConfig, PROTOCOL_VERSION};
use crate::credentials::Credentials;
use crate::error::SessionError;
use crate::proto::{OutboundMessage, Request};
use crate::transport::Transport;

/// Per-attempt request id counter. Starts at 1, never repeats.
#[derive(Debug)]
pub struct RequestIds {
    next: u64,
}

impl RequestIds {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next += 1;
        id
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// Handshake step, in send order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    Hello,
    Login,
    Subscribe,
}

/// Ids assigned to the three handshake requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeIds {
    pub hello: u64,
    pub login: u64,
    pub subscribe: u64,
}

/// Build the handshake messages in the order they must be sent.
pub fn handshake_messages(
    config: &ConnectConfig,
    credentials: &Credentials,
) -> [(HandshakeStep, OutboundMessage); 3] {
    [
        (
            HandshakeStep::Hello,
            OutboundMessage::Hello {
                version: PROTOCOL_VERSION.to_string(),
                agent: config.user_agent.clone(),
                language: config.lang.clone(),
            },
        ),
        (
            HandshakeStep::Login,
            OutboundMessage::Login {
                scheme: "basic".to_string(),
                secret: credentials.basic_secret(),
            },
        ),
        (
            HandshakeStep::Subscribe,
            OutboundMessage::Subscribe {
                topic: config.topic.clone(),
            },
        ),
    ]
}

/// Assign the next id to `message`, encode it and send it.
pub async fn send_request<T: Transport>(
    transport: &mut T,
    ids: &mut RequestIds,
    message: OutboundMessage,
) -> Result<u64, SessionError> {
    let request = Request {
        id: ids.next_id(),
        message,
    };
    let frame = request
        .encode()
        .map_err(|e| SessionError::Transport(format!("encode {} failed: {e}", request.message.kind())))?;
    // Never log the login frame, it carries the secret.
    if matches!(request.message, OutboundMessage::Login { .. }) {
        tracing::debug!(id = request.id, kind = "login", "Sending request");
    } else {
        tracing::debug!(id = request.id, kind = request.message.kind(), frame = %frame, "Sending request");
    }
    transport.send(frame).await?;
    Ok(request.id)
}

/// Send hi, login and sub. The first failed send aborts the rest.
pub async fn perform<T: Transport>(
    transport: &mut T,
    ids: &mut RequestIds,
    config: &ConnectConfig,
    credentials: &Credentials,
) -> Result<HandshakeIds, SessionError> {
    let mut sent = [0u64; 3];
    for (n, (step, message)) in handshake_messages(config, credentials).into_iter().enumerate() {
        tracing::info!(step = n + 1, ?step, "Sending handshake request");
        sent[n] = send_request(transport, ids, message)
            .await
            .inspect_err(|e| tracing::warn!(?step, error = %e, "Handshake aborted"))?;
    }
    Ok(HandshakeIds {
        hello: sent[0],
        login: sent[1],
        subscribe: sent[2],
    })
}
