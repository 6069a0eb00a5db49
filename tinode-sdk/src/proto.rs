//! Tinode JSON wire frames.
//!
//! Client packets are externally tagged objects (`{"hi": {...}}`) carrying a
//! string request id. Server frames hold exactly one of `ctrl`, `data`,
//! `pres`, `meta` or `info`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ParseError;

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Hello { version: String, agent: String, language: String },
    Login { scheme: String, secret: String },
    Subscribe { topic: String },
    Publish { topic: String, content: Value },
}

impl OutboundMessage {
    /// Wire tag of the message.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Hello { .. } => "hi",
            OutboundMessage::Login { .. } => "login",
            OutboundMessage::Subscribe { .. } => "sub",
            OutboundMessage::Publish { .. } => "pub",
        }
    }
}

/// An outbound message bound to its request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub message: OutboundMessage,
}

impl Request {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let id = self.id.to_string();
        let packet = match &self.message {
            OutboundMessage::Hello { version, agent, language } => ClientPacket::Hi {
                id: &id,
                ver: version,
                ua: agent,
                lang: language,
            },
            OutboundMessage::Login { scheme, secret } => ClientPacket::Login { id: &id, scheme, secret },
            OutboundMessage::Subscribe { topic } => ClientPacket::Sub { id: &id, topic },
            OutboundMessage::Publish { topic, content } => ClientPacket::Pub {
                id: &id,
                topic,
                noecho: true,
                content,
            },
        };
        serde_json::to_string(&packet)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum ClientPacket<'a> {
    Hi { id: &'a str, ver: &'a str, ua: &'a str, lang: &'a str },
    Login { id: &'a str, scheme: &'a str, secret: &'a str },
    Sub { id: &'a str, topic: &'a str },
    Pub { id: &'a str, topic: &'a str, noecho: bool, content: &'a Value },
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Control(CtrlMessage),
    Data(DataMessage),
    Presence(PresMessage),
    Meta(MetaMessage),
    Info(InfoMessage),
}

/// Reply to a client request: a status code and text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CtrlMessage {
    /// Id of the request this replies to.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
    pub code: u16,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
}

impl CtrlMessage {
    /// User id from a login reply (`params.user`).
    pub fn user(&self) -> Option<&str> {
        self.params.as_ref()?.get("user")?.as_str()
    }
}

/// Content published to a topic by another party.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataMessage {
    pub topic: String,
    /// Sender user id; absent for server-generated content.
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub seq: u64,
    /// Plain string or a Drafty document.
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PresMessage {
    pub topic: String,
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub what: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetaMessage {
    #[serde(default)]
    pub id: Option<String>,
    pub topic: String,
}

/// Typing notifications and read/recv receipts.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InfoMessage {
    pub topic: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub what: String,
}

#[derive(Deserialize)]
struct ServerFrame {
    ctrl: Option<CtrlMessage>,
    data: Option<DataMessage>,
    pres: Option<PresMessage>,
    meta: Option<MetaMessage>,
    info: Option<InfoMessage>,
}

/// Decode one server frame.
pub fn decode(frame: &str) -> Result<InboundMessage, ParseError> {
    let f: ServerFrame = serde_json::from_str(frame)?;
    let present = [
        f.ctrl.is_some(),
        f.data.is_some(),
        f.pres.is_some(),
        f.meta.is_some(),
        f.info.is_some(),
    ]
    .into_iter()
    .filter(|p| *p)
    .count();
    if present > 1 {
        return Err(ParseError::Ambiguous(present));
    }

    if let Some(c) = f.ctrl {
        Ok(InboundMessage::Control(c))
    } else if let Some(d) = f.data {
        Ok(InboundMessage::Data(d))
    } else if let Some(p) = f.pres {
        Ok(InboundMessage::Presence(p))
    } else if let Some(m) = f.meta {
        Ok(InboundMessage::Meta(m))
    } else if let Some(i) = f.info {
        Ok(InboundMessage::Info(i))
    } else {
        Err(ParseError::Empty)
    }
}
