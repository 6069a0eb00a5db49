//! Content handling: log incoming messages, optionally echo them back.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tinode_sdk::event::{DataMessage, Event, EventHandler, event_handler};
use tinode_sdk::proto::PresMessage;

/// Longest content preview written to the log.
const PREVIEW_CHARS: usize = 100;

/// Per-process bot state. Reset on every new login.
#[derive(Debug, Default)]
pub struct EchoBot {
    echo: bool,
    /// Our user id, from the login reply.
    me: Mutex<Option<String>>,
    /// Topics subscribed during the current session.
    joined: Mutex<HashSet<String>>,
}

impl EchoBot {
    pub fn new(echo: bool) -> Self {
        Self {
            echo,
            ..Default::default()
        }
    }

    pub fn into_handler(self: Arc<Self>) -> EventHandler {
        event_handler(move |handle, event| {
            let bot = self.clone();
            async move {
                match event {
                    Event::Authenticated { user } => bot.on_login(user),
                    Event::Data(msg) => {
                        tracing::info!(
                            from = msg.from.as_deref().unwrap_or("?"),
                            topic = %msg.topic,
                            content = %preview(&msg.content),
                            "Message"
                        );
                        if let Some((topic, content)) = bot.reply_for(&msg) {
                            handle.publish(&topic, content)?;
                        }
                    }
                    Event::Presence(pres) => {
                        if let Some(topic) = bot.topic_to_join(&pres) {
                            tracing::info!(topic = %topic, "Subscribing to conversation");
                            handle.subscribe(&topic)?;
                        }
                    }
                    Event::Disconnected { reason } => tracing::warn!(reason = %reason, "Disconnected"),
                    Event::Meta(_) | Event::Info(_) => {}
                }
                Ok(())
            }
        })
    }

    fn on_login(&self, user: Option<String>) {
        tracing::info!(user = user.as_deref().unwrap_or("?"), "Logged in");
        *self.me.lock() = user;
        self.joined.lock().clear();
    }

    /// The reply to send for an incoming message, if any.
    pub fn reply_for(&self, msg: &DataMessage) -> Option<(String, Value)> {
        if !self.echo || msg.content.is_null() {
            return None;
        }
        let from = msg.from.as_deref()?;
        if self.me.lock().as_deref() == Some(from) {
            return None;
        }
        Some((msg.topic.clone(), msg.content.clone()))
    }

    /// A new message on a topic we are not attached to shows up as a
    /// `pres` on `me`; subscribing to it makes the server send the data.
    pub fn topic_to_join(&self, pres: &PresMessage) -> Option<String> {
        if !self.echo || pres.topic != "me" || pres.what != "msg" {
            return None;
        }
        let src = pres.src.clone()?;
        self.joined.lock().insert(src.clone()).then_some(src)
    }
}

/// Short human-readable form of message content. Drafty documents show
/// their plain text.
pub fn preview(content: &Value) -> String {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("txt") {
            Some(Value::String(s)) => s.clone(),
            _ => content.to_string(),
        },
        other => other.to_string(),
    };
    if text.chars().count() > PREVIEW_CHARS {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{cut}…")
    } else {
        text
    }
}
