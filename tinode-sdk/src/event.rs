//! Events delivered to the consumer's handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use crate::proto::DataMessage;
use crate::proto::{InfoMessage, MetaMessage, PresMessage};
use crate::session::SessionHandle;

/// Events that the SDK emits to the consumer (bot, bridge, etc.)
#[derive(Debug, Clone)]
pub enum Event {
    /// Login succeeded. `user` is our user id when the server reported it.
    Authenticated {
        user: Option<String>,
    },

    /// Content published by someone on a subscribed topic.
    Data(DataMessage),

    /// Presence change (online/offline, new message on a topic, ...).
    Presence(PresMessage),

    /// Topic metadata reply.
    Meta(MetaMessage),

    /// Typing notification or read/recv receipt.
    Info(InfoMessage),

    /// The session ended.
    Disconnected {
        reason: String,
    },
}

/// Future returned by an [`EventHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Consumer callback, invoked once per event in arrival order.
///
/// Errors are logged and otherwise ignored; the SDK never retries a handler.
pub type EventHandler = Arc<dyn Fn(SessionHandle, Event) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure as an [`EventHandler`].
///
/// ```rust,no_run
/// use tinode_sdk::event::{Event, event_handler};
///
/// let handler = event_handler(|_handle, event| async move {
///     if let Event::Data(data) = event {
///         println!("{:?}: {}", data.from, data.content);
///     }
///     Ok(())
/// });
/// ```
pub fn event_handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(SessionHandle, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |handle: SessionHandle, event: Event| -> HandlerFuture { Box::pin(f(handle, event)) })
}
