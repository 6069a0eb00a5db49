//! In-memory transport for driving sessions without a server.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use tinode_sdk::error::SessionError;
use tinode_sdk::shutdown::ShutdownTrigger;
use tinode_sdk::transport::{Connector, Transport};

pub type Inbound = mpsc::UnboundedSender<Result<String, SessionError>>;

/// The server side of a [`MockTransport`]. The stream ends cleanly once
/// the peer hung up and every sender clone is dropped.
pub struct MockPeer {
    inbound: Option<Inbound>,
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
}

impl MockPeer {
    pub fn push(&self, frame: impl Into<String>) {
        self.sender().send(Ok(frame.into())).unwrap();
    }

    pub fn push_error(&self, error: SessionError) {
        self.sender().send(Err(error)).unwrap();
    }

    /// Another handle for feeding frames, e.g. from a timed driver.
    pub fn sender(&self) -> Inbound {
        self.inbound.clone().expect("peer already hung up")
    }

    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    pub fn sent_json(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    /// Request ids of everything sent, in order.
    pub fn sent_ids(&self) -> Vec<String> {
        self.sent_json()
            .iter()
            .map(|v| {
                let (_, body) = v.as_object().unwrap().iter().next().unwrap();
                body["id"].as_str().unwrap().to_string()
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Result<String, SessionError>>,
    sent: Arc<Mutex<Vec<String>>>,
    closes: Arc<AtomicUsize>,
    fail_send_at: Option<usize>,
}

impl MockTransport {
    /// Fail the send with this index (0 = hi).
    pub fn failing_send_at(mut self, index: usize) -> Self {
        self.fail_send_at = Some(index);
        self
    }
}

pub fn pair() -> (MockTransport, MockPeer) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sent = Arc::new(Mutex::new(Vec::new()));
    let closes = Arc::new(AtomicUsize::new(0));
    (
        MockTransport {
            inbound: rx,
            sent: sent.clone(),
            closes: closes.clone(),
            fail_send_at: None,
        },
        MockPeer {
            inbound: Some(tx),
            sent,
            closes,
        },
    )
}

impl Transport for MockTransport {
    async fn send(&mut self, frame: String) -> Result<(), SessionError> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_send_at == Some(sent.len()) {
            return Err(SessionError::Transport("broken pipe".into()));
        }
        sent.push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>, SessionError> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        // Counted on every call so tests can catch double closes.
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out scripted open results in order. Once the script runs out it
/// fires `on_exhausted` (if set) and fails to connect.
pub struct MockConnector {
    script: Mutex<VecDeque<Result<MockTransport, SessionError>>>,
    opens: Arc<AtomicUsize>,
    on_exhausted: Option<ShutdownTrigger>,
}

impl MockConnector {
    pub fn new(script: Vec<Result<MockTransport, SessionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            opens: Arc::new(AtomicUsize::new(0)),
            on_exhausted: None,
        }
    }

    pub fn shutdown_when_exhausted(mut self, trigger: ShutdownTrigger) -> Self {
        self.on_exhausted = Some(trigger);
        self
    }

    pub fn opens(&self) -> Arc<AtomicUsize> {
        self.opens.clone()
    }
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self) -> Result<MockTransport, SessionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                if let Some(ref trigger) = self.on_exhausted {
                    trigger.trigger();
                }
                Err(SessionError::Connect("script exhausted".into()))
            }
        }
    }
}

pub fn refused() -> Result<MockTransport, SessionError> {
    Err(SessionError::Connect("connection refused".into()))
}

pub fn ctrl(id: &str, code: u16, text: &str) -> String {
    serde_json::json!({"ctrl": {"id": id, "code": code, "text": text}}).to_string()
}

pub fn login_ok(id: &str, user: &str) -> String {
    serde_json::json!({"ctrl": {"id": id, "code": 200, "text": "ok", "params": {"user": user}}}).to_string()
}

pub fn data(from: &str, topic: &str, content: &str) -> String {
    serde_json::json!({"data": {"topic": topic, "from": from, "seq": 1, "content": content}}).to_string()
}
