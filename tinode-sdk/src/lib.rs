//! Client SDK for Tinode chat servers.
//!
//! Covers the part of a bot that has real control flow: opening the
//! websocket, the hi/login/sub handshake, classifying server replies, and a
//! supervisor that reconnects with exponential backoff. Message content is
//! handed to a consumer-supplied handler; the SDK does nothing with it.

pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod handshake;
pub mod proto;
pub mod session;
pub mod shutdown;
pub mod supervisor;
pub mod transport;

pub use config::{ConnectConfig, ReconnectConfig};
pub use credentials::{CredentialSource, Credentials, EnvCredentials};
pub use error::{ConfigError, ParseError, SessionError};
pub use event::{DataMessage, Event, EventHandler, event_handler};
pub use session::{Session, SessionHandle, SessionOutcome, SessionState};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use supervisor::{Backoff, Supervisor, SupervisorReport, run_with_reconnect};
