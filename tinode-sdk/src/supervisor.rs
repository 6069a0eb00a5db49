//! Reconnect supervision: run sessions back to back with exponential backoff.

use std::time::Duration;

use rand::Rng;

use crate::config::{ConnectConfig, ReconnectConfig};
use crate::credentials::CredentialSource;
use crate::error::{ConfigError, SessionError};
use crate::event::EventHandler;
use crate::session::Session;
use crate::shutdown::Shutdown;
use crate::transport::{Connector, WsConnector};

/// Delay between attempts. Always within `[min, max]`.
#[derive(Debug, Clone)]
pub struct Backoff {
    delay: Duration,
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    consecutive_failures: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        let min = config.min_delay;
        let max = config.max_delay.max(min);
        let factor = if config.backoff_factor.is_finite() && config.backoff_factor >= 1.0 {
            config.backoff_factor
        } else {
            1.0
        };
        let jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            delay: min,
            min,
            max,
            factor,
            jitter,
            consecutive_failures: 0,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// A productive attempt: back to the minimum delay.
    pub fn reset(&mut self) -> Duration {
        self.delay = self.min;
        self.consecutive_failures = 0;
        self.delay
    }

    /// A failed attempt. Returns the delay to wait now and grows the delay
    /// used after the next failure.
    pub fn record_failure(&mut self) -> Duration {
        self.consecutive_failures += 1;
        let wait = self.delay;

        let mut secs = self.delay.as_secs_f64() * self.factor;
        if self.jitter > 0.0 {
            secs += secs * rand::thread_rng().gen_range(0.0..=self.jitter);
        }
        let secs = secs.clamp(self.min.as_secs_f64(), self.max.as_secs_f64());
        self.delay = Duration::from_secs_f64(secs);
        wait
    }
}

/// Summary returned when the supervisor stops on shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorReport {
    pub attempts: u32,
    pub consecutive_failures: u32,
    /// Delay that would have been used for the next failure.
    pub delay: Duration,
}

/// Runs session attempts until shutdown or a configuration error.
pub struct Supervisor<C, S> {
    connector: C,
    credentials: S,
    config: ConnectConfig,
    reconnect: ReconnectConfig,
    handler: Option<EventHandler>,
}

impl<C: Connector, S: CredentialSource> Supervisor<C, S> {
    pub fn new(connector: C, credentials: S, config: ConnectConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            connector,
            credentials,
            config,
            reconnect,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: EventHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Loop until `shutdown` fires. Only a [`ConfigError`] ends it early.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<SupervisorReport, ConfigError> {
        let mut backoff = Backoff::new(&self.reconnect);
        let mut attempts = 0u32;

        while !shutdown.is_triggered() {
            // Config errors are returned, the caller reports them.
            let credentials = self.credentials.load()?;

            attempts += 1;
            tracing::info!(attempt = attempts, login = credentials.login(), "Starting session attempt");
            let outcome = Session::new(self.config.clone(), credentials)
                .run(&self.connector, self.handler.as_ref(), &mut shutdown)
                .await;
            if outcome.is_cancelled() {
                break;
            }

            if self.reconnect.fatal_auth_rejects {
                if let Some(SessionError::ProtocolReject { code: code @ (401 | 403), text }) = outcome.error() {
                    return Err(ConfigError::Rejected {
                        code: *code,
                        text: text.clone(),
                    });
                }
            }

            let wait = if outcome.productive {
                backoff.reset()
            } else {
                let wait = backoff.record_failure();
                tracing::warn!(
                    attempt = attempts,
                    consecutive_failures = backoff.consecutive_failures(),
                    error = ?outcome.error(),
                    "Attempt failed"
                );
                wait
            };

            tracing::info!(delay_secs = wait.as_secs(), "Reconnecting after delay");
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        tracing::info!(attempts, "Supervisor stopped");
        Ok(SupervisorReport {
            attempts,
            consecutive_failures: backoff.consecutive_failures(),
            delay: backoff.delay(),
        })
    }
}

/// Connect over websocket and keep reconnecting until `shutdown` fires.
///
/// `handler` receives every event of every session; returns only on shutdown
/// or a configuration error.
pub async fn run_with_reconnect<S: CredentialSource>(
    config: ConnectConfig,
    credentials: S,
    reconnect: ReconnectConfig,
    handler: Option<EventHandler>,
    shutdown: Shutdown,
) -> Result<SupervisorReport, ConfigError> {
    let connector = WsConnector::new(config.clone());
    let mut supervisor = Supervisor::new(connector, credentials, config, reconnect);
    if let Some(handler) = handler {
        supervisor = supervisor.with_handler(handler);
    }
    supervisor.run(shutdown).await
}
