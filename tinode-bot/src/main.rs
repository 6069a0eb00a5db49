//! tinode-bot: a Tinode bot that stays connected.
//!
//! Logs in with `BOT_LOGIN` / `BOT_PASSWORD`, subscribes to `me`, and logs
//! every message it receives. With `--echo` it replies with the same
//! content. Reconnects with exponential backoff until Ctrl+C.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tinode_sdk::config::DEFAULT_URL;
use tinode_sdk::{ConnectConfig, Credentials, ReconnectConfig, Shutdown, run_with_reconnect};

use tinode_bot::echo::EchoBot;

#[derive(Parser)]
#[command(name = "tinode-bot", about = "Tinode bot with automatic reconnect")]
struct Args {
    /// Websocket URL of the Tinode server
    #[arg(long, env = "TINODE_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Login name (or set BOT_LOGIN env var)
    #[arg(long, env = "BOT_LOGIN")]
    login: Option<String>,

    /// Password (or set BOT_PASSWORD env var)
    #[arg(long, env = "BOT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Server API key (or set TINODE_API_KEY env var)
    #[arg(long, env = "TINODE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Skip TLS certificate verification
    #[arg(long)]
    tls_insecure: bool,

    /// Don't request the `tinode` websocket subprotocol
    #[arg(long)]
    no_subprotocol: bool,

    /// Language announced to the server
    #[arg(long, default_value = "en")]
    lang: String,

    /// Seconds to wait for the login reply
    #[arg(long, default_value_t = 30)]
    auth_timeout: u64,

    /// Initial reconnect delay in seconds
    #[arg(long, default_value_t = 5)]
    min_delay: u64,

    /// Maximum reconnect delay in seconds
    #[arg(long, default_value_t = 300)]
    max_delay: u64,

    /// Reconnect delay multiplier
    #[arg(long, default_value_t = 2.0)]
    backoff_factor: f64,

    /// Random extra delay, as a fraction of the grown delay (0.0-1.0)
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,

    /// Stop instead of retrying when the server rejects the credentials
    #[arg(long)]
    fatal_auth_rejects: bool,

    /// Reply to every message with the same content
    #[arg(long)]
    echo: bool,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn connect_config(&self) -> ConnectConfig {
        let defaults = ConnectConfig::default();
        ConnectConfig {
            url: self.url.clone(),
            api_key: self.api_key.clone(),
            subprotocol: if self.no_subprotocol { None } else { defaults.subprotocol.clone() },
            tls_insecure: self.tls_insecure,
            user_agent: format!("tinode-bot/{}", env!("CARGO_PKG_VERSION")),
            lang: self.lang.clone(),
            auth_timeout: Duration::from_secs(self.auth_timeout),
            ..defaults
        }
    }

    fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig {
            min_delay: Duration::from_secs(self.min_delay),
            max_delay: Duration::from_secs(self.max_delay.max(self.min_delay)),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
            fatal_auth_rejects: self.fatal_auth_rejects,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tinode_bot=info,tinode_sdk=info".into());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = args.connect_config();
    let reconnect = args.reconnect_config();

    tracing::info!(
        server = %config.url,
        login = args.login.as_deref().unwrap_or("<unset>"),
        echo = args.echo,
        "Tinode bot starting"
    );
    if config.tls_insecure {
        tracing::warn!("TLS certificate verification is disabled");
    }

    let (trigger, shutdown) = Shutdown::new();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Stopping bot (Ctrl+C)"),
            Err(e) => tracing::error!(error = %e, "Can't listen for Ctrl+C, stopping"),
        }
        trigger.trigger();
    });

    let login = args.login.clone();
    let password = args.password.clone();
    let credentials = move || Credentials::from_parts(login.clone(), password.clone());

    let handler = Arc::new(EchoBot::new(args.echo)).into_handler();

    match run_with_reconnect(config, credentials, reconnect, Some(handler), shutdown).await {
        Ok(report) => {
            tracing::info!(
                attempts = report.attempts,
                consecutive_failures = report.consecutive_failures,
                "Bot stopped"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            tracing::error!(error = %e, "Configuration error, not retrying");
            Ok(ExitCode::from(2))
        }
    }
}
