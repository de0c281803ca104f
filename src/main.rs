//! Mattermost DM broadcaster - main entry point
//!
//! `script` mode delivers once and exits; `api` mode serves the HTTP trigger.

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use dm_blaster::config::{
    self, non_empty, parse_verify_flag, Settings, ENV_BOT_TOKEN, ENV_HTTP_TIMEOUT,
    ENV_LISTEN_ADDR, ENV_MESSAGE, ENV_MESSAGE_FILE, ENV_RECIPIENTS, ENV_RUN_MODE, ENV_SERVER_URL,
    ENV_SHARED_SECRET, ENV_VERIFY_TLS,
};
use dm_blaster::{delivery, metrics, DeliveryOutcome, TerminalPrompter, TriggerServer};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Deliver once, then exit
    Script,
    /// Serve the HTTP trigger endpoint
    Api,
}

#[derive(Parser)]
#[command(name = "dm_blaster")]
#[command(about = "Mattermost Direct Message Broadcaster", long_about = None)]
#[command(version)]
struct Cli {
    /// Run mode
    #[arg(long, env = ENV_RUN_MODE, value_enum, ignore_case = true, default_value_t = RunMode::Script)]
    mode: RunMode,

    /// Mattermost server URL (e.g., https://chat.example.com)
    #[arg(long, env = ENV_SERVER_URL)]
    server_url: Option<String>,

    /// Bot access token
    #[arg(long, env = ENV_BOT_TOKEN, hide_env_values = true)]
    bot_token: Option<String>,

    /// Recipient user IDs, comma-separated, or a path to a CSV file
    #[arg(long, env = ENV_RECIPIENTS)]
    recipients: Option<String>,

    /// Message text
    #[arg(long, env = ENV_MESSAGE)]
    message: Option<String>,

    /// File holding the message text (used when no message is given)
    #[arg(long, env = ENV_MESSAGE_FILE)]
    message_file: Option<PathBuf>,

    /// Secret expected in the X-Shared-Secret header (api mode)
    #[arg(long, env = ENV_SHARED_SECRET, hide_env_values = true)]
    shared_secret: Option<String>,

    /// Verify TLS certificates; anything but "true" disables verification
    #[arg(long, env = ENV_VERIFY_TLS)]
    verify_ssl: Option<String>,

    /// Listen address for the trigger endpoint (api mode)
    #[arg(long, env = ENV_LISTEN_ADDR, default_value = config::DEFAULT_LISTEN_ADDR)]
    listen: SocketAddr,

    /// Timeout for each Mattermost request in seconds (default: none)
    #[arg(long, env = ENV_HTTP_TIMEOUT)]
    http_timeout_secs: Option<u64>,
}

impl Cli {
    fn settings(&self) -> Settings {
        Settings {
            server_url: non_empty(self.server_url.clone()),
            bot_token: non_empty(self.bot_token.clone()),
            recipients: non_empty(self.recipients.clone()),
            message: non_empty(self.message.clone()),
            message_file: self
                .message_file
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
            shared_secret: non_empty(self.shared_secret.clone()),
            verify_tls: parse_verify_flag(self.verify_ssl.as_deref()),
            http_timeout: self.http_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("dm_blaster=info".parse()?))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    if let Err(err) = settings.check_required() {
        error!("{}. Exiting.", err);
        return Err(err.into());
    }

    match cli.mode {
        RunMode::Api => run_api(cli.listen, settings).await,
        RunMode::Script => {
            metrics::record_run_start("script");
            let start = Instant::now();
            let result = run_script(&settings).await;
            metrics::record_run_result("script", start.elapsed(), result.is_ok());
            result
        }
    }
}

async fn run_script(settings: &Settings) -> anyhow::Result<()> {
    let request = config::resolve_request(settings, &mut TerminalPrompter::stdio())?;
    let report = delivery::deliver(&request).await?;

    for result in &report.results {
        match &result.outcome {
            DeliveryOutcome::Sent => println!("✓ Sent message to user {}", result.recipient),
            DeliveryOutcome::ChannelResolutionFailed(reason) => println!(
                "✗ Failed to get or create DM channel for user {}. Error: {}",
                result.recipient, reason
            ),
            DeliveryOutcome::PostFailed(reason) => println!(
                "✗ Failed to send message to user {}. Error: {}",
                result.recipient, reason
            ),
        }
    }
    println!("Process completed! {}", report.summary());
    Ok(())
}

async fn run_api(listen: SocketAddr, settings: Settings) -> anyhow::Result<()> {
    let server = TriggerServer::bind(listen, settings).await?;
    info!(addr = %server.local_addr()?, "Starting API server");

    tokio::select! {
        result = server.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
    }
}
