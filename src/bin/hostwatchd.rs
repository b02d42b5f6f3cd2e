use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use hostwatch::config::AppConfig;
use hostwatch::monitor::MonitoringService;
use hostwatch::notifications::senders::{LogSender, NotificationSender, TelegramSender};
use hostwatch::notifications::QueuedNotifier;
use hostwatch::probe::NetworkProbe;
use hostwatch::scheduler::JobScheduler;
use hostwatch::secrets::CredentialVault;
use hostwatch::store::{JobStore, MemoryJobStore, SqliteJobStore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging() {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily("logs", "hostwatchd.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::from_env()?,
    };

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(url) => {
            info!(database_url = %url, "using SQLite job store");
            Arc::new(SqliteJobStore::connect(url).await?)
        }
        None => {
            warn!("no database configured, monitored hosts will not survive a restart");
            Arc::new(MemoryJobStore::new())
        }
    };

    let vault = match &config.encryption_key {
        Some(key) => Some(Arc::new(CredentialVault::from_hex_key(key)?)),
        None => None,
    };

    let sender: Arc<dyn NotificationSender> = match &config.telegram {
        Some(telegram) => Arc::new(TelegramSender::new(telegram.bot_token.clone())),
        None => {
            warn!("no Telegram bot token configured, notifications go to the log only");
            Arc::new(LogSender)
        }
    };
    let sink = QueuedNotifier::start(sender);

    let probe = Arc::new(NetworkProbe::new(
        Duration::from_secs(config.limits.ping_timeout_seconds),
        Duration::from_secs(config.limits.port_check_timeout_seconds),
    ));
    let scheduler = Arc::new(JobScheduler::new());

    let service = MonitoringService::new(
        store,
        scheduler,
        probe,
        sink,
        vault,
        config.limits.clone(),
    );

    let restored = service.load_all_jobs().await?;
    info!(restored, "hostwatch daemon running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received, exiting");
    Ok(())
}
