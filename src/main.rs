mod admins;
mod bot;
mod classifier;
mod config;
mod delivery;
mod error;
mod health;
mod notifier;
mod platform;
mod signals;
mod supervisor;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admins::AdminSet;
use crate::bot::AppState;
use crate::config::Config;
use crate::platform::telegram::{TelegramMessenger, TelegramReceiver};
use crate::platform::Messenger;
use crate::supervisor::{RestartPolicy, RestartSupervisor};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,suggestbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let (config, admins) = match Config::load(&config_path)
        .and_then(|config| AdminSet::load(&config.telegram).map(|admins| (config, admins)))
    {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    info!("Configuration loaded successfully");
    info!("  Admins: {:?}", config.telegram.admin_ids);
    info!("  Max restarts: {}", config.supervisor.max_restarts);
    info!("  Health port: {}", config.health.port);

    let shutdown = CancellationToken::new();
    signals::cancel_on_signal(shutdown.clone());

    // The health endpoint runs on its own task and never affects the bot.
    let health = health::spawn(&config.health, shutdown.clone());

    let bot = Bot::new(&config.telegram.bot_token);
    let timeout = config.telegram.request_timeout();
    let messenger: Arc<dyn Messenger> = Arc::new(TelegramMessenger::new(bot.clone(), timeout));
    let state = Arc::new(AppState::new(admins, messenger, config.texts.clone()));

    let mut receiver = TelegramReceiver::new(bot, state.clone(), timeout);
    let mut supervisor =
        RestartSupervisor::new(RestartPolicy::from_config(&config.supervisor));

    info!("Bot is starting...");
    let mut announced = false;
    let startup_text = config.texts.startup.clone();
    let exit = supervisor
        .run(&mut receiver, &shutdown, |identity| {
            if announced {
                return;
            }
            announced = true;
            let state = state.clone();
            let identity = identity.clone();
            let template = startup_text.clone();
            tokio::spawn(async move {
                notifier::announce(&state.dispatcher, &state.admins, &identity, &template).await;
            });
        })
        .await;

    shutdown.cancel();
    match tokio::time::timeout(Duration::from_secs(5), health).await {
        Ok(Err(e)) => error!("Health endpoint task failed: {}", e),
        Err(_) => debug!("Health endpoint still draining connections at exit"),
        Ok(Ok(())) => {}
    }

    debug!("Supervisor history: {:?}", supervisor.history());
    info!(
        "Exiting with {:?} in state {:?} after {} failure(s)",
        exit,
        supervisor.state(),
        supervisor.attempts()
    );
    ExitCode::from(exit.exit_code())
}
