use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use conn_manager::{
    ConnectionManager, ConnectionState, Environment, FileSettings, ManagerConfig, SettingsStore,
    StatusReport, StopReason, Transport, TransportRegistry,
};
use directories::ProjectDirs;
use server_list::{FileStorage, ServerStore};
use tracing::info;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

mod console;
mod handshake;

use console::{ConsoleEvents, ConsoleNotifier};

#[derive(Parser, Debug)]
#[command(name = "tunnel-client", version, about = "Connect through the first reachable tunnel server")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect and stay connected until the session ends or Ctrl-C
    Connect {
        #[arg(long, default_value = handshake::NAME)]
        transport: String,
        /// Apply the server's split tunnel routes once connected
        #[arg(long, default_value_t = false)]
        split_tunnel: bool,
    },
    /// Connect at launch unless autoconnect is turned off in settings
    Launch {
        #[arg(long, default_value = handshake::NAME)]
        transport: String,
    },
    /// Start if stopped, otherwise stop
    Toggle {
        #[arg(long, default_value = handshake::NAME)]
        transport: String,
    },
    /// Print the merged server list in connection order
    Servers,
    /// Submit feedback text
    Feedback { text: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // Rotating file logger (daily)
    let _ = std::fs::create_dir_all("logs");
    let file_appender = rolling::daily("logs", "tunnel-client.log");
    let (nb_writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(nb_writer)
        .compact()
        .init();

    let cli = Cli::parse();
    let cfg = ManagerConfig::load(cli.config.as_deref()).context("load config")?;
    info!(client_version = %cfg.identity.client_version, "tunnel-client starting");

    let dirs = ProjectDirs::from("org", "tunnel", "tunnel-client")
        .ok_or_else(|| anyhow!("cannot determine a home directory"))?;
    let list_path = dirs.data_dir().join("server_list.dat");
    let store = Arc::new(
        ServerStore::new(Box::new(FileStorage::new(&list_path)), cfg.embedded_list()?)
            .ignore_system_list(cfg.ignore_system_server_list),
    );

    if let Commands::Servers = cli.command {
        let list = store.get_list().context("load server list")?;
        println!("{} servers ({})", list.len(), list_path.display());
        for (i, e) in list.iter().enumerate() {
            println!("{i:>3}  {}:{}", e.address, e.web_port);
        }
        return Ok(());
    }

    let settings = Arc::new(FileSettings::open(dirs.config_dir().join("settings.json")));
    let mut transports = TransportRegistry::new();
    transports.register(handshake::NAME, || Arc::new(handshake::HandshakeTransport::default()) as Arc<dyn Transport>);

    let (notifier, events) = ConsoleNotifier::new();
    let env = Environment::new(cfg, store, transports)
        .notifier(Arc::new(notifier))
        .settings(settings.clone());
    let manager = Arc::new(ConnectionManager::new(env));

    match cli.command {
        Commands::Connect { transport, split_tunnel } => {
            manager.start(&transport, split_tunnel || settings.split_tunnel())?;
            run_session(manager, events).await
        }
        Commands::Launch { transport } => {
            if !should_autoconnect(settings.as_ref()) {
                info!("autoconnect disabled");
                println!("autoconnect is disabled; use `connect` to start");
                return Ok(());
            }
            manager.start(&transport, settings.split_tunnel())?;
            run_session(manager, events).await
        }
        Commands::Toggle { transport } => {
            manager.toggle(&transport, settings.split_tunnel())?;
            run_session(manager, events).await
        }
        Commands::Feedback { text } => {
            manager.send_feedback(text);
            let mut rx = events.feedback;
            let ok = tokio::select! {
                r = rx.wait_for(|r| r.is_some()) => r.map(|v| *v == Some(true)).unwrap_or(false),
                _ = tokio::signal::ctrl_c() => false,
            };
            println!("feedback {}", if ok { "sent" } else { "failed" });
            shutdown(manager).await
        }
        Commands::Servers => Ok(()),
    }
}

fn should_autoconnect(settings: &dyn SettingsStore) -> bool {
    !settings.skip_autoconnect()
}

async fn run_session(manager: Arc<ConnectionManager>, mut events: ConsoleEvents) -> Result<()> {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        _ = events.state.wait_for(|s| *s == ConnectionState::Stopped) => {
            info!("session ended");
        }
        _ = events.quit.wait_for(|q| *q) => {
            info!("relaunched into upgraded client");
        }
    }
    shutdown(manager).await
}

async fn shutdown(manager: Arc<ConnectionManager>) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        if manager.state() == ConnectionState::Connected
            && !manager.send_status_message(true, &StatusReport::default())
        {
            info!("final status not sent");
        }
        manager.stop(StopReason::EXIT);
    })
    .await
    .context("join shutdown task")?;
    Ok(())
}
