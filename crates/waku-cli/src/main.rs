mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use waku_bridge::BridgeClientFactory;
use waku_core::config::Config;
use waku_core::session::CREDENTIAL_STORE_FILE;
use waku_gateway::{AppState, SessionRegistry, WebhookDispatcher};

#[derive(Parser)]
#[command(
    name = "waku",
    about = "Multi-device WhatsApp gateway with a REST API and webhook relay",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to listen on (default: 8080)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Session management
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the configuration for problems
    Validate,
}

#[derive(Subcommand)]
enum SessionAction {
    /// List persisted sessions
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let mut config = Config::load(&config_path)?;
    config.apply_env_overrides();

    logging::init(&config.logging.clone().unwrap_or_default(), cli.verbose)?;

    match cli.command {
        Commands::Serve { port } => serve(config, port).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
        Commands::Sessions { action } => match action {
            SessionAction::List => {
                let dir = config.session_dir();
                let sessions = persisted_sessions(&dir)?;
                if sessions.is_empty() {
                    println!("No sessions in {}", dir.display());
                }
                for (device_id, paired) in sessions {
                    let label = if paired { "paired" } else { "no credentials" };
                    println!("{device_id}\t{label}");
                }
            }
        },
    }

    Ok(())
}

async fn serve(config: Config, port: Option<u16>) -> anyhow::Result<()> {
    let port = port.unwrap_or_else(|| config.server_port());
    let session_dir = config.session_dir();
    std::fs::create_dir_all(&session_dir)?;

    let dispatcher = Arc::new(WebhookDispatcher::new(&config.webhook())?);
    if dispatcher.is_active() {
        tracing::info!(retries = dispatcher.retry_count(), "Webhook relay enabled");
    }

    let bridge = config.bridge();
    let factory = Arc::new(BridgeClientFactory::new(
        bridge.api_url.clone(),
        bridge.poll_interval(),
        bridge.request_timeout(),
    )?);
    tracing::info!(bridge = %bridge.api_url, "Using protocol bridge");

    let registry = Arc::new(SessionRegistry::new(
        session_dir,
        config.sessions().pairing_queue_capacity,
        factory,
        dispatcher,
    ));
    let restored = registry.load_persisted().await?;
    tracing::info!(restored, "Persisted sessions loaded");

    let deadline = config.shutdown_timeout();
    let state = AppState::new(Arc::new(config), registry.clone());
    #[cfg(feature = "metrics")]
    let state = match waku_gateway::metrics::install_prometheus_recorder() {
        Ok(handle) => state.with_prometheus(handle),
        Err(e) => {
            tracing::warn!(%e, "Prometheus recorder not installed");
            state
        }
    };

    tracing::info!("Starting waku gateway on port {port}");
    let served = waku_gateway::start_gateway(Arc::new(state), port).await;

    if !registry.shutdown(deadline).await {
        tracing::warn!("Some sessions did not disconnect before the shutdown deadline");
    }
    served
}

/// Device directories under the session root, sorted, with whether each holds
/// a credential store.
fn persisted_sessions(root: &Path) -> anyhow::Result<Vec<(String, bool)>> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut sessions = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let paired = entry.path().join(CREDENTIAL_STORE_FILE).is_file();
        sessions.push((entry.file_name().to_string_lossy().into_owned(), paired));
    }
    sessions.sort();
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persisted_sessions_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = persisted_sessions(&dir.path().join("absent")).unwrap();
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_persisted_sessions_reports_credentials() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shop-02")).unwrap();
        std::fs::create_dir(dir.path().join("shop-01")).unwrap();
        std::fs::write(dir.path().join("shop-01").join(CREDENTIAL_STORE_FILE), b"x").unwrap();
        std::fs::write(dir.path().join("stray.txt"), b"x").unwrap();

        let sessions = persisted_sessions(dir.path()).unwrap();
        assert_eq!(
            sessions,
            vec![("shop-01".to_string(), true), ("shop-02".to_string(), false)]
        );
    }

    #[test]
    fn test_cli_parses_serve_port() {
        let cli = Cli::try_parse_from(["waku", "serve", "--port", "9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000) }));
    }
}
