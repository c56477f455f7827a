use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use idg_core::config::Config;
use idg_gateway::cli::{Cli, Command, ConfigCommand};
use idg_gateway::metrics::VerifyMetrics;
use idg_gateway::{api, AppState};
use idg_replicator::{DirectoryClient, LdapDirectoryClient, ReplicationDriver};
use idg_sigv4::HmacSessionTokenVerifier;
use idg_store::{RedisStore, Store};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("idg_gateway=info,idg_replicator=info,tower_http=info")),
        )
        .json()
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::load(path)
        .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
    for issue in config.validate() {
        match issue.severity {
            idg_core::config::ConfigSeverity::Error => tracing::error!(%issue, "config validation error"),
            idg_core::config::ConfigSeverity::Warning => tracing::warn!(%issue, "config validation warning"),
        }
    }
    Ok(config)
}

fn session_token_keys(config: &Config) -> HashMap<String, Vec<u8>> {
    match std::env::var(&config.sigv4.session_token_keys_env) {
        Ok(raw) => match serde_json::from_str::<HashMap<String, String>>(&raw) {
            Ok(map) => map.into_iter().map(|(k, v)| (k, v.into_bytes())).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse session token keys, running with none configured");
                HashMap::new()
            }
        },
        Err(_) => {
            tracing::warn!(
                env = %config.sigv4.session_token_keys_env,
                "session token keys env var not set; temporary credentials cannot be verified"
            );
            HashMap::new()
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    let store: Arc<dyn Store> = Arc::new(
        RedisStore::connect(
            &config.store.url,
            Duration::from_millis(config.store.reconnect_backoff_min_ms),
            Duration::from_millis(config.store.reconnect_backoff_max_ms),
        )
        .await?,
    );

    let bind_password = std::env::var(&config.directory.bind_password_env).unwrap_or_default();
    let directory = Arc::new(
        LdapDirectoryClient::connect(
            &config.directory.url,
            &config.directory.bind_dn,
            &bind_password,
            config.directory.search_base.clone(),
            Duration::from_millis(config.directory.search_timeout_ms()),
        )
        .await
        .map_err(|e| anyhow::anyhow!("failed to connect to directory server: {e}"))?,
    );

    let mut driver = ReplicationDriver::bootstrap(
        store.clone(),
        directory,
        config.directory.page_size,
        Duration::from_millis(config.directory.search_timeout_ms()),
        Duration::from_millis(config.store.reconnect_backoff_min_ms),
        Duration::from_millis(config.store.reconnect_backoff_max_ms),
    )
    .await?;
    let driver_metrics = driver.metrics();

    tokio::spawn(async move {
        driver.run().await;
    });

    let token_verifier: Arc<dyn idg_sigv4::SessionTokenVerifier> =
        Arc::new(HmacSessionTokenVerifier::new(session_token_keys(&config)));

    let state = AppState {
        config: config.clone(),
        store,
        token_verifier,
        driver_metrics,
        verify_metrics: Arc::new(VerifyMetrics::default()),
    };

    let cors = build_cors(&config.server.cors.allowed_origins);
    let app = api::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Origins like `http://localhost:*` allow any port on that host, matching
/// the reference workspace's own CORS setup.
fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }
    let origins: Vec<axum::http::HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| o.replace(":*", "").parse().ok())
        .collect();
    CorsLayer::new().allow_origin(origins)
}

async fn doctor(config: Config) -> anyhow::Result<()> {
    println!("checking store at {}...", config.store.url);
    let _store = RedisStore::connect(
        &config.store.url,
        Duration::from_millis(config.store.reconnect_backoff_min_ms),
        Duration::from_millis(100),
    )
    .await?;
    println!("store OK");

    println!("checking directory at {}...", config.directory.url);
    let bind_password = std::env::var(&config.directory.bind_password_env).unwrap_or_default();
    let directory = LdapDirectoryClient::connect(
        &config.directory.url,
        &config.directory.bind_dn,
        &bind_password,
        config.directory.search_base.clone(),
        Duration::from_millis(config.directory.search_timeout_ms()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("directory connect failed: {e}"))?;
    directory.close().await;
    println!("directory OK");

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => {
            init_tracing();
            tracing::info!("identity gateway starting");
            let config = load_config(&config)?;
            serve(config).await
        }
        Command::Doctor { config } => {
            init_tracing();
            let config = load_config(&config)?;
            doctor(config).await
        }
        Command::Config(ConfigCommand::Validate { config }) => {
            let config = Config::load(&config)?;
            let issues = config.validate();
            if issues.is_empty() {
                println!("config OK");
            } else {
                for issue in &issues {
                    println!("{issue}");
                }
            }
            let has_error = issues
                .iter()
                .any(|i| i.severity == idg_core::config::ConfigSeverity::Error);
            if has_error {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show { config }) => {
            let config = Config::load(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Version => {
            println!("idg-gateway {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
