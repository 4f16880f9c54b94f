#![cfg(feature = "cli")]
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wvrelay::auth::TokenService;
use wvrelay::config::Config;
use wvrelay::device::DeviceSessionManager;
use wvrelay::proxy::LicenseProxy;
use wvrelay::scheduler::RefreshScheduler;
use wvrelay::signing::RemoteSigningAgent;
use wvrelay::store::{CredentialStore, FileCredentialStore};
use wvrelay::upstream::UpstreamClient;

#[derive(Parser)]
#[command(name = "wvrelay", version, disable_version_flag = true, about = "wvrelay CLI")]
struct Cli {
    #[arg(short = 'v', long = "version", action = ArgAction::SetTrue)]
    version: bool,

    #[arg(short = 'd', long = "debug", action = ArgAction::SetTrue)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Refresh sessions on schedule, sign the device in, and serve the proxy.
    Serve {
        config_path: PathBuf,
        #[arg(short = 'H', long = "host")]
        host: Option<String>,
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Run a single access session refresh and persist the result.
    Refresh { config_path: PathBuf },
    /// Print the unverified claims of a token as JSON.
    Inspect { token: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(None, cli.debug))
        .init();

    info!("wvrelay version {}", env!("CARGO_PKG_VERSION"));

    if cli.version {
        return Ok(());
    }

    match cli.command {
        Some(Commands::Serve {
            config_path,
            host,
            port,
        }) => block_on(run_serve(&config_path, host, port)),
        Some(Commands::Refresh { config_path }) => block_on(run_refresh(&config_path)),
        Some(Commands::Inspect { token }) => run_inspect(&token),
        None => Ok(()),
    }
}

/// Load `.env` into the environment, then build the log filter from
/// `RUST_LOG`, falling back to INFO or DEBUG.
fn log_filter(env_file: Option<&Path>, debug: bool) -> EnvFilter {
    // A missing .env file is fine.
    let _ = match env_file {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::dotenv().map(|_| ()),
    };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }))
}

fn block_on<F: std::future::Future<Output = anyhow::Result<()>>>(future: F) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create runtime")?;
    runtime.block_on(future)
}

fn load_config(config_path: &Path) -> anyhow::Result<Config> {
    Config::load(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))
}

fn http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("Failed to build HTTP client")
}

async fn run_refresh(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::from_config(&config.credentials));
    store.ensure_provisioned().await?;

    let tokens = TokenService::from_config(&config, http_client(&config)?, store);
    let session = tokens.refresh().await.context("Refresh failed")?;
    match session.expires() {
        Some(exp) => info!("[+] Access session valid until {}", exp),
        None => warn!("[-] Access session has no usable expiry"),
    }
    Ok(())
}

async fn run_serve(config_path: &Path, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let http = http_client(&config)?;

    let agent_config = config.require_signing_agent()?;
    let agent = RemoteSigningAgent::new(agent_config.url.clone(), http.clone());
    agent.ping().await?;
    info!("[+] Signing agent reachable at {}", agent_config.url);

    let store: Arc<dyn CredentialStore> = Arc::new(FileCredentialStore::from_config(&config.credentials));
    store.ensure_provisioned().await?;

    let tokens = Arc::new(TokenService::from_config(&config, http.clone(), store));
    let cancel = CancellationToken::new();

    let scheduler = if config.services.session.disabled {
        info!("[+] Session service disabled");
        None
    } else {
        if let Err(e) = tokens.refresh().await {
            if e.is_fatal() {
                return Err(e).context("Initial session refresh failed");
            }
            warn!("[-] Initial session refresh failed, will retry on schedule: {}", e);
        }
        let schedule = config.session_schedule()?;
        Some(RefreshScheduler::new(schedule, Arc::clone(&tokens)).spawn(cancel.child_token()))
    };

    let device = Arc::new(DeviceSessionManager::from_config(
        &config,
        http.clone(),
        Arc::new(agent),
        Arc::clone(&tokens),
    ));
    {
        let device = Arc::clone(&device);
        tokio::spawn(async move {
            if let Err(e) = device.sign_in().await {
                error!("[-] Device sign-in failed, assets cannot be prepared: {}", e);
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("[+] Shutting down");
            }
            cancel.cancel();
        });
    }

    if config.services.proxy.disabled {
        info!("[+] Proxy service disabled");
        cancel.cancelled().await;
    } else {
        let proxy = Arc::new(LicenseProxy::new(
            Arc::clone(&tokens),
            device,
            UpstreamClient::from_config(&config, http),
        ));
        let host = host.unwrap_or_else(|| config.services.proxy.host.clone());
        let port = port.unwrap_or(config.services.proxy.port);
        wvrelay::serve::run(proxy, &host, port, cancel.clone()).await?;
    }

    if let Some(handle) = scheduler {
        cancel.cancel();
        let _ = handle.await;
    }
    Ok(())
}

fn run_inspect(token: &str) -> anyhow::Result<()> {
    let claims = wvrelay::token::decode_json(token).context("Failed to decode token")?;
    println!("{}", serde_json::to_string_pretty(&claims)?);
    match wvrelay::token::expires_at(token)? {
        Some(exp) => info!("[+] Expires {}", exp),
        None => info!("[+] No expiry claim"),
    }
    Ok(())
}
