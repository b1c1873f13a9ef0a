//! Command-line login for the Admarket API
//!
//! Usage:
//!   cargo run -p admarket-auth --features cli --bin admarket-login -- --nsec nsec1...
//!   cargo run -p admarket-auth --features cli --bin admarket-login -- --test-mode
//!   cargo run -p admarket-auth --features cli --bin admarket-login -- --logout
//!
//! Session state is kept in file-backed client storage
//! (`~/.config/admarket` unless `--data-dir` or `ADMARKET_DATA` says
//! otherwise), so a second run picks up the session from the first.

use admarket_auth::extension::SigningExtension;
use admarket_auth::{
    AuthConfig, ClientStorage, FixedDestination, HttpSessionBackend, KeyUtility, KeysExtension,
    LoggingNavigator, LoginController, LoginOutcome, MountOutcome,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "admarket-login")]
#[command(about = "Log in to Admarket with a Nostr identity", long_about = None)]
struct Args {
    /// Secret key (nsec or hex) to sign in with, in place of a browser extension
    #[arg(long, env = "ADMARKET_NSEC", conflicts_with = "test_mode")]
    nsec: Option<String>,

    /// Sign in with a freshly generated test identity
    #[arg(long)]
    test_mode: bool,

    /// Wipe all stored session state and exit
    #[arg(long, conflicts_with_all = ["nsec", "test_mode"])]
    logout: bool,

    /// API base URL (overrides ADMARKET_API_URL)
    #[arg(long)]
    api_url: Option<Url>,

    /// Directory for stored session state (overrides ADMARKET_DATA)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Page the login would be served from
    #[arg(long, default_value = "/login")]
    page: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "admarket_auth=info,admarket_login=info".into()),
        )
        .init();

    let mut config = AuthConfig::from_env().context("Invalid ADMARKET_* configuration")?;
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    let storage = ClientStorage::persistent(&config.data_dir)
        .with_context(|| format!("Failed to open storage in {}", config.data_dir.display()))?;

    let extension: Option<Arc<dyn SigningExtension>> = match args.nsec.as_deref() {
        Some(secret) => Some(Arc::new(KeysExtension::parse(secret)?)),
        None => None,
    };

    let keys = KeyUtility::new(extension, storage);
    let backend = Arc::new(HttpSessionBackend::new(&config.api_url)?);
    let onboarding = Arc::new(FixedDestination(config.default_destination.clone()));
    let navigator = Arc::new(LoggingNavigator);
    let controller = LoginController::new(config, keys, backend, onboarding, navigator);

    if args.logout {
        let report = controller.force_logout();
        for (step, reason) in &report.failed {
            tracing::warn!("{:?} not cleared: {}", step, reason);
        }
        println!("Logged out");
        return Ok(());
    }

    match controller.mount(&args.page).await {
        MountOutcome::Redirected(destination) => {
            let identity = controller.identity().map(|i| i.short_key()).unwrap_or_default();
            println!("Already logged in as {}, continuing to {}", identity, destination);
            return Ok(());
        }
        MountOutcome::Suppressed => {
            if let Some(notice) = controller.take_notice() {
                println!("{}", notice);
            }
        }
        MountOutcome::Ready => {}
    }

    let outcome = if args.test_mode {
        controller.login_with_test_mode().await
    } else {
        controller.login_with_extension().await
    };

    match outcome {
        LoginOutcome::Authenticated {
            identity,
            destination,
        } => {
            println!("Logged in as {}", identity.public_key());
            println!("Continue to {}", destination);
            Ok(())
        }
        LoginOutcome::Failed(failure) => bail!(failure.user_message()),
        LoginOutcome::Superseded => bail!("Login attempt was superseded"),
    }
}
