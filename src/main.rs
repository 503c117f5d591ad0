//! # parley
//!
//! Direct-message server binary: loads settings, opens the database and
//! serves HTTP + live connections until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parley_auth::{JwtKeys, JwtVerifier, TokenIssuer};
use parley_server::ParleyServer;
use parley_settings::{LoggingSettings, ParleySettings};
use parley_store::{Database, UserRepo};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parley", about = "Real-time direct message server")]
struct Cli {
    /// Settings file (defaults to `$PARLEY_SETTINGS` or `~/.parley/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Port to bind (0 for auto-assign). Overrides settings.
    #[arg(long)]
    port: Option<u16>,

    /// Path to the SQLite database. Overrides settings.
    #[arg(long)]
    db: Option<PathBuf>,
}

impl Cli {
    fn load_settings(&self) -> Result<ParleySettings> {
        let mut settings = match &self.config {
            Some(path) => parley_settings::load_settings_from_path(path),
            None => parley_settings::load_settings(),
        }
        .context("failed to load settings")?;

        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(db) = &self.db {
            settings.database.path.clone_from(db);
        }
        Ok(settings)
    }
}

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn jwt_keys(secret: &str) -> JwtKeys {
    if secret.is_empty() {
        tracing::warn!(
            "no jwt_secret configured; generated a per-process secret, \
             tokens will not survive a restart"
        );
        JwtKeys::generate()
    } else {
        JwtKeys::from_secret(secret)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load_settings()?;
    init_tracing(&settings.logging);

    tracing::info!("starting parley");

    let db = Database::open(&settings.database.path)
        .with_context(|| format!("failed to open database {}", settings.database.path.display()))?;
    if settings.seed_demo_users {
        let inserted = UserRepo::new(db.clone())
            .seed_demo_users()
            .context("failed to seed demo users")?;
        tracing::info!(inserted, db = %db.path().display(), "demo users ready");
    }

    let keys = jwt_keys(&settings.auth.jwt_secret);
    let issuer = TokenIssuer::new(keys.clone(), Duration::from_secs(settings.auth.token_ttl_secs));
    let verifier = Arc::new(JwtVerifier::new(keys));

    let server = ParleyServer::new(settings.server.clone(), db, issuer, verifier);
    let (addr, handle) = server.listen().await.context("failed to start server")?;
    tracing::info!(%addr, "parley ready");

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    let _ = server.shutdown().drain(vec![handle], None).await;
    Ok(())
}
