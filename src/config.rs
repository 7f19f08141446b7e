use anyhow::{Context, Result};
use clap::Parser;
use std::env;
use std::time::Duration;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL of the identity provider, e.g. `https://id.example.com`.
    pub identity_url: String,
    /// Timeout for the outbound identity call; kept short and distinct from
    /// the (longer) time allowed for streaming large objects.
    pub identity_timeout: Duration,
    /// Email address of the designated administrator principal.
    pub admin_email: String,
    /// Optional interval for the background reconcile sweep; `None` means
    /// reconciliation runs only when triggered through the admin endpoint.
    pub reconcile_interval: Option<Duration>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Media storage gateway for the fitness app")]
pub struct Args {
    /// Host to bind to (overrides MEDIA_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides MEDIA_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where media blobs are stored (overrides MEDIA_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides MEDIA_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Identity provider base URL (overrides MEDIA_STORE_IDENTITY_URL)
    #[arg(long)]
    pub identity_url: Option<String>,

    /// Identity call timeout in milliseconds (overrides MEDIA_STORE_IDENTITY_TIMEOUT_MS)
    #[arg(long)]
    pub identity_timeout_ms: Option<u64>,

    /// Administrator email (overrides MEDIA_STORE_ADMIN_EMAIL)
    #[arg(long)]
    pub admin_email: Option<String>,

    /// Background reconcile interval in seconds, 0 disables
    /// (overrides MEDIA_STORE_RECONCILE_INTERVAL_SECS)
    #[arg(long)]
    pub reconcile_interval_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("MEDIA_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("MEDIA_STORE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing MEDIA_STORE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading MEDIA_STORE_PORT"),
        };
        let env_storage =
            env::var("MEDIA_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/media".into());
        let env_db = env::var("MEDIA_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/media_store.db".into());
        let env_identity = env::var("MEDIA_STORE_IDENTITY_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:4000".into());
        let env_identity_timeout_ms = match env::var("MEDIA_STORE_IDENTITY_TIMEOUT_MS") {
            Ok(value) => value.parse::<u64>().with_context(|| {
                format!("parsing MEDIA_STORE_IDENTITY_TIMEOUT_MS value `{}`", value)
            })?,
            Err(env::VarError::NotPresent) => 3_000,
            Err(err) => return Err(err).context("reading MEDIA_STORE_IDENTITY_TIMEOUT_MS"),
        };
        let env_admin = env::var("MEDIA_STORE_ADMIN_EMAIL").unwrap_or_default();
        let env_reconcile_secs = match env::var("MEDIA_STORE_RECONCILE_INTERVAL_SECS") {
            Ok(value) => value.parse::<u64>().with_context(|| {
                format!(
                    "parsing MEDIA_STORE_RECONCILE_INTERVAL_SECS value `{}`",
                    value
                )
            })?,
            Err(env::VarError::NotPresent) => 0,
            Err(err) => return Err(err).context("reading MEDIA_STORE_RECONCILE_INTERVAL_SECS"),
        };

        // --- Merge ---
        let reconcile_secs = args.reconcile_interval_secs.unwrap_or(env_reconcile_secs);
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            identity_url: args.identity_url.unwrap_or(env_identity),
            identity_timeout: Duration::from_millis(
                args.identity_timeout_ms.unwrap_or(env_identity_timeout_ms),
            ),
            admin_email: args.admin_email.unwrap_or(env_admin),
            reconcile_interval: (reconcile_secs > 0)
                .then(|| Duration::from_secs(reconcile_secs)),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
