use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

use crate::{
    middleware::rate_limit::RateLimitConfig, queue::EnqueueOptions,
    services::task_dispatcher::TaskLimits,
};

/// Which halves of the service this process runs.
#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// HTTP API and worker pool in one process.
    #[default]
    All,
    Api,
    Worker,
}

impl Mode {
    pub fn serves_http(self) -> bool {
        matches!(self, Mode::All | Mode::Api)
    }

    pub fn runs_workers(self) -> bool {
        matches!(self, Mode::All | Mode::Worker)
    }
}

/// What the binary was asked to do after loading configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Serve,
    Migrate,
    CreateUser(String),
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub mode: Mode,
    pub worker_concurrency: usize,
    pub poll_interval: Duration,
    pub empty_max_retry: u32,
    pub empty_timeout: Duration,
    pub copy_max_retry: u32,
    pub copy_timeout: Duration,
    /// Requests per client IP per window; `0` disables limiting.
    pub rate_limit: u32,
    pub rate_window: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Object storage API with signed requests and bulk bucket tasks")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where payloads are stored (overrides OBJECT_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides OBJECT_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Number of queue workers (overrides OBJECT_VAULT_WORKER_CONCURRENCY)
    #[arg(long)]
    pub worker_concurrency: Option<usize>,

    /// Requests allowed per client IP per window, 0 to disable
    /// (overrides OBJECT_VAULT_RATE_LIMIT)
    #[arg(long)]
    pub rate_limit: Option<u32>,

    /// Run the HTTP API, the workers, or both
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    /// Create a user with this email, print its keys and exit
    #[arg(long, value_name = "EMAIL")]
    pub create_user: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the action to run.
    pub fn from_env_and_args() -> Result<(Self, Action)> {
        Self::resolve(Args::parse(), |key| env::var(key))
    }

    /// Merge `args` over the variables `lookup` yields over the defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<(Self, Action)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let text = |key: &str, default: &str| -> Result<String> {
            match lookup(key) {
                Ok(value) => Ok(value),
                Err(env::VarError::NotPresent) => Ok(default.to_string()),
                Err(err) => Err(err).with_context(|| format!("reading {key}")),
            }
        };

        let cfg = Self {
            host: match args.host {
                Some(host) => host,
                None => text("OBJECT_VAULT_HOST", "0.0.0.0")?,
            },
            port: match args.port {
                Some(port) => port,
                None => parsed(&lookup, "OBJECT_VAULT_PORT", 8080)?,
            },
            storage_dir: match args.storage_dir {
                Some(dir) => dir,
                None => text("OBJECT_VAULT_STORAGE_DIR", "./data/objects")?,
            },
            database_url: match args.database_url {
                Some(url) => url,
                None => text(
                    "OBJECT_VAULT_DATABASE_URL",
                    "sqlite://./data/meta/object_vault.db",
                )?,
            },
            mode: args.mode.unwrap_or_default(),
            worker_concurrency: match args.worker_concurrency {
                Some(n) => n,
                None => parsed(&lookup, "OBJECT_VAULT_WORKER_CONCURRENCY", 10)?,
            }
            .max(1),
            poll_interval: Duration::from_millis(parsed(
                &lookup,
                "OBJECT_VAULT_POLL_INTERVAL_MS",
                500,
            )?),
            empty_max_retry: parsed(&lookup, "OBJECT_VAULT_EMPTY_MAX_RETRY", 5)?,
            empty_timeout: Duration::from_secs(parsed(
                &lookup,
                "OBJECT_VAULT_EMPTY_TIMEOUT_SECS",
                600,
            )?),
            copy_max_retry: parsed(&lookup, "OBJECT_VAULT_COPY_MAX_RETRY", 5)?,
            copy_timeout: Duration::from_secs(parsed(
                &lookup,
                "OBJECT_VAULT_COPY_TIMEOUT_SECS",
                1800,
            )?),
            rate_limit: match args.rate_limit {
                Some(n) => n,
                None => parsed(&lookup, "OBJECT_VAULT_RATE_LIMIT", 20)?,
            },
            rate_window: Duration::from_secs(
                parsed(&lookup, "OBJECT_VAULT_RATE_WINDOW_SECS", 60_u64)?.max(1),
            ),
        };

        let action = if args.migrate {
            Action::Migrate
        } else if let Some(email) = args.create_user {
            Action::CreateUser(email)
        } else {
            Action::Serve
        };
        Ok((cfg, action))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            limit: self.rate_limit,
            window: self.rate_window,
        }
    }

    pub fn task_limits(&self) -> TaskLimits {
        TaskLimits {
            empty: EnqueueOptions {
                max_retry: self.empty_max_retry,
                timeout: self.empty_timeout,
            },
            copy: EnqueueOptions {
                max_retry: self.copy_max_retry,
                timeout: self.copy_timeout,
            },
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {key} value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {key}")),
    }
}
