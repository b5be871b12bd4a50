use anyhow::Result;
use object_vault::{
    config::{Action, AppConfig},
    db,
    services::{account_service::AccountService, metadata_store::MetadataStore},
};
use std::{io::ErrorKind, net::SocketAddr};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + action ---
    let (cfg, action) = AppConfig::from_env_and_args()?;
    tracing::info!("Starting object-vault with config: {:?}", cfg);

    // --- Initialize SQLite connection and schema ---
    let pool_size = (cfg.worker_concurrency as u32).saturating_add(5);
    let db = db::connect(&cfg.database_url, pool_size).await?;
    db::run_migrations(&db).await?;

    match action {
        Action::Migrate => {
            tracing::info!("Database migration complete.");
            return Ok(());
        }
        Action::CreateUser(email) => {
            let creds = AccountService::new(MetadataStore::new(db))
                .create_user(&email)
                .await?;
            println!("user_id:    {}", creds.user_id);
            println!("email:      {}", creds.email);
            println!("access_key: {}", creds.access_key);
            println!("secret_key: {}", creds.secret_key);
            return Ok(());
        }
        Action::Serve => {}
    }

    // --- Ensure storage directory exists ---
    tokio::fs::create_dir_all(&cfg.storage_dir).await?;

    let (state, workers) =
        object_vault::build(
            db,
            cfg.storage_dir.clone(),
            cfg.task_limits(),
            cfg.poll_interval,
            cfg.rate_limit(),
        );

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    // --- Start workers ---
    let handles = if cfg.mode.runs_workers() {
        workers.recover().await?;
        workers.spawn(cfg.worker_concurrency, shutdown.clone())
    } else {
        Vec::new()
    };

    // --- Start server ---
    if cfg.mode.serves_http() {
        let addr = cfg.addr();
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err)
                if err.kind() == ErrorKind::PermissionDenied
                    && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
            {
                let fallback_addr = format!("127.0.0.1:{}", cfg.port);
                tracing::warn!(
                    "Permission denied binding to {} ({}). Falling back to {}",
                    addr,
                    err,
                    fallback_addr
                );
                TcpListener::bind(&fallback_addr).await?
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!("Server listening on http://{}", listener.local_addr()?);
        // Peer addresses feed the per-IP rate limiter.
        let app = object_vault::app(state).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await?;
    } else {
        shutdown.cancelled().await;
    }

    shutdown.cancel();
    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "worker task panicked");
        }
    }
    tracing::info!("Shutdown complete.");
    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received.");
    token.cancel();
}
