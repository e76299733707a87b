use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mailqueue_dispatcher::config::Config;
use mailqueue_dispatcher::dispatch::Dispatcher;
use mailqueue_dispatcher::mail::MailtrapMailer;
use mailqueue_dispatcher::store::{create_pool, MailRepository};

/// BLPOP timeout; bounds how long shutdown waits on an idle queue.
const POLL_TIMEOUT_SECS: f64 = 5.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting mail dispatcher...");

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        collection = %config.mail_collection,
        default_from = %config.default_from_email,
        "Configuration loaded"
    );

    // Create Redis connection pool
    let redis_pool = create_pool(&config)?;
    let repo = MailRepository::new(redis_pool, &config.mail_collection);

    // Test Redis connection
    match repo.health_check().await {
        Ok(true) => tracing::info!("Redis connection established"),
        Ok(false) => tracing::warn!("Redis health check returned false"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to connect to Redis");
            // Continue anyway, might recover later
        }
    }

    let mailer = MailtrapMailer::new(&config.mailtrap_api_token);
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(config),
        Arc::new(repo.clone()),
        Arc::new(mailer),
    ));

    tracing::info!("Listening for mail documents");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            popped = repo.pop_created(POLL_TIMEOUT_SECS) => match popped {
                Ok(Some(doc_id)) => {
                    // Each document gets its own invocation; invocations for
                    // different documents run fully in parallel.
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.dispatch(&doc_id).await {
                            tracing::error!(
                                doc_id = %doc_id,
                                error = %e,
                                "Store update failed, document left unmarked"
                            );
                        }
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to poll for mail documents");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
        }
    }

    tracing::info!("Dispatcher shutdown complete");

    Ok(())
}

/// Handle shutdown signals
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, shutting down...");
        },
    }
}
