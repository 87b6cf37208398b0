// Bunutan server entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config (copying defaults on first run)
// 3. Build roster, store, draw engine and gateway
// 4. Bind the listener and spawn the WebSocket server task
// 5. Run the event loop until Ctrl+C
// 6. Stop the listener and exit

use bunutan_server::app;
use bunutan_server::config;
use bunutan_server::ws_server;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Bunutan server starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} participants plus admin, {} items",
        config.roster.participants.len(),
        config.pool.items.len()
    );

    let state = app::AppState::from_config(&config);

    let bind_addr = config.bind_addr();
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    let (ws_tx, ws_rx) = mpsc::channel(256);

    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server::run(listener, ws_tx).await {
            error!("WebSocket server error: {}", e);
        }
    });

    let mut app_handle = tokio::spawn(app::run(ws_rx, state));

    info!("Ready on ws://{bind_addr}");

    let app_finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("Shutdown requested");
            false
        }
        result = &mut app_handle => {
            match result {
                Ok(Ok(())) => info!("Event loop finished"),
                Ok(Err(e)) => error!("Event loop error: {}", e),
                Err(e) => error!("Event loop task failed: {}", e),
            }
            true
        }
    };

    ws_handle.abort();
    // Open connections still hold event senders, so the loop may not drain.
    if !app_finished {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), app_handle).await;
    }

    info!("Bunutan server shut down cleanly");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bunutan_server=info,bunutan_core=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
