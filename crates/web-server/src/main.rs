use configuration::{init_logging, load_config};
use engine::Supervisor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use web_server::AppState;

// Standalone entry point for `cargo run -p web-server`: loads `sentinel.toml`,
// starts the poll loop and serves the API until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = load_config(&PathBuf::from("sentinel.toml"))?;
    let _guard = init_logging(&config.logging)?;

    let (events, _) = broadcast::channel(256);
    let supervisor = Arc::new(Supervisor::from_config(&config, Some(events.clone())).await?);

    let shutdown = CancellationToken::new();
    let poller = tokio::spawn(supervisor.clone().start(shutdown.clone()));
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let state = Arc::new(AppState { supervisor, events });
    web_server::run_server(config.server.addr, state, shutdown).await?;
    poller.await?;
    Ok(())
}
