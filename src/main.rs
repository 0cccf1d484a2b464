use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use helmsman::config::Config;
use helmsman::gateway::sim::SimGateway;
use helmsman::notify::LogNotificationGateway;
use helmsman::reconcile::Driver;
use helmsman::store::RecordStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("HELMSMAN_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    helmsman::observability::init(metrics_port);

    let data_dir = std::env::var("HELMSMAN_DATA_DIR").unwrap_or_else(|_| "./data".into());
    std::fs::create_dir_all(&data_dir)?;

    let cfg = Config::from_env();
    info!("helmsman starting");
    info!("  data_dir: {data_dir}");
    info!("  refresh: {:?}", cfg.refresh_interval);
    info!("  book window: {}h", cfg.book_window_hours);
    info!("  utc offset: {}", cfg.utc_offset);
    info!("  single_run: {}", cfg.single_run);
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    let store = RecordStore::new(Path::new(&data_dir).join("booking.json"));

    // The remote adapter is selected at wiring time; the reconciler only
    // ever sees the gateway trait. The simulated remote makes dry runs
    // against a captured schedule possible without touching the real site.
    let gateway = Arc::new(SimGateway::new());
    if let Ok(path) = std::env::var("HELMSMAN_SCHEDULE_FILE") {
        gateway.load_days(Path::new(&path)).await?;
        info!("  schedule seed: {path}");
    }

    let driver = Driver::new(store, gateway, Arc::new(LogNotificationGateway), cfg);

    // Graceful shutdown: finish the in-flight tick, then exit.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        let _ = shutdown_tx.send(true);
    });

    driver.run(shutdown_rx).await?;
    info!("helmsman stopped");
    Ok(())
}
