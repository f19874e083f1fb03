use anyhow::Result;
use sync_service::{app, config::AppConfig, metrics_server, observability};
use time::OffsetDateTime;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let app::App { scheduler, .. } = app::build(&cfg, OffsetDateTime::now_utc()).await?;

    scheduler
        .run(cfg.scheduler.tick_interval(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;

    Ok(())
}
