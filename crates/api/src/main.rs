use anyhow::Context;

use forgecrm_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    forgecrm_observability::init(config.log_format);
    for warning in &config.warnings {
        tracing::warn!("{warning}");
    }

    let services = forgecrm_api::app::services::build_services(&config).await?;
    let app = forgecrm_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
