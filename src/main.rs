use dotenv::dotenv;
use std::sync::Arc;
use tokio::signal;

use kdb_insights_core::config::Config;
use kdb_insights_core::core::ConnectionSession;
use kdb_insights_core::models::MetaInfoType;
use kdb_insights_core::utils::{ReqwestTransport, StaticTokenProvider};

/// Connects to the configured deployment, reports what it offers and
/// disconnects.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kdb_insights_core=info".parse()?)
                .add_directive("insights_probe=info".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    let config = Config::from_env()?;
    let transport = ReqwestTransport::new(config.http_timeout, config.insecure)?;
    let tokens = StaticTokenProvider::new(config.access_token.clone());

    let mut session =
        ConnectionSession::new(config.identity(), Arc::new(transport), Arc::new(tokens));
    session.set_results_view(config.results_view);

    let connected = tokio::select! {
        connected = session.connect() => connected,
        _ = signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C signal");
            false
        }
    };

    if !connected {
        anyhow::bail!("Could not connect to {}", config.server);
    }

    match session.version() {
        Some(version) => tracing::info!("Insights version: {}", version),
        None => tracing::info!("Insights version: unknown"),
    }
    if let Some(endpoints) = session.endpoints() {
        tracing::info!("Endpoints: {}", serde_json::to_string(endpoints)?);
    }
    if let Some(api_config) = session.api_config() {
        tracing::info!(
            "Query environments enabled: {}",
            api_config.query_environments_enabled
        );
    }

    let udas = session.uda_list();
    tracing::info!("{} UDAs available", udas.len());
    for uda in &udas {
        match uda.incompatible_error {
            Some(reason) => tracing::info!("  - {} (unusable: {})", uda.name, reason),
            None => tracing::info!("  - {} ({} params)", uda.name, uda.params.len()),
        }
    }
    tracing::debug!("Schema: {}", session.meta_section(MetaInfoType::Schema));

    session.disconnect();
    Ok(())
}
