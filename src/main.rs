use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use gateway::{
    AppState,
    brokers::{capital::CapitalClient, metaapi::MetaApiProvisioner},
    build_router,
    cache::{MemorySessionStore, RedisSessionStore, SessionStore},
    config::Config,
    routes::{capital::CapitalGateway, mt5::Mt5Gateway},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().inspect_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
    })?;

    #[cfg(debug_assertions)]
    tracing::info!("Running in debug mode with CORS enabled");

    #[cfg(not(debug_assertions))]
    tracing::info!("Running in production mode with CORS disabled");

    let sessions: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => {
            tracing::info!("Using Redis session store");
            Arc::new(RedisSessionStore::new(Arc::new(redis::Client::open(
                url.as_str(),
            )?)))
        }
        None => {
            tracing::info!("Using in-process session store");
            Arc::new(MemorySessionStore::new())
        }
    };

    let capital_api = CapitalClient::new(
        &config.capital_base_url,
        &config.capital_api_key,
        config.upstream_timeout(),
    )?;
    let provisioner = MetaApiProvisioner::new(
        &config.metaapi_provisioning_url,
        &config.metaapi_client_url,
        &config.metaapi_token,
        config.upstream_timeout(),
    )?;

    let state = AppState {
        capital: Arc::new(CapitalGateway::new(
            Arc::new(capital_api),
            sessions,
            config.capital_session_ttl(),
        )),
        mt5: Arc::new(Mt5Gateway::new(
            Arc::new(provisioner),
            config.mt5_magic,
            config.mt5_deploy_timeout(),
        )),
        config: config.clone(),
    };

    let app = build_router(state);

    let addr = SocketAddr::new(
        config.server_host.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid server_host, falling back to dual-stack default");
            IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED)
        }),
        config.server_port,
    );
    tracing::info!("Server listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(&addr).await?,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
