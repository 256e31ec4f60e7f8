use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use shared::catalog::Catalog;
use shared::chat::{ChatService, ChatServiceParts};
use shared::config::{ServerConfig, load_dotenv};
use shared::llm::{
    ModelGateway, OpenRouterGateway, OpenRouterGatewayConfig, RetryingGateway, SignatureSet,
};
use shared::portfolio::Portfolio;
use shared::session::InMemorySessionService;
use shared::throttle::Throttle;
use tracing::{error, info, warn};

mod http;

const THROTTLE_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    if let Err(err) = load_dotenv() {
        eprintln!("{err}");
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "chat_server=info,shared=info,axum=info".to_string()),
        )
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to read config");
            std::process::exit(1);
        }
    };

    let catalog = match Catalog::load(&config.books_path) {
        Ok(catalog) => Arc::new(catalog),
        Err(err) => {
            error!(error = %err, "failed to load book catalog");
            std::process::exit(1);
        }
    };
    info!(books = catalog.len(), "book catalog loaded");

    let portfolio = match Portfolio::load(&config.portfolio_path) {
        Ok(portfolio) => Arc::new(portfolio),
        Err(err) => {
            warn!(error = %err, "portfolio unavailable; owner info will be empty");
            Arc::new(Portfolio::default())
        }
    };

    let signatures = match config.signatures_path.as_deref() {
        Some(path) => match SignatureSet::load(path) {
            Ok(signatures) => signatures,
            Err(err) => {
                error!(error = %err, "failed to load safety signatures");
                std::process::exit(1);
            }
        },
        None => SignatureSet::baseline(),
    };

    let throttle = Throttle::new(config.throttle.clone());
    let _pruner = throttle.spawn_pruner(THROTTLE_PRUNE_INTERVAL);

    let chat = match init_gateway(&config) {
        Ok(gateway) => Some(Arc::new(ChatService::new(ChatServiceParts {
            catalog: Arc::clone(&catalog),
            portfolio: Arc::clone(&portfolio),
            gateway,
            sessions: Arc::new(InMemorySessionService::new()),
            throttle,
            signatures: Arc::new(signatures),
        }))),
        Err(message) => {
            error!(error = %message, "chat disabled; /api/chat will answer SERVICE_UNAVAILABLE");
            None
        }
    };

    let app = http::build_router(
        http::AppState {
            chat,
            catalog,
            portfolio,
            trusted_proxy_ips: Arc::new(config.trusted_proxy_ips.iter().copied().collect()),
        },
        &config.allowed_origins,
    );

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!(error = %err, bind_addr = %config.bind_addr, "invalid bind address");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(
        addr = %listener.local_addr().unwrap_or(addr),
        "chat server listening"
    );
    if let Err(err) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        error!(error = %err, "server exited with error");
        std::process::exit(1);
    }
}

fn init_gateway(config: &ServerConfig) -> Result<Arc<dyn ModelGateway>, String> {
    let gateway_config = OpenRouterGatewayConfig::from_env().map_err(|err| err.to_string())?;
    info!(
        generate_model = %gateway_config.model_route.generate_model,
        assist_model = %gateway_config.model_route.assist_model,
        "llm gateway configured"
    );
    let gateway = OpenRouterGateway::new(gateway_config).map_err(|err| err.to_string())?;
    Ok(Arc::new(RetryingGateway::new(gateway, config.retry.clone())))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
