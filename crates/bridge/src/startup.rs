use crate::{
    api::routes::{approval_list, approval_resolve, bridge_socket, health, wallet_info},
    config::Settings,
    domain::{Approvals, BridgeConfig, MethodDispatcher},
    infra::{
        rpc::{RpcClient, SolanaRpc},
        secrets::{get_key, ChannelSecret},
        signer::{LocalSigner, SigningBackend},
    },
};

// Mock implementations only available with e2e-testing feature or debug builds
#[cfg(any(feature = "e2e-testing", debug_assertions))]
use crate::infra::rpc_mock::MockRpc;
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request},
    http::{Extensions, HeaderValue},
    middleware::{self, AddExtension, Next},
    response::IntoResponse,
    routing::{get, post},
    serve::Serve,
    Router,
};
use ed25519_dalek::SigningKey;
use hyper::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use log::{error, info, warn};
use reqwest_middleware::{
    reqwest::{self, Client},
    ClientBuilder, ClientWithMiddleware, Middleware,
};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Serialize;
use std::{net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    select,
    signal::unix::{signal, SignalKind},
    sync::broadcast::error::RecvError,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let (app_state, background_tasks, cancellation_token) = build_app(config.clone()).await?;
        let server = build_server(listener, app_state, config.api_settings.origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();
                self.background_tasks.close();

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();
                self.background_tasks.close();

                let _ =
                    tokio::time::timeout(Duration::from_secs(5), self.background_tasks.wait())
                        .await;

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

/// What the approval UI and pages learn about the host wallet
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletInfo {
    pub name: String,
    pub icon: String,
    pub network: String,
    pub public_key: String,
}

#[derive(Clone)]
pub struct AppState {
    pub approvals: Arc<Approvals>,
    pub dispatcher: Arc<MethodDispatcher>,
    pub bridge_config: BridgeConfig,
    pub wallet: WalletInfo,
    /// Per-session dispatch loops are spawned here so shutdown can wait on them
    pub background_tasks: TaskTracker,
    pub cancel_token: CancellationToken,
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, TaskTracker, CancellationToken), anyhow::Error> {
    let reqwest_client = build_reqwest_client();

    // Create RPC client (real or mock based on config)
    #[cfg(any(feature = "e2e-testing", debug_assertions))]
    let rpc: Arc<dyn SolanaRpc> = if config.rpc_settings.mock_enabled {
        info!("Mock RPC client configured");
        Arc::new(MockRpc::default())
    } else {
        let client = RpcClient::new(reqwest_client, &config.rpc_settings).map(Arc::new)?;
        info!("RPC client configured for {}", config.rpc_settings.url);
        client
    };

    #[cfg(not(any(feature = "e2e-testing", debug_assertions)))]
    let rpc: Arc<dyn SolanaRpc> = {
        if config.rpc_settings.mock_enabled {
            return Err(anyhow!(
                "Mock RPC client requires e2e-testing feature or debug build"
            ));
        }
        let client = RpcClient::new(reqwest_client, &config.rpc_settings).map(Arc::new)?;
        info!("RPC client configured for {}", config.rpc_settings.url);
        client
    };

    let wallet_key: SigningKey = get_key(&config.wallet_settings.private_key_file)
        .map_err(|e| anyhow!("Failed to load wallet key: {}", e))?;
    let signer = Arc::new(LocalSigner::new(wallet_key, rpc));
    info!("Signing backend configured for {}", signer.public_key());

    let secret: ChannelSecret = get_key(&config.bridge_settings.secret_file)
        .map_err(|e| anyhow!("Failed to load channel secret: {}", e))?;
    if !config.bridge_settings.enforce_request_signatures {
        warn!("Request signature enforcement disabled, mismatches will only be logged");
    }

    let approvals = Arc::new(Approvals::new(Duration::from_secs(
        config.bridge_settings.approval_timeout_secs,
    )));
    let wallet = WalletInfo {
        name: config.bridge_settings.wallet_name,
        icon: config.bridge_settings.wallet_icon,
        network: config.bridge_settings.network.clone(),
        public_key: signer.public_key().to_string(),
    };
    let dispatcher = Arc::new(MethodDispatcher::new(signer, approvals.clone()));

    let tracker = TaskTracker::new();
    let cancel_token = CancellationToken::new();

    let feed_approvals = approvals.clone();
    let feed_cancel = cancel_token.clone();
    tracker.spawn(async move {
        match log_approval_feed(feed_approvals, feed_cancel).await {
            Ok(_) => info!("Successfully shutdown approval feed"),
            Err(e) => error!("Error in approval feed: {}", e),
        }
    });

    let app_state = AppState {
        approvals,
        dispatcher,
        bridge_config: BridgeConfig {
            secret: Arc::new(secret),
            enforce_request_signatures: config.bridge_settings.enforce_request_signatures,
            network: config.bridge_settings.network,
        },
        wallet,
        background_tasks: tracker.clone(),
        cancel_token: cancel_token.clone(),
    };
    Ok((app_state, tracker, cancel_token))
}

/// Logs every gate as it opens so an operator can see what is waiting
async fn log_approval_feed(
    approvals: Arc<Approvals>,
    cancel_token: CancellationToken,
) -> Result<(), anyhow::Error> {
    let mut feed = approvals.subscribe();
    loop {
        select! {
            next = feed.recv() => match next {
                Ok(request) => info!(
                    "Approval {} waiting: {} from {}",
                    request.id,
                    request.kind.gate_name(),
                    request.domain
                ),
                Err(RecvError::Lagged(missed)) => warn!("Approval feed skipped {} entries", missed),
                Err(RecvError::Closed) => return Err(anyhow!("approval feed closed")),
            },
            _ = cancel_token.cancelled() => {
                info!("Approval feed received cancellation");
                return Ok(());
            }
        }
    }
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;

    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let approval_endpoints = Router::new()
        .route("/", get(approval_list))
        .route("/{id}", post(approval_resolve));

    let bridge_endpoints = Router::new()
        .route("/ws", get(bridge_socket))
        .route("/wallet", get(wallet_info));

    Router::new()
        .route("/api/v1/health_check", get(health))
        .nest("/api/v1/approvals", approval_endpoints)
        .nest("/bridge", bridge_endpoints)
        .layer(middleware::from_fn(log_request))
        .with_state(Arc::new(app_state))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

pub fn build_reqwest_client() -> ClientWithMiddleware {
    let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
    ClientBuilder::new(Client::new())
        .with(RetryTransientMiddleware::new_with_policy(retry_policy))
        .with(LoggingMiddleware)
        .build()
}

struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        let method = req.method().clone();
        let url = req.url().clone();

        info!("Making {} request to: {}", method, url);

        let result = next.run(req, extensions).await;

        match &result {
            Ok(response) => {
                info!("{} {} -> Status: {}", method, url, response.status());
            }
            Err(error) => {
                warn!("{} {} -> Error: {:?}", method, url, error);
            }
        }

        result
    }
}

async fn shutdown_signal() {
    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        error!("Failed to install signal handlers, waiting on ctrl-c");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            futures::future::pending::<()>().await;
        }
        return;
    };

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
