//! TaskPilot server: wires stores, LLM client, orchestrator, and routes.

use crate::approvals::ApprovalService;
use crate::auth;
use crate::config::{StorageBackend, TaskPilotConfig};
use crate::orchestrator::Orchestrator;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tp_llm::{ChatClient, OpenAiClient};
use tp_store::{MemoryStore, PendingCallStore, SqliteStore, TaskStore, ThreadStore, UserStore};
use tp_tools::{Executor, FunctionExecutor};

pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub threads: Arc<dyn ThreadStore>,
    pub calls: Arc<dyn PendingCallStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub approvals: Arc<ApprovalService>,
}

struct Stores {
    users: Arc<dyn UserStore>,
    tasks: Arc<dyn TaskStore>,
    threads: Arc<dyn ThreadStore>,
    calls: Arc<dyn PendingCallStore>,
}

fn build_stores(cfg: &TaskPilotConfig) -> Result<Stores> {
    match cfg.storage.backend {
        StorageBackend::Memory => {
            tracing::warn!("memory storage selected; data will not survive a restart");
            let store = Arc::new(MemoryStore::new());
            Ok(Stores {
                users: store.clone(),
                tasks: store.clone(),
                threads: store.clone(),
                calls: store,
            })
        }
        StorageBackend::Sqlite => {
            let data_dir = cfg.data_dir_path()?;
            std::fs::create_dir_all(&data_dir)?;
            let db_path = data_dir.join("taskpilot.db");
            let store = Arc::new(SqliteStore::open(&db_path)?);
            tracing::info!(db_path = %db_path.display(), "sqlite storage opened");
            Ok(Stores {
                users: store.clone(),
                tasks: store.clone(),
                threads: store.clone(),
                calls: store,
            })
        }
    }
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = TaskPilotConfig::load_with_path(config_path).await?;
    if cfg.api_key().is_err() {
        tracing::warn!("keys.openai_api_key is not set; `taskpilot serve` will refuse to start");
    }
    tracing::info!(
        model = %cfg.general.model,
        bind_addr = %cfg.runtime.bind_addr,
        storage_backend = ?cfg.storage.backend,
        config_path = %path.display(),
        "config ok"
    );
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = TaskPilotConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr();
    tracing::info!(
        model = %cfg.general.model,
        bind_addr = %addr,
        storage_backend = ?cfg.storage.backend,
        llm_timeout_seconds = cfg.runtime.llm_timeout_seconds,
        tool_loops_max = cfg.runtime.tool_loops_max,
        http_timeout_seconds = cfg.runtime.http_timeout_seconds,
        http_max_in_flight = cfg.runtime.http_max_in_flight,
        config_path = %cfg_path.display(),
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let api_key = cfg.api_key()?;
    let llm: Arc<dyn ChatClient> = match cfg.keys.openai_base_url.as_deref() {
        Some(base_url) => Arc::new(OpenAiClient::with_base_url(
            &api_key,
            &cfg.general.model,
            base_url,
        )),
        None => Arc::new(OpenAiClient::new(&api_key, &cfg.general.model)),
    };

    let stores = build_stores(&cfg)?;
    let executor: Arc<dyn Executor> = Arc::new(FunctionExecutor::new(stores.tasks.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        stores.threads.clone(),
        stores.calls.clone(),
        executor.clone(),
        cfg.general.system_prompt.clone(),
        Duration::from_secs(cfg.runtime.llm_timeout_seconds),
        cfg.runtime.tool_loops_max,
    ));
    let approvals = Arc::new(ApprovalService::new(
        stores.calls.clone(),
        executor,
        orchestrator.clone(),
    ));

    let state = Arc::new(AppState {
        users: stores.users,
        tasks: stores.tasks,
        threads: stores.threads,
        calls: stores.calls,
        orchestrator,
        approvals,
    });

    let protected = routes::protected_router().layer(axum::middleware::from_fn(auth::require_auth));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::public_router()
        .merge(protected)
        .layer(Extension(state))
        // Bearer tokens, no cookies; the SPA runs on its own origin.
        .layer(CorsLayer::permissive())
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.runtime.http_max_in_flight,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.runtime.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "taskpilot serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("http server shutdown completed");

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
}
