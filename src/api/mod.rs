//! HTTP API for health checks, status, and monitoring

use crate::chain::{ChainProvider, ChainReader};
use crate::config::ApiConfig;
use crate::error::{DispatchError, DispatchResult};
use crate::tx::{Dispatcher, PendingSubmission};

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use ethers::utils::format_ether;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub provider: Arc<ChainProvider>,
}

/// Run the HTTP API server
pub async fn run_server(
    config: ApiConfig,
    dispatcher: Arc<Dispatcher>,
    provider: Arc<ChainProvider>,
) -> DispatchResult<()> {
    let state = AppState {
        dispatcher,
        provider,
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/status", get(get_status))
        .route("/account", get(get_account))
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DispatchError::Internal(format!("api bind failed: {}", e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| DispatchError::Internal(format!("api server failed: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the chain connection
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let chain_ok = state.provider.health_check().await;

    let status = if chain_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: chain_ok,
            chain: chain_ok,
        }),
    )
}

/// Get dispatcher status: ledger position and in-flight submissions
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let next_nonce = state.dispatcher.next_nonce().await;
    let pending = state
        .dispatcher
        .pending()
        .into_iter()
        .map(|(nonce, submission)| PendingEntry { nonce, submission })
        .collect();

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        chain_id: state.provider.chain_id(),
        next_nonce,
        pending,
    })
}

/// Get signing account address and balance
async fn get_account(State(state): State<AppState>) -> impl IntoResponse {
    let address = state.dispatcher.account_address();

    match state.provider.get_balance(address).await {
        Ok(balance) => (
            StatusCode::OK,
            Json(AccountResponse {
                address: format!("{:?}", address),
                balance_eth: format_ether(balance),
                next_nonce: state.dispatcher.next_nonce().await,
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(AccountResponse {
                address: format!("{:?}", address),
                balance_eth: "unknown".to_string(),
                next_nonce: state.dispatcher.next_nonce().await,
            }),
        ),
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    chain: bool,
}

#[derive(Serialize)]
struct PendingEntry {
    nonce: u64,
    #[serde(flatten)]
    submission: PendingSubmission,
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    chain_id: u64,
    next_nonce: u64,
    pending: Vec<PendingEntry>,
}

#[derive(Serialize)]
struct AccountResponse {
    address: String,
    balance_eth: String,
    next_nonce: u64,
}
