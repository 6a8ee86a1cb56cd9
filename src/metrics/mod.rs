//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Transaction dispatch outcomes
//! - Nonce ledger position
//! - Wallet balance
//! - RPC failovers and event counts

use crate::error::{DispatchError, DispatchResult};

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    Gauge, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Transaction metrics
    pub static ref TX_SUBMITTED: IntCounter = register_int_counter!(
        "conduit_transactions_submitted_total",
        "Total transactions handed to the network with a real hash"
    ).unwrap();

    pub static ref TX_FAILED: IntCounter = register_int_counter!(
        "conduit_transactions_failed_total",
        "Total transactions that returned the zero-hash sentinel after a submit attempt"
    ).unwrap();

    pub static ref TX_RESENT: IntCounter = register_int_counter!(
        "conduit_transactions_resent_total",
        "Total fee-boosted resubmissions"
    ).unwrap();

    pub static ref TX_UNSENDABLE: IntCounter = register_int_counter!(
        "conduit_transactions_unsendable_total",
        "Total transactions estimation declared not sendable"
    ).unwrap();

    // Nonce metrics
    pub static ref NEXT_NONCE: IntGauge = register_int_gauge!(
        "conduit_next_nonce",
        "Next nonce the ledger will issue"
    ).unwrap();

    // Wallet metrics
    pub static ref WALLET_BALANCE: Gauge = register_gauge!(
        "conduit_wallet_balance_eth",
        "Signing account balance in ETH"
    ).unwrap();

    // Chain metrics
    pub static ref RPC_FAILOVERS: IntCounter = register_int_counter!(
        "conduit_rpc_failovers_total",
        "Total RPC provider failovers"
    ).unwrap();

    // Event metrics
    pub static ref EVENTS_RECEIVED: IntCounterVec = register_int_counter_vec!(
        "conduit_events_received_total",
        "Total contract events received by name",
        &["event"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> DispatchResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| DispatchError::Internal(format!("metrics bind failed: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| DispatchError::Internal(format!("metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_tx_failed() {
    TX_FAILED.inc();
}

pub fn record_tx_resent() {
    TX_RESENT.inc();
}

pub fn record_tx_unsendable() {
    TX_UNSENDABLE.inc();
}

pub fn record_next_nonce(nonce: u64) {
    NEXT_NONCE.set(nonce as i64);
}

pub fn record_wallet_balance(balance_eth: f64) {
    WALLET_BALANCE.set(balance_eth);
}

pub fn record_rpc_failover() {
    RPC_FAILOVERS.inc();
}

pub fn record_event(name: &str) {
    EVENTS_RECEIVED.with_label_values(&[name]).inc();
}
