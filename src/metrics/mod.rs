//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Nonce allocation and rollback
//! - Transaction submission outcomes
//! - Gas station refreshes and cached prices

use crate::error::{ClientError, ClientResult};

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder};

lazy_static! {
    // Nonce metrics
    pub static ref NONCE_ALLOCATED: CounterVec = register_counter_vec!(
        "txclient_nonce_allocations_total",
        "Total nonces handed out by the nonce cache",
        &[]
    ).unwrap();

    pub static ref NONCE_ROLLBACK: CounterVec = register_counter_vec!(
        "txclient_nonce_rollbacks_total",
        "Nonce rollbacks after failed dispatch by outcome",
        &["outcome"]
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "txclient_transactions_submitted_total",
        "Total transactions accepted by the node",
        &["kind"]
    ).unwrap();

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "txclient_transactions_failed_total",
        "Total transactions failed by pipeline stage",
        &["stage"]
    ).unwrap();

    // Gas station metrics
    pub static ref GAS_REFRESH: CounterVec = register_counter_vec!(
        "txclient_gas_station_refresh_total",
        "Gas station refresh attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref GAS_PRICE: GaugeVec = register_gauge_vec!(
        "txclient_gas_price_gwei",
        "Last cached gas price per tier in gwei",
        &["tier"]
    ).unwrap();
}

/// Render every registered metric in the text exposition format
pub fn gather() -> ClientResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| ClientError::Config(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ClientError::Config(format!("metrics are not utf-8: {}", e)))
}

// Helper functions to record metrics

pub fn record_nonce_allocated() {
    NONCE_ALLOCATED.with_label_values(&[]).inc();
}

pub fn record_nonce_rollback(released: bool) {
    let outcome = if released { "released" } else { "skipped" };
    NONCE_ROLLBACK.with_label_values(&[outcome]).inc();
}

pub fn record_tx_submitted(is_creation: bool) {
    let kind = if is_creation { "create" } else { "call" };
    TX_SUBMITTED.with_label_values(&[kind]).inc();
}

pub fn record_tx_failed(stage: &str) {
    TX_FAILED.with_label_values(&[stage]).inc();
}

pub fn record_gas_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    GAS_REFRESH.with_label_values(&[outcome]).inc();
}

pub fn record_gas_price(tier: &str, gwei: f64) {
    GAS_PRICE.with_label_values(&[tier]).set(gwei);
}
