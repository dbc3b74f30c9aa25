//! Tesseract transaction client
//!
//! Client-side helpers for submitting Ethereum transactions: a per-account
//! nonce cache, a key cache handing out signing capabilities, a transaction
//! pipeline that resolves nonce, gas and signature before dispatch, and a
//! background-refreshed gas price oracle cache.

pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod gas;
pub mod keys;
pub mod metrics;
pub mod node;
pub mod tx;

pub use client::{Client, LogSubscription};
pub use config::Settings;
pub use contract::{BoundContract, ContractDescriptor};
pub use error::{ClientError, ClientResult, ErrorKind};
pub use gas::{GasPrice, GasPriority, GasSnapshot, GasStation};
pub use keys::{KeyCache, Keystore, WalletKeystore};
pub use node::{CallMsg, HttpNode, NodeClient};
pub use tx::{NonceCache, SignatureScheme, SignedTransaction, TransactOpts, TransactionSender};

/// Install the global tracing subscriber. Later calls are no-ops.
pub fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tesseract_txclient=debug,hyper=warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
