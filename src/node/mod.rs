//! Node collaborator - the JSON-RPC surface the client consumes
//!
//! This module provides:
//! - The `NodeClient` trait the transaction pipeline talks to
//! - An ethers HTTP implementation of it

pub mod http;

pub use http::HttpNode;

use crate::error::ClientResult;
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockId, Bytes, Filter, Log, Transaction, TransactionReceipt, TransactionRequest,
    H256, U256,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Message used for gas estimation and read-only calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallMsg {
    pub from: Address,
    /// `None` for contract creation
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
}

impl CallMsg {
    pub fn to_typed(&self) -> TypedTransaction {
        let mut req = TransactionRequest::new()
            .from(self.from)
            .value(self.value)
            .data(self.data.clone());
        if let Some(to) = self.to {
            req = req.to(to);
        }
        TypedTransaction::Legacy(req)
    }
}

/// Remote node calls. Every failure is wrapped with what was being attempted.
#[async_trait]
pub trait NodeClient: Send + Sync {
    async fn code_at(&self, account: Address, block: Option<BlockId>) -> ClientResult<Bytes>;

    async fn balance_at(&self, account: Address, block: Option<BlockId>) -> ClientResult<U256>;

    async fn call_contract(&self, call: &CallMsg, block: Option<BlockId>) -> ClientResult<Bytes>;

    async fn pending_code_at(&self, account: Address) -> ClientResult<Bytes>;

    async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64>;

    async fn suggest_gas_price(&self) -> ClientResult<U256>;

    async fn estimate_gas(&self, call: &CallMsg) -> ClientResult<u64>;

    async fn send_transaction(&self, tx: &SignedTransaction) -> ClientResult<()>;

    /// Transaction by hash and whether it is still pending
    async fn transaction_by_hash(&self, hash: H256) -> ClientResult<(Option<Transaction>, bool)>;

    async fn transaction_receipt(&self, hash: H256) -> ClientResult<Option<TransactionReceipt>>;

    async fn filter_logs(&self, filter: &Filter) -> ClientResult<Vec<Log>>;

    /// Install a log filter on the node and return its id
    async fn new_log_filter(&self, filter: &Filter) -> ClientResult<U256>;

    /// Poll the installed filter `filter_id` into `sink` until `stop` fires
    /// or the filter stream ends. The filter is uninstalled on return.
    async fn watch_logs(
        &self,
        filter_id: U256,
        sink: mpsc::Sender<Log>,
        stop: CancellationToken,
    ) -> ClientResult<()>;

    /// Raw `eth_accounts` call listing unlocked accounts
    async fn accounts(&self) -> ClientResult<Vec<Address>>;
}
