//! Node client over an ethers HTTP provider

use super::{CallMsg, NodeClient};
use crate::config::NodeConfig;
use crate::error::{ClientError, ClientResult};
use crate::tx::SignedTransaction;

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{FilterKind, FilterWatcher, Http, Provider};
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// JSON-RPC node reached over HTTP. Calls fail fast, there is no failover.
#[derive(Debug, Clone)]
pub struct HttpNode {
    provider: Provider<Http>,
    url: String,
}

impl HttpNode {
    /// Create a node client from configuration
    pub fn new(config: &NodeConfig) -> ClientResult<Self> {
        let url = reqwest::Url::parse(&config.rpc_url)
            .map_err(|e| ClientError::Config(format!("Invalid RPC URL {}: {}", config.rpc_url, e)))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let provider = Provider::new(Http::new_with_client(url, http_client))
            .interval(Duration::from_millis(100));

        info!("Node client configured for {}", config.rpc_url);
        Ok(Self {
            provider,
            url: config.rpc_url.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn provider(&self) -> &Provider<Http> {
        &self.provider
    }
}

fn pending() -> Option<BlockId> {
    Some(BlockNumber::Pending.into())
}

fn to_u64(value: U256, context: &'static str) -> ClientResult<u64> {
    if value.bits() > 64 {
        return Err(ClientError::network(
            context,
            format!("value {} does not fit in u64", value),
        ));
    }
    Ok(value.low_u64())
}

#[async_trait]
impl NodeClient for HttpNode {
    async fn code_at(&self, account: Address, block: Option<BlockId>) -> ClientResult<Bytes> {
        self.provider
            .get_code(account, block)
            .await
            .map_err(|e| ClientError::network("get code", e))
    }

    async fn balance_at(&self, account: Address, block: Option<BlockId>) -> ClientResult<U256> {
        self.provider
            .get_balance(account, block)
            .await
            .map_err(|e| ClientError::network("get balance", e))
    }

    async fn call_contract(&self, call: &CallMsg, block: Option<BlockId>) -> ClientResult<Bytes> {
        self.provider
            .call(&call.to_typed(), block)
            .await
            .map_err(|e| ClientError::network("call contract", e))
    }

    async fn pending_code_at(&self, account: Address) -> ClientResult<Bytes> {
        self.provider
            .get_code(account, pending())
            .await
            .map_err(|e| ClientError::network("get pending code", e))
    }

    async fn pending_nonce_at(&self, account: Address) -> ClientResult<u64> {
        let nonce = self
            .provider
            .get_transaction_count(account, pending())
            .await
            .map_err(|e| ClientError::network("get pending nonce", e))?;
        to_u64(nonce, "get pending nonce")
    }

    async fn suggest_gas_price(&self) -> ClientResult<U256> {
        self.provider
            .get_gas_price()
            .await
            .map_err(|e| ClientError::network("suggest gas price", e))
    }

    async fn estimate_gas(&self, call: &CallMsg) -> ClientResult<u64> {
        let gas = self
            .provider
            .estimate_gas(&call.to_typed(), None)
            .await
            .map_err(|e| ClientError::network("estimate gas", e))?;
        to_u64(gas, "estimate gas")
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> ClientResult<()> {
        let pending_tx = self
            .provider
            .send_raw_transaction(tx.rlp())
            .await
            .map_err(|e| ClientError::network("send transaction", e))?;
        debug!("Node accepted transaction {:?}", pending_tx.tx_hash());
        Ok(())
    }

    async fn transaction_by_hash(&self, hash: H256) -> ClientResult<(Option<Transaction>, bool)> {
        let tx = self
            .provider
            .get_transaction(hash)
            .await
            .map_err(|e| ClientError::network("get tx by hash", e))?;
        let is_pending = tx.as_ref().map(|t| t.block_number.is_none()).unwrap_or(false);
        Ok((tx, is_pending))
    }

    async fn transaction_receipt(&self, hash: H256) -> ClientResult<Option<TransactionReceipt>> {
        self.provider
            .get_transaction_receipt(hash)
            .await
            .map_err(|e| ClientError::network("get transaction receipt", e))
    }

    async fn filter_logs(&self, filter: &Filter) -> ClientResult<Vec<Log>> {
        self.provider
            .get_logs(filter)
            .await
            .map_err(|e| ClientError::network("filter logs", e))
    }

    async fn new_log_filter(&self, filter: &Filter) -> ClientResult<U256> {
        self.provider
            .new_filter(FilterKind::Logs(filter))
            .await
            .map_err(|e| ClientError::network("install log filter", e))
    }

    async fn watch_logs(
        &self,
        filter_id: U256,
        sink: mpsc::Sender<Log>,
        stop: CancellationToken,
    ) -> ClientResult<()> {
        let mut stream = FilterWatcher::<_, Log>::new(filter_id, &self.provider)
            .interval(self.provider.get_interval());

        let outcome = loop {
            tokio::select! {
                _ = stop.cancelled() => break Ok(()),
                next = stream.next() => match next {
                    Some(log) => {
                        if sink.send(log).await.is_err() {
                            debug!("Log receiver dropped, stopping watch");
                            break Ok(());
                        }
                    }
                    None => {
                        break Err(ClientError::network(
                            "watch logs",
                            format!("filter {} stream ended on {}", filter_id, self.url),
                        ));
                    }
                },
            }
        };

        if let Err(e) = self.provider.uninstall_filter(filter_id).await {
            warn!("Failed to uninstall log filter {}: {}", filter_id, e);
        }
        outcome
    }

    async fn accounts(&self) -> ClientResult<Vec<Address>> {
        let params: [(); 0] = [];
        self.provider
            .request("eth_accounts", params)
            .await
            .map_err(|e| ClientError::network("list accounts", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_url() {
        let config = NodeConfig {
            rpc_url: "not a url".to_string(),
            request_timeout_secs: 5,
        };
        assert!(matches!(HttpNode::new(&config), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_u64_conversion_guards_overflow() {
        assert_eq!(to_u64(U256::from(21_000u64), "estimate gas").unwrap(), 21_000);
        assert!(to_u64(U256::MAX, "estimate gas").is_err());
    }

    #[test]
    fn test_call_msg_without_recipient_is_creation() {
        let msg = CallMsg {
            from: Address::repeat_byte(1),
            data: Bytes::from(vec![0x60, 0x60]),
            ..Default::default()
        };
        assert!(msg.to_typed().to().is_none());
    }
}
