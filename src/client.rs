//! Client façade over the node collaborator
//!
//! Every call takes a `CancellationToken` as its execution context and is also
//! cancelled when the client is closed. `close` waits until every in-flight
//! call and log watcher has observed the shutdown.

use crate::config::{ClientConfig, Settings};
use crate::contract::{BoundContract, ContractDescriptor};
use crate::error::{ClientError, ClientResult};
use crate::keys::{KeyCache, Keystore};
use crate::node::{CallMsg, HttpNode, NodeClient};
use crate::tx::{NonceCache, SignedTransaction, TransactOpts};

use ethers::types::{
    Address, BlockId, Bytes, Filter, Log, Transaction, TransactionReceipt, H256, U256,
};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Cheaply cloneable handle; clones share caches and shutdown state
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    node: Arc<dyn NodeClient>,
    keys: KeyCache,
    nonces: Arc<NonceCache>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

/// Handle to a running log watch
#[derive(Debug)]
pub struct LogSubscription {
    stop: CancellationToken,
    task: tokio::task::JoinHandle<ClientResult<()>>,
}

impl LogSubscription {
    /// Whether the watch has ended, on its own or by cancellation
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the watch and wait for it. Returns the error the watch ended
    /// with, if it failed before being stopped.
    pub async fn unsubscribe(self) -> ClientResult<()> {
        self.stop.cancel();
        self.task
            .await
            .map_err(|e| ClientError::network("watch logs", e))?
    }
}

impl Client {
    /// Build a client from injected services
    pub fn new(
        config: ClientConfig,
        node: Arc<dyn NodeClient>,
        keys: KeyCache,
        nonces: Arc<NonceCache>,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                node,
                keys,
                nonces,
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Connect over HTTP with fresh caches
    pub fn connect(settings: &Settings, keystore: Arc<dyn Keystore>) -> ClientResult<Self> {
        let node = HttpNode::new(&settings.node)?;
        info!(
            "Client connected to {} (chain {})",
            node.url(),
            settings.client.chain_id
        );
        Ok(Self::new(
            settings.client.clone(),
            Arc::new(node),
            KeyCache::new(keystore),
            Arc::new(NonceCache::new()),
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn nonce_cache(&self) -> &Arc<NonceCache> {
        &self.inner.nonces
    }

    pub fn key_cache(&self) -> &KeyCache {
        &self.inner.keys
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Run `fut` unless the caller's context or the client shuts down first
    async fn guard<T, F>(&self, ctx: &CancellationToken, fut: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        let _token = self.inner.tracker.token();
        tokio::select! {
            biased;
            _ = self.inner.shutdown.cancelled() => Err(ClientError::Closed),
            _ = ctx.cancelled() => Err(ClientError::Cancelled),
            res = fut => res,
        }
    }

    pub async fn code_at(
        &self,
        ctx: &CancellationToken,
        contract: Address,
        block: Option<BlockId>,
    ) -> ClientResult<Bytes> {
        self.guard(ctx, self.inner.node.code_at(contract, block)).await
    }

    pub async fn balance_at(
        &self,
        ctx: &CancellationToken,
        account: Address,
        block: Option<BlockId>,
    ) -> ClientResult<U256> {
        self.guard(ctx, self.inner.node.balance_at(account, block)).await
    }

    pub async fn call_contract(
        &self,
        ctx: &CancellationToken,
        call: &CallMsg,
        block: Option<BlockId>,
    ) -> ClientResult<Bytes> {
        self.guard(ctx, self.inner.node.call_contract(call, block)).await
    }

    pub async fn pending_code_at(
        &self,
        ctx: &CancellationToken,
        account: Address,
    ) -> ClientResult<Bytes> {
        self.guard(ctx, self.inner.node.pending_code_at(account)).await
    }

    pub async fn pending_nonce_at(
        &self,
        ctx: &CancellationToken,
        account: Address,
    ) -> ClientResult<u64> {
        self.guard(ctx, self.inner.node.pending_nonce_at(account)).await
    }

    pub async fn suggest_gas_price(&self, ctx: &CancellationToken) -> ClientResult<U256> {
        self.guard(ctx, self.inner.node.suggest_gas_price()).await
    }

    pub async fn estimate_gas(&self, ctx: &CancellationToken, call: &CallMsg) -> ClientResult<u64> {
        self.guard(ctx, self.inner.node.estimate_gas(call)).await
    }

    pub async fn send_transaction(
        &self,
        ctx: &CancellationToken,
        tx: &SignedTransaction,
    ) -> ClientResult<()> {
        self.guard(ctx, self.inner.node.send_transaction(tx)).await
    }

    pub async fn filter_logs(
        &self,
        ctx: &CancellationToken,
        filter: &Filter,
    ) -> ClientResult<Vec<Log>> {
        self.guard(ctx, self.inner.node.filter_logs(filter)).await
    }

    /// Install `filter` on the node and deliver matching logs to `sink`
    /// until unsubscribed, cancelled, closed or the watch fails.
    ///
    /// A filter the node refuses is reported here. Later failures end the
    /// subscription and are returned by [`LogSubscription::unsubscribe`].
    pub async fn subscribe_logs(
        &self,
        ctx: &CancellationToken,
        filter: Filter,
        sink: mpsc::Sender<Log>,
    ) -> ClientResult<LogSubscription> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let filter_id = self
            .guard(ctx, self.inner.node.new_log_filter(&filter))
            .await?;
        debug!("Installed log filter {}", filter_id);

        let stop = CancellationToken::new();
        let node = self.inner.node.clone();
        let shutdown = self.inner.shutdown.clone();
        let ctx = ctx.clone();
        let watch_stop = stop.clone();

        let task = self.inner.tracker.spawn(async move {
            let mut watcher = tokio::spawn({
                let watch_stop = watch_stop.clone();
                async move { node.watch_logs(filter_id, sink, watch_stop).await }
            });

            let joined = tokio::select! {
                res = &mut watcher => res,
                _ = shutdown.cancelled() => {
                    watch_stop.cancel();
                    watcher.await
                }
                _ = ctx.cancelled() => {
                    watch_stop.cancel();
                    watcher.await
                }
                _ = watch_stop.cancelled() => watcher.await,
            };

            let result = joined.unwrap_or_else(|e| Err(ClientError::network("watch logs", e)));
            match &result {
                Ok(()) => debug!("Log subscription {} finished", filter_id),
                Err(e) => warn!("Log subscription {} failed: {}", filter_id, e),
            }
            result
        });

        Ok(LogSubscription { stop, task })
    }

    pub async fn transaction_receipt(
        &self,
        ctx: &CancellationToken,
        hash: H256,
    ) -> ClientResult<Option<TransactionReceipt>> {
        self.guard(ctx, self.inner.node.transaction_receipt(hash)).await
    }

    /// Transaction by hash and whether it is still pending
    pub async fn transaction(
        &self,
        ctx: &CancellationToken,
        hash: H256,
    ) -> ClientResult<(Option<Transaction>, bool)> {
        self.guard(ctx, self.inner.node.transaction_by_hash(hash)).await
    }

    /// Unlocked accounts on the node, bounded by the account sync timeout
    pub async fn personal_accounts(&self, ctx: &CancellationToken) -> ClientResult<Vec<Address>> {
        let timeout = self.inner.config.account_sync_timeout();
        let node = self.inner.node.clone();
        self.guard(ctx, async move {
            tokio::time::timeout(timeout, node.accounts())
                .await
                .map_err(|_| ClientError::network("list accounts", "account sync timed out"))?
        })
        .await
    }

    /// Transaction options for `account`, signed through the key cache
    pub fn transact_opts(
        &self,
        ctx: CancellationToken,
        account: Address,
        password: &str,
    ) -> ClientResult<TransactOpts> {
        let signer = self
            .inner
            .keys
            .signer_for(account, password)
            .ok_or(ClientError::NoPrivateKey(account))?;
        Ok(TransactOpts::new(account, Some(signer), ctx))
    }

    /// Bind a contract that is either deployed (address only) or pending
    /// deployment (bytecode only)
    pub fn bind_contract(
        &self,
        contract: Option<&ContractDescriptor>,
    ) -> ClientResult<BoundContract> {
        let contract = contract.ok_or(ClientError::NoContract)?;
        match (contract.address(), contract.has_bytecode()) {
            (None, false) => Err(ClientError::ContractNoAddress),
            (Some(_), true) => Err(ClientError::AlreadyDeployed),
            _ => BoundContract::new(self.clone(), contract),
        }
    }

    /// Cancel everything bound to this client and wait for it to wind down
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("Client closed");
    }
}
