//! Transaction pipeline: nonce allocation, gas resolution, signing, dispatch
//! and nonce rollback when dispatch fails

use super::{NonceCache, SignedTransaction, TxSigner};
use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::node::CallMsg;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call options. Unset overrides are resolved by the pipeline.
#[derive(Clone)]
pub struct TransactOpts {
    pub from: Address,
    pub signer: Option<Arc<dyn TxSigner>>,
    pub context: CancellationToken,
    pub value: Option<U256>,
    pub nonce: Option<u64>,
    pub gas_price: Option<U256>,
    pub gas_limit: Option<u64>,
}

impl TransactOpts {
    pub fn new(from: Address, signer: Option<Arc<dyn TxSigner>>, context: CancellationToken) -> Self {
        Self {
            from,
            signer,
            context,
            value: None,
            nonce: None,
            gas_price: None,
            gas_limit: None,
        }
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

impl fmt::Debug for TransactOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactOpts")
            .field("from", &self.from)
            .field("signer", &self.signer)
            .field("value", &self.value)
            .field("nonce", &self.nonce)
            .field("gas_price", &self.gas_price)
            .field("gas_limit", &self.gas_limit)
            .finish()
    }
}

/// Assembles, signs and dispatches transactions through a client
#[derive(Clone)]
pub struct TransactionSender {
    client: Client,
}

impl TransactionSender {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn nonces(&self) -> &NonceCache {
        self.client.nonce_cache()
    }

    /// Sign and submit a transaction to `to`, or a contract creation when
    /// `to` is `None`.
    ///
    /// A nonce taken from the cache is claimed before any network call and
    /// handed back only if dispatch fails. Earlier failures keep it claimed.
    pub async fn transact(
        &self,
        opts: &TransactOpts,
        to: Option<Address>,
        data: Bytes,
    ) -> ClientResult<SignedTransaction> {
        let ctx = &opts.context;
        let value = opts.value.unwrap_or_default();

        let (nonce, from_cache) = match opts.nonce {
            Some(nonce) => (nonce, false),
            None => (self.nonces().increment(opts.from), true),
        };

        let gas_price = match opts.gas_price {
            Some(price) => price,
            None => self
                .client
                .suggest_gas_price(ctx)
                .await
                .map_err(|e| fail("gas_price", e))?,
        };

        let gas_limit = match opts.gas_limit {
            Some(limit) => limit,
            None => {
                // Gas estimation cannot succeed without deployed code
                if let Some(contract) = to {
                    let code = self
                        .client
                        .pending_code_at(ctx, contract)
                        .await
                        .map_err(|e| fail("gas_limit", e))?;
                    if code.is_empty() {
                        return Err(fail("gas_limit", ClientError::NoContractCode(contract)));
                    }
                }
                let msg = CallMsg {
                    from: opts.from,
                    to,
                    value,
                    data: data.clone(),
                };
                self.client
                    .estimate_gas(ctx, &msg)
                    .await
                    .map_err(|e| fail("gas_limit", e))?
            }
        };

        let raw_tx = build_transaction(opts.from, to, nonce, value, gas_limit, gas_price, data);

        let signer = opts.signer.as_ref().ok_or_else(|| fail("sign", ClientError::NoSigner))?;
        let scheme = self.client.config().signature_scheme();
        let signed = signer
            .sign_transaction(scheme, opts.from, raw_tx)
            .await
            .map_err(|e| fail("sign", e))?;

        if let Err(e) = self.client.send_transaction(ctx, &signed).await {
            if from_cache {
                self.nonces().release(opts.from, nonce);
            }
            return Err(fail("dispatch", e));
        }

        crate::metrics::record_tx_submitted(to.is_none());
        info!(
            "Transaction {:?} sent from {:?} with nonce {}",
            signed.hash(),
            opts.from,
            nonce
        );
        Ok(signed)
    }
}

fn fail(stage: &'static str, err: ClientError) -> ClientError {
    crate::metrics::record_tx_failed(stage);
    match stage {
        "dispatch" => warn!("Transaction dispatch failed: {}", err),
        _ => debug!("Transaction failed at {}: {}", stage, err),
    }
    err
}

/// Contract creation when `to` is `None`, a plain call otherwise
fn build_transaction(
    from: Address,
    to: Option<Address>,
    nonce: u64,
    value: U256,
    gas_limit: u64,
    gas_price: U256,
    data: Bytes,
) -> TypedTransaction {
    let mut tx = TransactionRequest::new()
        .from(from)
        .nonce(nonce)
        .value(value)
        .gas(gas_limit)
        .gas_price(gas_price)
        .data(data);
    if let Some(to) = to {
        tx = tx.to(to);
    }
    TypedTransaction::Legacy(tx)
}
