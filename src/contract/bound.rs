//! Contract bound to a client, sending transactions through the pipeline

use super::{contract_address, encode_constructor, ContractDescriptor};
use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::node::CallMsg;
use crate::tx::{SignedTransaction, TransactOpts, TransactionSender};

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes, U256};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A contract with a parsed ABI, either deployed or awaiting deployment
pub struct BoundContract {
    name: String,
    address: Option<Address>,
    bytecode: Option<Bytes>,
    abi: Abi,
    client: Client,
    sender: TransactionSender,
}

impl BoundContract {
    pub(crate) fn new(client: Client, contract: &ContractDescriptor) -> ClientResult<Self> {
        let abi = contract.parse_abi()?;
        Ok(Self {
            name: contract.name.clone(),
            address: contract.address(),
            bytecode: contract.bytecode()?,
            abi,
            sender: TransactionSender::new(client.clone()),
            client,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// On-chain address, set at bind time or by a successful deploy
    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    fn deployed_address(&self) -> ClientResult<Address> {
        self.address.ok_or(ClientError::ContractNoAddress)
    }

    fn pack(&self, method: &str, params: &[Token]) -> ClientResult<Bytes> {
        let function = self
            .abi
            .function(method)
            .map_err(|e| ClientError::Abi(format!("unknown method {}: {}", method, e)))?;
        function
            .encode_input(params)
            .map(Bytes::from)
            .map_err(|e| ClientError::Abi(format!("failed to pack {} params: {}", method, e)))
    }

    /// Invoke a paid contract method
    pub async fn transact(
        &self,
        opts: &TransactOpts,
        method: &str,
        params: &[Token],
    ) -> ClientResult<SignedTransaction> {
        let input = self.pack(method, params)?;
        let address = self.deployed_address()?;
        self.sender.transact(opts, Some(address), input).await
    }

    /// Send value with no call data, hitting the contract's fallback.
    /// Contracts without one reject the call when it executes.
    pub async fn transfer(&self, opts: &TransactOpts) -> ClientResult<SignedTransaction> {
        let address = self.deployed_address()?;
        self.sender.transact(opts, Some(address), Bytes::new()).await
    }

    /// Deploy the bytecode with packed constructor `params`. On success the
    /// contract is bound to the address derived from sender and nonce.
    pub async fn deploy(
        &mut self,
        opts: &TransactOpts,
        params: &[Token],
    ) -> ClientResult<(Address, SignedTransaction)> {
        let code = self.bytecode.clone().ok_or(ClientError::AlreadyDeployed)?;
        let input = encode_constructor(&self.abi, code, params)?;

        let tx = self.sender.transact(opts, None, input).await?;
        let address = contract_address(opts.from, tx.nonce());
        self.address = Some(address);

        info!(
            "Contract {} deployed at {:?} by {:?}",
            self.name, address, opts.from
        );
        Ok((address, tx))
    }

    /// Read-only call decoding the method outputs
    pub async fn call(
        &self,
        ctx: &CancellationToken,
        from: Option<Address>,
        method: &str,
        params: &[Token],
    ) -> ClientResult<Vec<Token>> {
        let input = self.pack(method, params)?;
        let msg = CallMsg {
            from: from.unwrap_or_default(),
            to: Some(self.deployed_address()?),
            value: U256::zero(),
            data: input,
        };
        let output = self.client.call_contract(ctx, &msg, None).await?;
        let function = self
            .abi
            .function(method)
            .map_err(|e| ClientError::Abi(e.to_string()))?;
        function
            .decode_output(&output)
            .map_err(|e| ClientError::Abi(format!("failed to unpack {} output: {}", method, e)))
    }
}
