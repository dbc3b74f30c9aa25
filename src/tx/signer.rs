//! Signing capability and signed transaction types

use crate::error::{ClientError, ClientResult};

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, H256};
use std::fmt;

/// How the signing hash is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    /// Pre-EIP-155, no chain id in the sighash
    Homestead,
    /// Replay-protected signature bound to a chain
    Eip155 { chain_id: u64 },
}

/// Capability that can authorize transactions for one account
#[async_trait]
pub trait TxSigner: Send + Sync + fmt::Debug {
    /// Account this capability signs for
    fn address(&self) -> Address;

    async fn sign_transaction(
        &self,
        scheme: SignatureScheme,
        from: Address,
        tx: TypedTransaction,
    ) -> ClientResult<SignedTransaction>;
}

/// A transaction together with its signature. Immutable once built.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    tx: TypedTransaction,
    signature: Signature,
}

impl SignedTransaction {
    pub fn new(tx: TypedTransaction, signature: Signature) -> Self {
        Self { tx, signature }
    }

    pub fn nonce(&self) -> u64 {
        self.tx.nonce().map(|n| n.low_u64()).unwrap_or_default()
    }

    /// Recipient, `None` for contract creation
    pub fn to(&self) -> Option<Address> {
        self.tx.to().and_then(|to| to.as_address().copied())
    }

    pub fn is_creation(&self) -> bool {
        self.to().is_none()
    }

    pub fn hash(&self) -> H256 {
        self.tx.hash(&self.signature)
    }

    /// RLP encoding submitted to the node
    pub fn rlp(&self) -> Bytes {
        self.tx.rlp_signed(&self.signature)
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn transaction(&self) -> &TypedTransaction {
        &self.tx
    }

    /// Recover the signing account from the signature
    pub fn recover_signer(&self) -> ClientResult<Address> {
        self.signature
            .recover(self.tx.sighash())
            .map_err(|e| ClientError::Signing(e.to_string()))
    }
}

/// Sign `tx` with a local wallet under the requested scheme
pub(crate) fn sign_with_wallet(
    wallet: &LocalWallet,
    scheme: SignatureScheme,
    tx: TypedTransaction,
) -> ClientResult<SignedTransaction> {
    use ethers::signers::Signer;

    match scheme {
        SignatureScheme::Homestead => {
            let mut tx = tx;
            if let TypedTransaction::Legacy(ref mut inner) = tx {
                inner.chain_id = None;
            }
            let signature = wallet
                .sign_hash(tx.sighash())
                .map_err(|e| ClientError::Signing(e.to_string()))?;
            Ok(SignedTransaction::new(tx, signature))
        }
        SignatureScheme::Eip155 { chain_id } => {
            let mut tx = tx;
            tx.set_chain_id(chain_id);
            let signature = wallet
                .clone()
                .with_chain_id(chain_id)
                .sign_transaction_sync(&tx)
                .map_err(|e| ClientError::Signing(e.to_string()))?;
            Ok(SignedTransaction::new(tx, signature))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::Signer;
    use ethers::types::{TransactionRequest, U256};

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn unsigned(nonce: u64, to: Option<Address>) -> TypedTransaction {
        let mut req = TransactionRequest::new()
            .nonce(nonce)
            .value(U256::zero())
            .gas(21_000u64)
            .gas_price(U256::from(1_000_000_000u64));
        if let Some(to) = to {
            req = req.to(to);
        }
        TypedTransaction::Legacy(req)
    }

    #[test]
    fn test_eip155_signature_recovers_sender() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let signed = sign_with_wallet(
            &wallet,
            SignatureScheme::Eip155 { chain_id: 5 },
            unsigned(3, Some(Address::repeat_byte(0x11))),
        )
        .unwrap();

        assert_eq!(signed.nonce(), 3);
        assert_eq!(signed.recover_signer().unwrap(), wallet.address());
        // v = recid + 35 + 2 * chain_id
        assert!(signed.signature().v == 45 || signed.signature().v == 46);
        assert!(!signed.is_creation());
    }

    #[test]
    fn test_homestead_signature_has_legacy_v() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let signed =
            sign_with_wallet(&wallet, SignatureScheme::Homestead, unsigned(1, None)).unwrap();

        assert!(signed.signature().v == 27 || signed.signature().v == 28);
        assert_eq!(signed.recover_signer().unwrap(), wallet.address());
        assert!(signed.is_creation());
        assert_ne!(signed.hash(), H256::zero());
        assert!(!signed.rlp().is_empty());
    }
}
