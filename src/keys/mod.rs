//! Key cache handing out signing capabilities per account

mod keystore;

pub use keystore::{Keystore, WalletKeystore};

#[cfg(test)]
pub use keystore::MockKeystore;

use crate::error::{ClientError, ClientResult};
use crate::tx::{SignatureScheme, SignedTransaction, TxSigner};
use keystore::credential_digest;

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::Address;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Looks up signing capabilities without owning key material.
///
/// Capabilities are memoized per account and credential digest. A lookup
/// only asks the keystore whether it knows the account; a wrong credential
/// surfaces when the capability is used.
#[derive(Clone)]
pub struct KeyCache {
    keystore: Arc<dyn Keystore>,
    signers: Arc<DashMap<(Address, [u8; 32]), Arc<dyn TxSigner>>>,
}

impl KeyCache {
    pub fn new(keystore: Arc<dyn Keystore>) -> Self {
        Self {
            keystore,
            signers: Arc::new(DashMap::new()),
        }
    }

    /// Signing capability for `account`, or `None` when the keystore does not know it
    pub fn signer_for(&self, account: Address, credential: &str) -> Option<Arc<dyn TxSigner>> {
        let key = (account, credential_digest(credential));
        if let Some(signer) = self.signers.get(&key) {
            return Some(signer.clone());
        }

        if !self.keystore.has_account(&account) {
            debug!("No key for account {:?}", account);
            return None;
        }

        let signer = self
            .signers
            .entry(key)
            .or_insert_with(|| {
                Arc::new(KeystoreSigner {
                    keystore: self.keystore.clone(),
                    account,
                    credential: credential.to_string(),
                })
            })
            .clone();
        Some(signer)
    }

    /// Drop every memoized capability for `account`
    pub fn forget(&self, account: &Address) {
        self.signers.retain(|(cached, _), _| cached != account);
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }
}

impl fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCache")
            .field("signers", &self.signers.len())
            .finish()
    }
}

/// Capability bound to one account, delegating to the keystore
struct KeystoreSigner {
    keystore: Arc<dyn Keystore>,
    account: Address,
    credential: String,
}

impl fmt::Debug for KeystoreSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeystoreSigner")
            .field("account", &self.account)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TxSigner for KeystoreSigner {
    fn address(&self) -> Address {
        self.account
    }

    async fn sign_transaction(
        &self,
        scheme: SignatureScheme,
        from: Address,
        tx: TypedTransaction,
    ) -> ClientResult<SignedTransaction> {
        if from != self.account {
            return Err(ClientError::Signing(format!(
                "not authorized to sign for {:?}",
                from
            )));
        }
        self.keystore
            .sign_transaction(self.account, &self.credential, scheme, tx)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{TransactionRequest, U256};
    use tokio_test::{assert_err, assert_ok};

    const KEY: &str = "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn transfer_tx() -> TypedTransaction {
        TransactionRequest::new()
            .to(Address::repeat_byte(0x22))
            .nonce(1u64)
            .value(U256::from(10u64))
            .gas(21_000u64)
            .gas_price(U256::from(1u64))
            .into()
    }

    fn wallet_cache() -> (KeyCache, Address) {
        let keystore = WalletKeystore::new();
        let address = keystore.insert(KEY.parse::<LocalWallet>().unwrap(), "123456");
        (KeyCache::new(Arc::new(keystore)), address)
    }

    #[test]
    fn test_unknown_account_has_no_signer() {
        let mut keystore = MockKeystore::new();
        keystore.expect_has_account().returning(|_| false);
        keystore.expect_sign_transaction().never();

        let cache = KeyCache::new(Arc::new(keystore));
        assert!(cache.signer_for(Address::repeat_byte(1), "pw").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_signer_is_memoized_per_credential() {
        let mut keystore = MockKeystore::new();
        keystore.expect_has_account().times(2).returning(|_| true);

        let cache = KeyCache::new(Arc::new(keystore));
        let account = Address::repeat_byte(2);
        let first = cache.signer_for(account, "pw").unwrap();
        let again = cache.signer_for(account, "pw").unwrap();
        let other = cache.signer_for(account, "other").unwrap();

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(cache.len(), 2);

        cache.forget(&account);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_wallet_signer_signs_for_its_account() {
        let (cache, address) = wallet_cache();
        let signer = cache.signer_for(address, "123456").unwrap();
        assert_eq!(signer.address(), address);

        let signed = assert_ok!(
            signer
                .sign_transaction(SignatureScheme::Eip155 { chain_id: 1 }, address, transfer_tx())
                .await
        );
        assert_eq!(signed.recover_signer().unwrap(), address);
    }

    #[tokio::test]
    async fn test_wrong_password_fails_at_signing_time() {
        let (cache, address) = wallet_cache();
        // Lookup succeeds, the keystore rejects the credential later
        let signer = cache.signer_for(address, "wrong").unwrap();

        let err = assert_err!(
            signer
                .sign_transaction(SignatureScheme::Homestead, address, transfer_tx())
                .await
        );
        assert!(matches!(err, ClientError::Signing(_)));
    }

    #[tokio::test]
    async fn test_signer_refuses_other_sender() {
        let (cache, address) = wallet_cache();
        let signer = cache.signer_for(address, "123456").unwrap();

        let err = signer
            .sign_transaction(
                SignatureScheme::Homestead,
                Address::repeat_byte(9),
                transfer_tx(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Signing(_)));
    }

    #[test]
    fn test_import_private_key() {
        let keystore = WalletKeystore::new();
        let address = keystore.import_private_key(&format!("0x{}", KEY), "pw").unwrap();
        let expected = KEY.parse::<LocalWallet>().unwrap().address();
        assert_eq!(address, expected);
        assert!(keystore.has_account(&address));
        assert!(keystore.import_private_key("zz", "pw").is_err());
    }
}
