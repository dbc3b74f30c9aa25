//! Keystore collaborators that own private keys

use crate::error::{ClientError, ClientResult};
use crate::tx::signer::sign_with_wallet;
use crate::tx::{SignatureScheme, SignedTransaction};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::Address;
use sha3::{Digest, Keccak256};
use std::fmt;
use tracing::debug;

/// Storage that can unlock an account's key with a credential.
///
/// Credential checks happen when signing, not on lookup.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Keystore: Send + Sync {
    fn has_account(&self, account: &Address) -> bool;

    async fn sign_transaction(
        &self,
        account: Address,
        credential: &str,
        scheme: SignatureScheme,
        tx: TypedTransaction,
    ) -> ClientResult<SignedTransaction>;
}

/// Keccak digest of a credential, so plain passwords are not kept as map keys
pub(crate) fn credential_digest(credential: &str) -> [u8; 32] {
    Keccak256::digest(credential.as_bytes()).into()
}

struct StoredKey {
    wallet: LocalWallet,
    password: [u8; 32],
}

/// In-memory keystore of local wallets, each locked by a password
#[derive(Default)]
pub struct WalletKeystore {
    keys: DashMap<Address, StoredKey>,
}

impl WalletKeystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a wallet unlocked by `password`. Returns its address.
    pub fn insert(&self, wallet: LocalWallet, password: &str) -> Address {
        let address = wallet.address();
        self.keys.insert(
            address,
            StoredKey {
                wallet,
                password: credential_digest(password),
            },
        );
        debug!("Keystore holds key for {:?}", address);
        address
    }

    /// Add a wallet from a hex-encoded private key
    pub fn import_private_key(&self, private_key: &str, password: &str) -> ClientResult<Address> {
        let wallet: LocalWallet = private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ClientError::Config(format!("Invalid private key: {}", e)))?;
        Ok(self.insert(wallet, password))
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.keys.iter().map(|e| *e.key()).collect()
    }
}

impl fmt::Debug for WalletKeystore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKeystore")
            .field("accounts", &self.accounts())
            .finish()
    }
}

#[async_trait]
impl Keystore for WalletKeystore {
    fn has_account(&self, account: &Address) -> bool {
        self.keys.contains_key(account)
    }

    async fn sign_transaction(
        &self,
        account: Address,
        credential: &str,
        scheme: SignatureScheme,
        tx: TypedTransaction,
    ) -> ClientResult<SignedTransaction> {
        let key = self
            .keys
            .get(&account)
            .ok_or(ClientError::NoPrivateKey(account))?;

        if key.password != credential_digest(credential) {
            return Err(ClientError::Signing(format!(
                "could not decrypt key for {:?} with given password",
                account
            )));
        }

        sign_with_wallet(&key.wallet, scheme, tx)
    }
}
