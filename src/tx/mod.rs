//! Transaction submission module with nonce caching and signing

mod nonce;
mod sender;
pub(crate) mod signer;


pub use nonce::NonceCache;
pub use sender::{TransactOpts, TransactionSender};
pub use signer::{SignatureScheme, SignedTransaction, TxSigner};
