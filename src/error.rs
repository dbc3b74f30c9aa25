//! Error types for the transaction client

use ethers::types::Address;
use std::fmt::Display;
use thiserror::Error;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("contract not provided")]
    NoContract,

    #[error("contract has no address")]
    ContractNoAddress,

    #[error("contract deployed already: bytecode is not needed when an address is set")]
    AlreadyDeployed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("private key not found for account {0:?}")]
    NoPrivateKey(Address),

    #[error("no signer to authorize the transaction with")]
    NoSigner,

    #[error("failed to sign: {0}")]
    Signing(String),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("no contract code at given address: {0:?}")]
    NoContractCode(Address),

    #[error("failed to {context}: {message}")]
    Network {
        context: &'static str,
        message: String,
    },

    #[error("Gas oracle error: {0}")]
    Oracle(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("client closed")]
    Closed,
}

/// Broad failure categories callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Authorization,
    Encoding,
    ChainState,
    Network,
    Oracle,
    Cancelled,
}

impl ClientError {
    /// Wrap a transport failure with the call that was being attempted
    pub fn network(context: &'static str, err: impl Display) -> Self {
        ClientError::Network {
            context,
            message: err.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::NoContract
            | ClientError::ContractNoAddress
            | ClientError::AlreadyDeployed
            | ClientError::Config(_) => ErrorKind::Configuration,
            ClientError::NoPrivateKey(_) | ClientError::NoSigner | ClientError::Signing(_) => {
                ErrorKind::Authorization
            }
            ClientError::Abi(_) => ErrorKind::Encoding,
            ClientError::NoContractCode(_) => ErrorKind::ChainState,
            ClientError::Network { .. } => ErrorKind::Network,
            ClientError::Oracle(_) => ErrorKind::Oracle,
            ClientError::Cancelled | ClientError::Closed => ErrorKind::Cancelled,
        }
    }

    /// Check if the caller may reasonably retry. The client itself never does.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Network { .. } | ClientError::Oracle(_) | ClientError::Cancelled
        )
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_carries_context() {
        let err = ClientError::network("suggest gas price", "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to suggest gas price: connection refused"
        );
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_binding_errors_are_configuration() {
        for err in [
            ClientError::NoContract,
            ClientError::ContractNoAddress,
            ClientError::AlreadyDeployed,
        ] {
            assert_eq!(err.kind(), ErrorKind::Configuration);
            assert!(!err.is_retryable());
        }
        assert!(!ClientError::Closed.is_retryable());
    }
}
