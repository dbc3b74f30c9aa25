//! Contract descriptors, deployment helpers and bound contracts

mod bound;

pub use bound::BoundContract;

use crate::error::{ClientError, ClientResult};

use ethers::abi::{Abi, Token};
use ethers::types::{Address, Bytes};
use ethers::utils::rlp::RlpStream;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

/// A deployed contract (address) or one pending deployment (bytecode)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractDescriptor {
    /// Label only
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: Option<Address>,
    /// JSON ABI, either inline or as a JSON-encoded string
    pub abi: serde_json::Value,
    /// Hex-encoded deployment code
    #[serde(default)]
    pub bin: Option<String>,
}

impl ContractDescriptor {
    /// Descriptor of a contract already on chain
    pub fn deployed(name: impl Into<String>, address: Address, abi: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            address: Some(address),
            abi,
            bin: None,
        }
    }

    /// Descriptor of a contract to be deployed from `bin`
    pub fn undeployed(name: impl Into<String>, abi: serde_json::Value, bin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            abi,
            bin: Some(bin.into()),
        }
    }

    /// Address if set; the zero address counts as unset
    pub fn address(&self) -> Option<Address> {
        self.address.filter(|a| !a.is_zero())
    }

    fn bin_hex(&self) -> Option<&str> {
        let code = self.bin.as_deref()?.trim();
        Some(code.strip_prefix("0x").unwrap_or(code)).filter(|c| !c.is_empty())
    }

    /// Whether bytecode is set, without checking that it decodes
    pub fn has_bytecode(&self) -> bool {
        self.bin_hex().is_some()
    }

    /// Decoded bytecode if set; empty code counts as unset
    pub fn bytecode(&self) -> ClientResult<Option<Bytes>> {
        let Some(hex_code) = self.bin_hex() else {
            return Ok(None);
        };
        let code = hex::decode(hex_code)
            .map_err(|e| ClientError::Abi(format!("invalid contract bytecode: {}", e)))?;
        Ok(Some(Bytes::from(code)))
    }

    /// Parse the ABI schema
    pub fn parse_abi(&self) -> ClientResult<Abi> {
        let parsed: Result<Abi, serde_json::Error> = match &self.abi {
            serde_json::Value::String(raw) => serde_json::from_str(raw),
            value => serde_json::from_value(value.clone()),
        };
        parsed.map_err(|e| ClientError::Abi(format!("failed to parse contract ABI: {}", e)))
    }
}

/// Pack constructor arguments behind the deployment code
pub(crate) fn encode_constructor(abi: &Abi, code: Bytes, params: &[Token]) -> ClientResult<Bytes> {
    match abi.constructor() {
        Some(constructor) => constructor
            .encode_input(code.to_vec(), params)
            .map(Bytes::from)
            .map_err(|e| ClientError::Abi(format!("failed to pack contract params: {}", e))),
        None if params.is_empty() => Ok(code),
        None => Err(ClientError::Abi(
            "failed to pack contract params: contract has no constructor".to_string(),
        )),
    }
}

/// Deployment payload: bytecode followed by packed constructor arguments
pub fn deploy_bin(contract: &ContractDescriptor, params: &[Token]) -> ClientResult<Bytes> {
    let abi = contract.parse_abi()?;
    let code = contract.bytecode()?.unwrap_or_default();
    encode_constructor(&abi, code, params)
}

/// Parsed ABI and packed constructor arguments without the bytecode
pub fn call_bin(contract: &ContractDescriptor, params: &[Token]) -> ClientResult<(Abi, Bytes)> {
    let abi = contract.parse_abi()?;
    let input = encode_constructor(&abi, Bytes::new(), params)?;
    Ok((abi, input))
}

/// Address of a contract created by `sender` with `nonce`:
/// the low 20 bytes of keccak256(rlp([sender, nonce]))
pub fn contract_address(sender: Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(&sender);
    stream.append(&nonce);
    let hash = Keccak256::digest(stream.out());
    Address::from_slice(&hash[12..])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ethers::types::U256;

    pub(crate) const TOKEN_ABI: &str = r#"[
        {"constant":true,"inputs":[],"name":"name","outputs":[{"name":"","type":"string"}],"payable":false,"stateMutability":"view","type":"function"},
        {"constant":true,"inputs":[{"name":"_owner","type":"address"}],"name":"balanceOf","outputs":[{"name":"balance","type":"uint256"}],"payable":false,"stateMutability":"view","type":"function"},
        {"constant":false,"inputs":[{"name":"_to","type":"address"},{"name":"_value","type":"uint256"}],"name":"transfer","outputs":[],"payable":false,"stateMutability":"nonpayable","type":"function"},
        {"inputs":[{"name":"_ico","type":"address"}],"payable":false,"stateMutability":"nonpayable","type":"constructor"},
        {"anonymous":false,"inputs":[{"indexed":true,"name":"from","type":"address"},{"indexed":true,"name":"to","type":"address"},{"indexed":false,"name":"value","type":"uint256"}],"name":"Transfer","type":"event"}
    ]"#;

    pub(crate) const TOKEN_BIN: &str = "0x6060604052600a8060106000396000f360606040526008565b00";

    pub(crate) fn token_abi() -> serde_json::Value {
        serde_json::from_str(TOKEN_ABI).unwrap()
    }

    #[test]
    fn test_contract_address_matches_reference() {
        let sender: Address = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa".parse().unwrap();
        for nonce in [0u64, 1, 127, 128, 1_000_000] {
            assert_eq!(
                contract_address(sender, nonce),
                ethers::utils::get_contract_address(sender, U256::from(nonce))
            );
        }
    }

    #[test]
    fn test_known_contract_address() {
        // First contract created by 0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0
        let sender: Address = "0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0".parse().unwrap();
        let expected: Address = "0xcd234a471b72ba2f1ccf0a70fcaba648a5eecd8d".parse().unwrap();
        assert_eq!(contract_address(sender, 0), expected);
    }

    #[test]
    fn test_abi_accepts_inline_or_string_json() {
        let inline = ContractDescriptor::deployed("token", Address::repeat_byte(1), token_abi());
        let encoded = ContractDescriptor::deployed(
            "token",
            Address::repeat_byte(1),
            serde_json::Value::String(TOKEN_ABI.to_string()),
        );
        assert!(inline.parse_abi().unwrap().function("balanceOf").is_ok());
        assert!(encoded.parse_abi().unwrap().function("transfer").is_ok());

        let broken = ContractDescriptor::deployed(
            "broken",
            Address::repeat_byte(1),
            serde_json::Value::String("{not json".to_string()),
        );
        assert!(matches!(broken.parse_abi(), Err(ClientError::Abi(_))));
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let mut contract = ContractDescriptor::undeployed("token", token_abi(), "0x");
        contract.address = Some(Address::zero());
        assert!(contract.address().is_none());
        assert!(contract.bytecode().unwrap().is_none());
        assert!(!contract.has_bytecode());

        contract.bin = Some("0xzz".to_string());
        assert!(contract.has_bytecode());
        assert!(matches!(contract.bytecode(), Err(ClientError::Abi(_))));
    }

    #[test]
    fn test_deploy_bin_appends_constructor_args() {
        let contract = ContractDescriptor::undeployed("token", token_abi(), TOKEN_BIN);
        let ico = Address::repeat_byte(0x33);
        let payload = deploy_bin(&contract, &[Token::Address(ico)]).unwrap();

        let code = contract.bytecode().unwrap().unwrap();
        assert_eq!(payload.len(), code.len() + 32);
        assert_eq!(&payload[..code.len()], &code[..]);
        assert_eq!(&payload[code.len() + 12..], ico.as_bytes());

        let (abi, args) = call_bin(&contract, &[Token::Address(ico)]).unwrap();
        assert!(abi.constructor().is_some());
        assert_eq!(&args[..], &payload[code.len()..]);
    }

    #[test]
    fn test_deploy_bin_rejects_bad_params() {
        let contract = ContractDescriptor::undeployed("token", token_abi(), TOKEN_BIN);
        let err = deploy_bin(&contract, &[Token::Bool(true), Token::Bool(false)]).unwrap_err();
        assert!(matches!(err, ClientError::Abi(_)));
    }

    #[test]
    fn test_descriptor_deserializes_from_json() {
        let json = format!(
            r#"{{"name":"token","address":"0x22714a7e5ff13df0591d821fa760f88a5b0e60de","abi":{}}}"#,
            TOKEN_ABI
        );
        let contract: ContractDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(
            contract.address(),
            Some("0x22714a7e5ff13df0591d821fa760f88a5b0e60de".parse().unwrap())
        );
        assert!(contract.bin.is_none());
    }
}
