//! RLP transaction encoding: turns a `sign-tx` request's unsigned
//! transaction fields into the keccak-256 digest the Signing Coordinator is
//! asked to finalize against. Legacy (EIP-155) and EIP-1559 fee shapes are
//! both supported; the branch is purely on which fee fields the caller
//! supplied.

use primitive_types::U256;
use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{WalletError, WalletResult};

/// Gas pricing fields, mutually exclusive per transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GasFees {
    Legacy {
        gas_price: String,
    },
    Eip1559 {
        max_fee_per_gas: String,
        max_priority_fee_per_gas: String,
    },
}

/// An unsigned Ethereum transaction as submitted to `/sign/session`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub nonce: u64,
    /// `None` for a contract-creation transaction.
    pub to: Option<String>,
    pub value_wei: String,
    #[serde(default)]
    pub data: String,
    pub gas_limit: u64,
    #[serde(flatten)]
    pub fees: GasFees,
}

fn parse_address(addr: &str) -> WalletResult<[u8; 20]> {
    let hex_part = addr.strip_prefix("0x").unwrap_or(addr);
    let bytes = hex::decode(hex_part)
        .map_err(|_| WalletError::InvalidInput(format!("invalid address hex: {addr}")))?;
    bytes
        .try_into()
        .map_err(|_| WalletError::InvalidInput(format!("address must be 20 bytes: {addr}")))
}

fn parse_data(data: &str) -> WalletResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let hex_part = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(hex_part).map_err(|_| WalletError::InvalidInput("invalid data hex".to_string()))
}

fn parse_wei(value: &str) -> WalletResult<U256> {
    U256::from_dec_str(value)
        .or_else(|_| U256::from_str_radix(value.trim_start_matches("0x"), 16))
        .map_err(|_| WalletError::InvalidInput(format!("invalid wei amount: {value}")))
}

fn append_u256(stream: &mut RlpStream, value: U256) {
    if value.is_zero() {
        stream.append_empty_data();
        return;
    }
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(31);
    stream.append(&&bytes[first_nonzero..]);
}

impl UnsignedTransaction {
    /// RLP-encode the unsigned transaction per its fee-field shape and
    /// keccak-256 the result — the digest the Signing Coordinator
    /// finalizes against.
    pub fn digest(&self) -> WalletResult<[u8; 32]> {
        let encoded = self.encode_unsigned()?;
        let hash = Keccak256::digest(&encoded);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hash);
        Ok(out)
    }

    /// RLP-encode the transaction with its ECDSA signature attached —
    /// the payload an external broadcaster would relay — and
    /// keccak-256 it into the externally visible transaction hash.
    /// Non-goal: this service does not itself broadcast the result.
    pub fn signed_hash(&self, r: [u8; 32], s: [u8; 32], v: u8) -> WalletResult<[u8; 32]> {
        let encoded = self.encode_signed(r, s, v)?;
        let hash = Keccak256::digest(&encoded);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hash);
        Ok(out)
    }

    fn encode_signed(&self, r: [u8; 32], s: [u8; 32], v: u8) -> WalletResult<Vec<u8>> {
        let value = parse_wei(&self.value_wei)?;
        let data = parse_data(&self.data)?;
        let to = self.to.as_deref().map(parse_address).transpose()?;
        let r_value = U256::from_big_endian(&r);
        let s_value = U256::from_big_endian(&s);

        match &self.fees {
            GasFees::Legacy { gas_price } => {
                let gas_price = parse_wei(gas_price)?;
                // EIP-155: v = recovery_bit + chain_id*2 + 35.
                let recovery_bit = u64::from(v.saturating_sub(27));
                let eip155_v = recovery_bit + self.chain_id * 2 + 35;
                let mut stream = RlpStream::new_list(9);
                stream.append(&self.nonce);
                append_u256(&mut stream, gas_price);
                stream.append(&self.gas_limit);
                match to {
                    Some(addr) => stream.append(&addr.as_slice()),
                    None => stream.append_empty_data(),
                };
                append_u256(&mut stream, value);
                stream.append(&data);
                stream.append(&eip155_v);
                append_u256(&mut stream, r_value);
                append_u256(&mut stream, s_value);
                Ok(stream.out().to_vec())
            }
            GasFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee = parse_wei(max_fee_per_gas)?;
                let max_priority_fee = parse_wei(max_priority_fee_per_gas)?;
                let y_parity = v.saturating_sub(27);
                let mut stream = RlpStream::new_list(12);
                stream.append(&self.chain_id);
                stream.append(&self.nonce);
                append_u256(&mut stream, max_priority_fee);
                append_u256(&mut stream, max_fee);
                stream.append(&self.gas_limit);
                match to {
                    Some(addr) => stream.append(&addr.as_slice()),
                    None => stream.append_empty_data(),
                };
                append_u256(&mut stream, value);
                stream.append(&data);
                stream.begin_list(0);
                stream.append(&y_parity);
                append_u256(&mut stream, r_value);
                append_u256(&mut stream, s_value);
                let mut payload = vec![0x02u8];
                payload.extend_from_slice(&stream.out());
                Ok(payload)
            }
        }
    }

    fn encode_unsigned(&self) -> WalletResult<Vec<u8>> {
        let value = parse_wei(&self.value_wei)?;
        let data = parse_data(&self.data)?;
        let to = self.to.as_deref().map(parse_address).transpose()?;

        match &self.fees {
            GasFees::Legacy { gas_price } => {
                let gas_price = parse_wei(gas_price)?;
                let mut stream = RlpStream::new_list(9);
                stream.append(&self.nonce);
                append_u256(&mut stream, gas_price);
                stream.append(&self.gas_limit);
                match to {
                    Some(addr) => stream.append(&addr.as_slice()),
                    None => stream.append_empty_data(),
                };
                append_u256(&mut stream, value);
                stream.append(&data);
                // EIP-155: chainId, 0, 0 in place of v, r, s on the unsigned form.
                stream.append(&self.chain_id);
                stream.append_empty_data();
                stream.append_empty_data();
                Ok(stream.out().to_vec())
            }
            GasFees::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee = parse_wei(max_fee_per_gas)?;
                let max_priority_fee = parse_wei(max_priority_fee_per_gas)?;
                let mut stream = RlpStream::new_list(9);
                stream.append(&self.chain_id);
                stream.append(&self.nonce);
                append_u256(&mut stream, max_priority_fee);
                append_u256(&mut stream, max_fee);
                stream.append(&self.gas_limit);
                match to {
                    Some(addr) => stream.append(&addr.as_slice()),
                    None => stream.append_empty_data(),
                };
                append_u256(&mut stream, value);
                stream.append(&data);
                stream.begin_list(0); // empty access list
                let mut payload = vec![0x02u8];
                payload.extend_from_slice(&stream.out());
                Ok(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_tx() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 1,
            nonce: 9,
            to: Some("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string()),
            value_wei: "1000000000000000000".to_string(),
            data: String::new(),
            gas_limit: 21_000,
            fees: GasFees::Legacy {
                gas_price: "20000000000".to_string(),
            },
        }
    }

    fn eip1559_tx() -> UnsignedTransaction {
        UnsignedTransaction {
            chain_id: 1,
            nonce: 9,
            to: Some("0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string()),
            value_wei: "1000000000000000000".to_string(),
            data: "0xa9059cbb".to_string(),
            gas_limit: 21_000,
            fees: GasFees::Eip1559 {
                max_fee_per_gas: "30000000000".to_string(),
                max_priority_fee_per_gas: "1000000000".to_string(),
            },
        }
    }

    #[test]
    fn legacy_digest_is_32_bytes_and_deterministic() {
        let tx = legacy_tx();
        let a = tx.digest().unwrap();
        let b = tx.digest().unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, b);
    }

    #[test]
    fn eip1559_digest_differs_from_legacy_for_same_fields() {
        let legacy = legacy_tx().digest().unwrap();
        let eip1559 = eip1559_tx().digest().unwrap();
        assert_ne!(legacy, eip1559);
    }

    #[test]
    fn contract_creation_has_no_to_field() {
        let mut tx = legacy_tx();
        tx.to = None;
        assert!(tx.digest().is_ok());
    }

    #[test]
    fn malformed_value_is_rejected() {
        let mut tx = legacy_tx();
        tx.value_wei = "not-a-number".to_string();
        assert!(tx.digest().is_err());
    }

    #[test]
    fn signed_hash_differs_from_unsigned_digest() {
        let tx = legacy_tx();
        let unsigned = tx.digest().unwrap();
        let signed = tx.signed_hash([1u8; 32], [2u8; 32], 27).unwrap();
        assert_ne!(unsigned, signed);
    }

    #[test]
    fn signed_hash_is_deterministic_per_signature() {
        let tx = eip1559_tx();
        let a = tx.signed_hash([3u8; 32], [4u8; 32], 28).unwrap();
        let b = tx.signed_hash([3u8; 32], [4u8; 32], 28).unwrap();
        let c = tx.signed_hash([3u8; 32], [4u8; 32], 27).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
