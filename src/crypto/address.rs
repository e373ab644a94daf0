//! Ethereum address derivation, shared between the DKG, signing and any
//! future viewing paths: `compressed_pubkey -> EIP-55 checksummed address`.

use k256::EncodedPoint;
use k256::elliptic_curve::sec1::FromEncodedPoint;
use sha3::{Digest, Keccak256};

use crate::error::{WalletError, WalletResult};

/// Derive the EIP-55 checksummed Ethereum address from a compressed
/// secp256k1 public key (33 bytes, `0x02`/`0x03` prefix).
///
/// Decompresses to `(x || y)` (64 bytes), keccak-256 hashes it, and takes
/// the last 20 bytes, checksummed per EIP-55.
pub fn derive_eth_address(compressed_pubkey: &[u8]) -> WalletResult<String> {
    if compressed_pubkey.len() != 33 {
        return Err(WalletError::InvalidInput(format!(
            "expected 33-byte compressed public key, got {}",
            compressed_pubkey.len()
        )));
    }

    let encoded = EncodedPoint::from_bytes(compressed_pubkey)
        .map_err(|_| WalletError::InvalidInput("malformed compressed public key".to_string()))?;
    let affine: Option<k256::AffinePoint> = k256::AffinePoint::from_encoded_point(&encoded).into();
    let affine = affine.ok_or_else(|| WalletError::InvalidInput("point not on curve".to_string()))?;

    let uncompressed = k256::EncodedPoint::from(affine).to_bytes();
    // uncompressed is `0x04 || x || y`; drop the prefix for the hash input.
    let xy = &uncompressed[1..];

    let hash = Keccak256::digest(xy);
    let address_bytes = &hash[12..]; // last 20 bytes

    Ok(checksum_address(address_bytes))
}

/// Apply EIP-55 mixed-case checksumming to a raw 20-byte address.
fn checksum_address(address_bytes: &[u8]) -> String {
    let hex_lower = hex::encode(address_bytes);
    let hash = Keccak256::digest(hex_lower.as_bytes());

    let mut checksummed = String::with_capacity(42);
    checksummed.push_str("0x");

    for (i, c) in hex_lower.chars().enumerate() {
        if c.is_ascii_digit() {
            checksummed.push(c);
            continue;
        }
        // Each hex digit of `hash` covers a nibble of `hex_lower`; the high
        // nibble of hash byte i/2 applies to even indices, low to odd.
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if nibble >= 8 {
            checksummed.push(c.to_ascii_uppercase());
        } else {
            checksummed.push(c);
        }
    }

    checksummed
}

/// Case-insensitive validation of a 20-byte `0x`-prefixed hex address,
/// independent of whether it carries (or matches) an EIP-55 checksum.
pub fn is_valid_address_format(address: &str) -> bool {
    let Some(hex_part) = address.strip_prefix("0x") else {
        return false;
    };
    hex_part.len() == 40 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}
