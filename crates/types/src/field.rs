//! Field element encoding helpers.
//!
//! Conversions between `ark_bn254::Fr` and the byte/hex forms used at the
//! protocol boundary. On-chain values and input hashes use big-endian 32-byte
//! encodings, matching `abi.encodePacked(uint256)`.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;

use crate::constants::FIELD_SIZE;

/// Errors raised while decoding field elements from external data.
#[derive(Debug, thiserror::Error)]
pub enum FieldDecodeError {
    /// Byte slice was not exactly [`FIELD_SIZE`] bytes long.
    #[error("expected {FIELD_SIZE} bytes, got {0}")]
    BadLength(usize),
    /// Hex string could not be decoded.
    #[error("invalid hex: {0}")]
    BadHex(#[from] hex::FromHexError),
}

/// Encode a field element as 32 big-endian bytes.
pub fn fr_to_be_bytes(value: &Fr) -> [u8; FIELD_SIZE] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; FIELD_SIZE];
    let start = FIELD_SIZE.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[..bytes.len().min(FIELD_SIZE)]);
    out
}

/// Decode a field element from exactly 32 big-endian bytes, reducing mod p.
pub fn fr_from_be_bytes(bytes: &[u8]) -> Result<Fr, FieldDecodeError> {
    if bytes.len() != FIELD_SIZE {
        return Err(FieldDecodeError::BadLength(bytes.len()));
    }
    Ok(Fr::from_be_bytes_mod_order(bytes))
}

/// Encode a field element as a `0x`-prefixed big-endian hex string.
pub fn fr_to_hex(value: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_be_bytes(value)))
}

/// Decode a field element from a hex string (with or without `0x` prefix),
/// reducing mod p. Short strings are left-padded with zeros.
pub fn fr_from_hex(input: &str) -> Result<Fr, FieldDecodeError> {
    let stripped = input.strip_prefix("0x").unwrap_or(input);
    let padded = if stripped.len() % 2 == 1 {
        format!("0{stripped}")
    } else {
        stripped.to_string()
    };
    let bytes = hex::decode(padded)?;
    if bytes.len() > FIELD_SIZE {
        return Err(FieldDecodeError::BadLength(bytes.len()));
    }
    Ok(Fr::from_be_bytes_mod_order(&bytes))
}

/// Split a tally-tree leaf into its linear and quadratic components.
///
/// A leaf encodes `sum_sq + 10^24 * sum`; as long as every quadratic total
/// stays below `10^24` the two halves are recovered exactly.
pub fn decode_tally_leaf(leaf: &Fr) -> (u128, u128) {
    let value = BigUint::from_bytes_be(&fr_to_be_bytes(leaf));
    let shift = BigUint::from(10u8).pow(24);
    let sum = &value / &shift;
    let sum_sq = &value % &shift;
    (
        u128::try_from(sum).unwrap_or(u128::MAX),
        u128::try_from(sum_sq).unwrap_or(u128::MAX),
    )
}
