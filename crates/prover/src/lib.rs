//! Groth16 proof boundary.
//!
//! Proving itself is delegated to an external artifact-driven prover (WASM
//! witness calculator plus zkey); this crate owns everything around that
//! call: the positional circuit-input map, compressed (de)serialization of
//! proofs and verifying keys, conversion to the 256-byte uncompressed
//! EVM layout contracts consume, and verification against a prepared key.

use std::collections::BTreeMap;
use std::path::Path;

use ark_bn254::{Bn254, Fr, G1Affine, G2Affine};
use ark_ff::{BigInteger, PrimeField};
use ark_groth16::{Groth16, PreparedVerifyingKey, Proof, VerifyingKey, prepare_verifying_key};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use amaci_types::{FIELD_SIZE, fr_to_hex};

/// Errors raised at the proof boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProverError {
    /// A proof or key failed to (de)serialize.
    #[error("serialization failed: {0}")]
    Serialization(String),
    /// Verification could not be carried out.
    #[error("verification failed: {0}")]
    Verification(String),
    /// The external prover failed.
    #[error("prover failed: {0}")]
    ProverFailed(String),
}

/// Circuit input map for the external witness calculator.
///
/// Values are hex strings for BigInt compatibility; iteration order is the
/// map's key order, so a fixed naming scheme yields a stable positional
/// layout.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CircuitInputs {
    /// Input signals as name -> value(s) mapping.
    #[serde(flatten)]
    pub signals: BTreeMap<String, InputValue>,
}

/// Input value, a single field element or an array of them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    /// Single field element as a hex string.
    Single(String),
    /// Array of field elements as hex strings.
    Array(Vec<String>),
}

impl CircuitInputs {
    /// Create an empty input map.
    pub fn new() -> Self {
        Self {
            signals: BTreeMap::new(),
        }
    }

    /// Set a single field element.
    pub fn set_fr(&mut self, name: &str, value: &Fr) {
        self.signals
            .insert(name.to_string(), InputValue::Single(fr_to_hex(value)));
    }

    /// Set an array of field elements.
    pub fn set_fr_array(&mut self, name: &str, values: &[Fr]) {
        self.signals.insert(
            name.to_string(),
            InputValue::Array(values.iter().map(fr_to_hex).collect()),
        );
    }

    /// Set a nested array by flattening it row-major, the layout the
    /// witness calculator expects for matrix signals.
    pub fn set_fr_matrix(&mut self, name: &str, rows: &[Vec<Fr>]) {
        let flat: Vec<String> = rows
            .iter()
            .flat_map(|row| row.iter().map(fr_to_hex))
            .collect();
        self.signals.insert(name.to_string(), InputValue::Array(flat));
    }
}

/// A Groth16 proof as three compressed point encodings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Groth16ProofBytes {
    /// Proof point A (compressed G1).
    pub a: Vec<u8>,
    /// Proof point B (compressed G2).
    pub b: Vec<u8>,
    /// Proof point C (compressed G1).
    pub c: Vec<u8>,
}

impl Groth16ProofBytes {
    /// The full proof as concatenated bytes `A || B || C`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.a.len() + self.b.len() + self.c.len());
        bytes.extend_from_slice(&self.a);
        bytes.extend_from_slice(&self.b);
        bytes.extend_from_slice(&self.c);
        bytes
    }
}

/// The external Groth16 prover.
///
/// Implementations load the WASM witness calculator and proving key from
/// disk and run the proof; both are blocking, artifact-heavy operations the
/// caller may push onto a worker thread. The core never suspends elsewhere.
#[async_trait]
pub trait ProofGenerator {
    /// Produce a proof for `inputs` with the artifacts at the given paths.
    async fn full_prove(
        &self,
        inputs: &CircuitInputs,
        wasm_path: &Path,
        zkey_path: &Path,
    ) -> Result<Groth16ProofBytes, ProverError>;
}

/// Converts a BigInteger to a 32-byte big-endian representation.
fn bigint_to_be_32<B: BigInteger>(value: B) -> [u8; FIELD_SIZE] {
    let bytes = value.to_bytes_be();
    let mut out = [0u8; FIELD_SIZE];
    let start = FIELD_SIZE.saturating_sub(bytes.len());
    out[start..].copy_from_slice(&bytes[..bytes.len().min(FIELD_SIZE)]);
    out
}

/// A G1 point as 64 uncompressed big-endian bytes, `x || y`.
fn g1_bytes_uncompressed(point: &G1Affine) -> [u8; 64] {
    let mut out = [0u8; 64];
    out[..32].copy_from_slice(&bigint_to_be_32(point.x.into_bigint()));
    out[32..].copy_from_slice(&bigint_to_be_32(point.y.into_bigint()));
    out
}

/// A G2 point as 128 uncompressed bytes in EVM ordering:
/// `x.c1 || x.c0 || y.c1 || y.c0` (imaginary before real, 32 bytes each).
fn g2_bytes_uncompressed(point: &G2Affine) -> [u8; 128] {
    let mut out = [0u8; 128];
    out[..32].copy_from_slice(&bigint_to_be_32(point.x.c1.into_bigint()));
    out[32..64].copy_from_slice(&bigint_to_be_32(point.x.c0.into_bigint()));
    out[64..96].copy_from_slice(&bigint_to_be_32(point.y.c1.into_bigint()));
    out[96..].copy_from_slice(&bigint_to_be_32(point.y.c0.into_bigint()));
    out
}

/// Converts a proof to the 256-byte uncompressed affine triple
/// `A (64) || B (128) || C (64)` on-chain verifiers consume.
pub fn proof_to_uncompressed_bytes(proof: &Proof<Bn254>) -> Vec<u8> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(&g1_bytes_uncompressed(&proof.a));
    out.extend_from_slice(&g2_bytes_uncompressed(&proof.b));
    out.extend_from_slice(&g1_bytes_uncompressed(&proof.c));
    out
}

/// Deserialize a compressed proof `A || B || C`.
pub fn proof_from_bytes(bytes: &[u8]) -> Result<Proof<Bn254>, ProverError> {
    Proof::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ProverError::Serialization(format!("proof: {e}")))
}

/// Serialize a proof into the compressed wire form.
pub fn proof_to_bytes(proof: &Proof<Bn254>) -> Result<Groth16ProofBytes, ProverError> {
    let mut a = Vec::new();
    proof
        .a
        .serialize_compressed(&mut a)
        .map_err(|e| ProverError::Serialization(format!("A: {e}")))?;
    let mut b = Vec::new();
    proof
        .b
        .serialize_compressed(&mut b)
        .map_err(|e| ProverError::Serialization(format!("B: {e}")))?;
    let mut c = Vec::new();
    proof
        .c
        .serialize_compressed(&mut c)
        .map_err(|e| ProverError::Serialization(format!("C: {e}")))?;
    Ok(Groth16ProofBytes { a, b, c })
}

/// Deserialize and prepare a compressed verifying key.
pub fn prepared_vk_from_bytes(
    bytes: &[u8],
) -> Result<PreparedVerifyingKey<Bn254>, ProverError> {
    let vk = VerifyingKey::<Bn254>::deserialize_compressed(bytes)
        .map_err(|e| ProverError::Serialization(format!("vk: {e}")))?;
    Ok(prepare_verifying_key(&vk))
}

/// Verify a proof against a prepared key and its public inputs.
pub fn verify(
    pvk: &PreparedVerifyingKey<Bn254>,
    proof: &Proof<Bn254>,
    public_inputs: &[Fr],
) -> Result<bool, ProverError> {
    Groth16::<Bn254>::verify_proof(pvk, proof, public_inputs)
        .map_err(|e| ProverError::Verification(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_ec::AffineRepr;

    fn sample_proof() -> Proof<Bn254> {
        Proof {
            a: G1Affine::generator(),
            b: G2Affine::generator(),
            c: G1Affine::generator(),
        }
    }

    #[test]
    fn compressed_round_trip() {
        let proof = sample_proof();
        let bytes = proof_to_bytes(&proof).expect("serialize").to_bytes();
        let back = proof_from_bytes(&bytes).expect("deserialize");
        assert_eq!(back, proof);
    }

    #[test]
    fn uncompressed_layout_is_256_bytes_evm_ordered() {
        let proof = sample_proof();
        let bytes = proof_to_uncompressed_bytes(&proof);
        assert_eq!(bytes.len(), 256);

        // A.x occupies the first 32 bytes big-endian.
        assert_eq!(
            bytes[..32],
            bigint_to_be_32(proof.a.x.into_bigint())
        );
        // B.x.c1 (imaginary) precedes B.x.c0 (real).
        assert_eq!(
            bytes[64..96],
            bigint_to_be_32(proof.b.x.c1.into_bigint())
        );
        assert_eq!(
            bytes[96..128],
            bigint_to_be_32(proof.b.x.c0.into_bigint())
        );
    }

    #[test]
    fn garbage_proof_bytes_are_rejected() {
        assert!(matches!(
            proof_from_bytes(&[0u8; 16]),
            Err(ProverError::Serialization(_))
        ));
    }

    #[test]
    fn circuit_inputs_serialize_flat() {
        let mut inputs = CircuitInputs::new();
        inputs.set_fr("inputHash", &Fr::from(7u64));
        inputs.set_fr_array("msgs", &[Fr::from(1u64), Fr::from(2u64)]);
        inputs.set_fr_matrix(
            "paths",
            &[vec![Fr::from(3u64)], vec![Fr::from(4u64)]],
        );

        let json = serde_json::to_value(&inputs).expect("serialize");
        assert!(json.get("inputHash").is_some());
        assert_eq!(
            json.get("msgs")
                .and_then(|v| v.as_array())
                .map(|a| a.len()),
            Some(2)
        );
        assert_eq!(
            json.get("paths")
                .and_then(|v| v.as_array())
                .map(|a| a.len()),
            Some(2)
        );
    }
}
