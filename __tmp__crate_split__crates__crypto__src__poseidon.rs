//! Circom-compatible Poseidon hashing over the BN254 scalar field.
//!
//! `hashN` for `N in 2..=5` runs the width-`N+1` Poseidon permutation with a
//! zero domain tag, inputs in lanes `1..`, and the first output lane as the
//! digest, which is exactly the circomlib convention. The permutation itself
//! is exposed crate-internally so the Poseidon duplex cipher can drive it
//! with a full state.
//!
//! `compute_input_hash` is the EVM-packed public-input hash: SHA-256 over the
//! concatenated big-endian 32-byte encodings, reduced mod p. It must remain
//! bit-exact with `sha256(abi.encodePacked(uint256[]))` because on-chain
//! verifiers recompute it.

use std::sync::OnceLock;

use ark_bn254::Fr;
use ark_ff::{Field, PrimeField};
use light_poseidon::{PoseidonParameters, parameters::bn254_x5::get_poseidon_parameters};
use sha2::{Digest, Sha256};

use amaci_types::fr_to_be_bytes;

/// Errors raised by the variable-width hash entry points.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// `hash_n` only supports 2 to 5 inputs.
    #[error("unsupported poseidon input count {0}")]
    UnsupportedWidth(usize),
    /// `hash_up_to` received more inputs than the requested width.
    #[error("got {got} inputs for a width-{width} hash")]
    TooManyInputs {
        /// Requested width.
        width: usize,
        /// Provided input count.
        got: usize,
    },
}

/// Smallest permutation width used by the protocol (hash2).
const MIN_WIDTH: usize = 3;
/// Largest permutation width used by the protocol (hash5).
const MAX_WIDTH: usize = 6;

/// Parameter table for one permutation width, built once per process from
/// the circom-compatible constants shipped with `light-poseidon`.
pub(crate) fn parameters(width: usize) -> &'static PoseidonParameters<Fr> {
    const SLOTS: usize = MAX_WIDTH - MIN_WIDTH + 1;
    static CACHE: [OnceLock<PoseidonParameters<Fr>>; SLOTS] =
        [const { OnceLock::new() }; SLOTS];
    debug_assert!((MIN_WIDTH..=MAX_WIDTH).contains(&width), "width {width}");
    CACHE[width - MIN_WIDTH].get_or_init(|| {
        get_poseidon_parameters::<Fr>(u8::try_from(width).expect("width <= 6"))
            .expect("static circom parameter table is well-formed")
    })
}

/// Run the Poseidon permutation in place over `state.len()` lanes.
///
/// Round schedule: half of the full rounds, all partial rounds (S-box on lane
/// 0 only), then the remaining full rounds; every round adds the round
/// constants and applies the MDS matrix.
pub(crate) fn permute(state: &mut [Fr]) {
    let params = parameters(state.len());
    let width = params.width;
    let half_full = params.full_rounds / 2;
    let total = params.full_rounds + params.partial_rounds;

    for round in 0..total {
        for (lane, value) in state.iter_mut().enumerate() {
            *value += params.ark[round * width + lane];
        }

        let full_round = round < half_full || round >= half_full + params.partial_rounds;
        if full_round {
            for value in state.iter_mut() {
                *value = value.pow([params.alpha]);
            }
        } else {
            state[0] = state[0].pow([params.alpha]);
        }

        let previous = state.to_vec();
        for (row, value) in state.iter_mut().enumerate() {
            *value = params.mds[row]
                .iter()
                .zip(previous.iter())
                .map(|(m, s)| *m * s)
                .sum();
        }
    }
}

/// Hash with the width fixed by the caller; `inputs.len()` must be 2..=5.
fn fixed_hash(inputs: &[Fr]) -> Fr {
    let mut state = vec![Fr::ZERO; inputs.len() + 1];
    state[1..].copy_from_slice(inputs);
    permute(&mut state);
    state[0]
}

/// Poseidon hash of `N` field elements for `N in 2..=5`.
pub fn hash_n(inputs: &[Fr]) -> Result<Fr, HashError> {
    if !(2..=5).contains(&inputs.len()) {
        return Err(HashError::UnsupportedWidth(inputs.len()));
    }
    Ok(fixed_hash(inputs))
}

/// Zero-pad `inputs` on the right to `width` elements and hash; fails when
/// more than `width` inputs are supplied.
pub fn hash_up_to