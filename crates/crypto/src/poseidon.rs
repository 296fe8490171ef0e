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
pub fn hash_up_to(width: usize, inputs: &[Fr]) -> Result<Fr, HashError> {
    if !(2..=5).contains(&width) {
        return Err(HashError::UnsupportedWidth(width));
    }
    if inputs.len() > width {
        return Err(HashError::TooManyInputs {
            width,
            got: inputs.len(),
        });
    }
    let mut padded = vec![Fr::ZERO; width];
    padded[..inputs.len()].copy_from_slice(inputs);
    Ok(fixed_hash(&padded))
}

/// Poseidon hash of two field elements.
pub fn hash2(a: Fr, b: Fr) -> Fr {
    fixed_hash(&[a, b])
}

/// Poseidon hash of three field elements.
pub fn hash3(inputs: &[Fr; 3]) -> Fr {
    fixed_hash(inputs)
}

/// Poseidon hash of four field elements.
pub fn hash4(inputs: &[Fr; 4]) -> Fr {
    fixed_hash(inputs)
}

/// Poseidon hash of five field elements.
pub fn hash5(inputs: &[Fr; 5]) -> Fr {
    fixed_hash(inputs)
}

/// Hash of ten field elements as `hash2(hash5(lo), hash5(hi))`, the state
/// leaf digest shape.
pub fn hash10(inputs: &[Fr; 10]) -> Fr {
    let lo: [Fr; 5] = inputs[..5].try_into().expect("slice of 5");
    let hi: [Fr; 5] = inputs[5..].try_into().expect("slice of 5");
    hash2(hash5(&lo), hash5(&hi))
}

/// EVM-packed public input hash: `SHA-256(be_u256(x_0) || ... ) mod p`.
pub fn compute_input_hash(inputs: &[Fr]) -> Fr {
    let mut hasher = Sha256::new();
    for input in inputs {
        hasher.update(fr_to_be_bytes(input));
    }
    Fr::from_be_bytes_mod_order(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::UniformRand;
    use light_poseidon::{Poseidon, PoseidonHasher};
    use std::str::FromStr;

    #[test]
    fn matches_circomlib_vector() {
        // poseidon([1, 2]) from the circomlibjs reference tests.
        let expected = Fr::from_str(
            "7853200120776062878684798364095072458815029376092732009249414926327459813530",
        )
        .expect("decimal literal");
        assert_eq!(hash2(Fr::from(1u64), Fr::from(2u64)), expected);
    }

    #[test]
    fn matches_light_poseidon_for_every_width() {
        let mut rng = ark_std::test_rng();
        for n in 2..=5usize {
            let inputs: Vec<Fr> = (0..n).map(|_| Fr::rand(&mut rng)).collect();
            let mut reference = Poseidon::<Fr>::new_circom(n).expect("hasher");
            let expected = reference.hash(&inputs).expect("hash");
            assert_eq!(hash_n(&inputs).expect("hash_n"), expected, "width {n}");
        }
    }

    #[test]
    fn rejects_unsupported_widths() {
        assert!(matches!(
            hash_n(&[Fr::from(1u64)]),
            Err(HashError::UnsupportedWidth(1))
        ));
        let six = vec![Fr::ZERO; 6];
        assert!(matches!(
            hash_n(&six),
            Err(HashError::UnsupportedWidth(6))
        ));
    }

    #[test]
    fn hash_up_to_pads_with_zeros() {
        let a = Fr::from(9u64);
        let padded = hash_up_to(5, &[a]).expect("padded hash");
        assert_eq!(padded, hash5(&[a, Fr::ZERO, Fr::ZERO, Fr::ZERO, Fr::ZERO]));
        assert!(matches!(
            hash_up_to(2, &[a, a, a]),
            Err(HashError::TooManyInputs { width: 2, got: 3 })
        ));
    }

    #[test]
    fn hash10_is_the_two_level_fold() {
        let inputs: [Fr; 10] = core::array::from_fn(|i| Fr::from(i as u64));
        let lo: [Fr; 5] = inputs[..5].try_into().expect("lo");
        let hi: [Fr; 5] = inputs[5..].try_into().expect("hi");
        assert_eq!(hash10(&inputs), hash2(hash5(&lo), hash5(&hi)));
    }

    #[test]
    fn input_hash_matches_manual_packing() {
        use sha2::{Digest, Sha256};
        let inputs = [Fr::from(1u64), Fr::from(2u64)];
        let mut manual = [0u8; 64];
        manual[31] = 1;
        manual[63] = 2;
        let digest = Sha256::digest(manual);
        assert_eq!(
            compute_input_hash(&inputs),
            Fr::from_be_bytes_mod_order(&digest)
        );
    }
}
