//! Protocol-wide constants.

use ark_bn254::Fr;

/// Field element size in bytes (BN254 scalar field).
pub const FIELD_SIZE: usize = 32;

/// Branching factor of every Merkle tree in the protocol, chosen to match the
/// five-input Poseidon permutation.
pub const TREE_DEGREE: usize = 5;

/// Order of the prime subgroup of BabyJubJub, as a decimal string.
///
/// Private scalars must lie in `[0, l)`; the keypair module enforces this on
/// generation and on every import.
pub const SUBGROUP_ORDER_DEC: &str =
    "2736030358979909402780800718157159386076813972158567259200215660948447373041";

/// Domain tag mixed into the add-new-key nullifier,
/// `nullifier = Poseidon2(secret_scalar, NULLIFIER_DOMAIN_TAG)`.
pub const NULLIFIER_DOMAIN_TAG: u128 = 1_444_992_409_218_394_441_042;

/// Salt for the operator's deterministic deactivate-ciphertext randomness,
/// `static_rand = Poseidon3(operator_sk, DEACTIVATE_KEY_SALT, active_leaf)`.
pub const DEACTIVATE_KEY_SALT: u64 = 20040;

/// Shift constant of the tally-leaf encoding: a leaf stores
/// `sum(v_i^2) + 10^24 * sum(v_i)` so one field element carries both the
/// linear and the quadratic per-option totals.
pub fn tally_shift() -> Fr {
    // 10^24 = (10^12)^2, each factor fits u64.
    let e12 = Fr::from(1_000_000_000_000u64);
    e12 * e12
}

/// Default BIP-32 derivation path for mnemonic-based keypairs (Cosmos
/// coin type 118).
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/118'/0'/0/0";
