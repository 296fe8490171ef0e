//! ElGamal odd/even encryption on BabyJubJub.
//!
//! A ciphertext hides exactly one bit: the parity of the decrypted
//! x-coordinate. The plaintext point is derived from the encryption
//! randomness by scanning consecutive scalars until the base-point multiple
//! lands on the requested parity; the distance of its x-coordinate from the
//! base value 123 is reported as `x_increment` alongside the ciphertext.
//! Decoding subtracts whatever increment the caller stores (the state leaf
//! keeps it at zero in the current protocol revision).
//!
//! Re-randomization adds an encryption of the identity, so the plaintext
//! point, and with it the parity, is invariant while the ciphertext bytes
//! change.

use ark_bn254::Fr;
use ark_ec::{AffineRepr, CurveGroup};
use ark_ed_on_bn254::{EdwardsAffine, EdwardsProjective, Fr as SubgroupScalar};
use ark_ff::Field;

use crate::babyjubjub::{CurveError, is_odd, mul_base8, validate_point};

/// Base value the auxiliary point's x-coordinate is measured against.
const X_BASE: u64 = 123;

/// Errors raised by the odd/even codec.
#[derive(Debug, thiserror::Error)]
pub enum ElGamalError {
    /// A ciphertext component is off the prime-order subgroup.
    #[error("ciphertext is not decryptable")]
    DecryptionInvalid,
    /// A key or randomness input failed curve validation.
    #[error(transparent)]
    Curve(#[from] CurveError),
}

/// An ElGamal ciphertext over BabyJubJub.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ElGamalCiphertext {
    /// `r * B8`.
    pub c1: EdwardsAffine,
    /// `r * Y + M`.
    pub c2: EdwardsAffine,
}

impl ElGamalCiphertext {
    /// The four field elements `[c1.x, c1.y, c2.x, c2.y]` in leaf order.
    pub fn as_fields(&self) -> [Fr; 4] {
        [self.c1.x, self.c1.y, self.c2.x, self.c2.y]
    }

    /// Rebuild a ciphertext from leaf fields, validating both points.
    pub fn from_fields(fields: &[Fr; 4]) -> Result<Self, ElGamalError> {
        let c1 = EdwardsAffine::new_unchecked(fields[0], fields[1]);
        let c2 = EdwardsAffine::new_unchecked(fields[2], fields[3]);
        validate_point(&c1).map_err(|_| ElGamalError::DecryptionInvalid)?;
        validate_point(&c2).map_err(|_| ElGamalError::DecryptionInvalid)?;
        Ok(Self { c1, c2 })
    }
}

/// Derive the auxiliary plaintext point for the requested parity.
///
/// Walks `seed, seed+1, ...` until `(s * B8).x` has parity `odd`; returns
/// the point and its x-increment relative to [`X_BASE`].
fn derive_parity_point(odd: bool, seed: &SubgroupScalar) -> (EdwardsAffine, Fr) {
    let mut scalar = *seed;
    loop {
        let point = mul_base8(&scalar);
        if !point.is_zero() && is_odd(&point.x) == odd {
            return (point, point.x - Fr::from(X_BASE));
        }
        scalar += SubgroupScalar::ONE;
    }
}

/// Encrypt the parity bit `odd` under `public_key` with randomness `r`.
///
/// Returns the ciphertext and the auxiliary point's x-increment.
pub fn encrypt_parity(
    odd: bool,
    public_key: &EdwardsAffine,
    randomness: &SubgroupScalar,
) -> Result<(ElGamalCiphertext, Fr), ElGamalError> {
    validate_point(public_key)?;
    let (point, x_increment) = derive_parity_point(odd, randomness);
    let c1 = mul_base8(randomness);
    let c2 = (EdwardsProjective::from(*public_key) * randomness
        + EdwardsProjective::from(point))
    .into_affine();
    Ok((ElGamalCiphertext { c1, c2 }, x_increment))
}

/// Decrypt a ciphertext to its plaintext point `M = C2 - scalar * C1`.
pub fn decrypt(
    scalar: &SubgroupScalar,
    ciphertext: &ElGamalCiphertext,
) -> Result<EdwardsAffine, ElGamalError> {
    validate_point(&ciphertext.c1).map_err(|_| ElGamalError::DecryptionInvalid)?;
    validate_point(&ciphertext.c2).map_err(|_| ElGamalError::DecryptionInvalid)?;
    let point = EdwardsProjective::from(ciphertext.c2)
        - EdwardsProjective::from(ciphertext.c1) * scalar;
    Ok(point.into_affine())
}

/// Decrypt and decode to the scalar value `M.x - x_increment`.
pub fn decrypt_value(
    scalar: &SubgroupScalar,
    ciphertext: &ElGamalCiphertext,
    x_increment: Fr,
) -> Result<Fr, ElGamalError> {
    Ok(decrypt(scalar, ciphertext)?.x - x_increment)
}

/// Decrypt and return the encoded parity bit (`true` = odd).
pub fn decrypt_parity(
    scalar: &SubgroupScalar,
    ciphertext: &ElGamalCiphertext,
    x_increment: Fr,
) -> Result<bool, ElGamalError> {
    Ok(is_odd(&decrypt_value(scalar, ciphertext, x_increment)?))
}

/// Re-randomize a ciphertext under the same public key with fresh
/// randomness; the plaintext point is preserved.
pub fn rerandomize(
    public_key: &EdwardsAffine,
    ciphertext: &ElGamalCiphertext,
    randomness: &SubgroupScalar,
) -> Result<ElGamalCiphertext, ElGamalError> {
    validate_point(public_key)?;
    validate_point(&ciphertext.c1).map_err(|_| ElGamalError::DecryptionInvalid)?;
    validate_point(&ciphertext.c2).map_err(|_| ElGamalError::DecryptionInvalid)?;
    let c1 = (EdwardsProjective::from(ciphertext.c1)
        + EdwardsProjective::from(mul_base8(randomness)))
    .into_affine();
    let c2 = (EdwardsProjective::from(ciphertext.c2)
        + EdwardsProjective::from(*public_key) * randomness)
        .into_affine();
    Ok(ElGamalCiphertext { c1, c2 })
}
