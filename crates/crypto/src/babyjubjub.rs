//! BabyJubJub curve operations.
//!
//! Thin layer over `ark-ed-on-bn254` pinning the protocol's conventions: the
//! prime-order base point `B8`, subgroup validation on every deserialized
//! point, and the zk-kit packed-point encoding (LE `y` bytes with the sign of
//! `x` in the top bit). The curve's base field equals the BN254 scalar field,
//! so point coordinates are used as hash inputs directly.

use ark_ec::{AffineRepr, CurveGroup, twisted_edwards::TECurveConfig};
use ark_ed_on_bn254::{EdwardsAffine, EdwardsConfig, EdwardsProjective, Fq, Fr as SubgroupScalar};
use ark_ff::{BigInteger, Field, MontFp, PrimeField};

use amaci_types::FIELD_SIZE;

/// A BabyJubJub public key is a point in the prime-order subgroup.
pub type PublicKey = EdwardsAffine;

/// Errors raised by curve-level operations.
#[derive(Debug, thiserror::Error)]
pub enum CurveError {
    /// Coordinates do not satisfy the curve equation, or the point lies
    /// outside the prime-order subgroup.
    #[error("point is not on the prime-order subgroup")]
    InvalidPoint,
    /// A packed point had no square root for its recovered `x^2`.
    #[error("packed point does not decode to a curve point")]
    InvalidPacking,
}

/// The prime-order base point `B8` (the zk-kit BabyJubJub generator,
/// eight times the full-group generator).
pub const BASE8: EdwardsAffine = EdwardsAffine::new_unchecked(
    MontFp!("5299619240641551281634865583518297030282874472190772894086521144482721001553"),
    MontFp!("16950150798460657717958625567821834550301663161624707787222815936182638968203"),
);

/// Multiply the base point `B8` by a subgroup scalar.
pub fn mul_base8(scalar: &SubgroupScalar) -> EdwardsAffine {
    (EdwardsProjective::from(BASE8) * scalar).into_affine()
}

/// Multiply an arbitrary point by a subgroup scalar.
pub fn mul_point(point: &EdwardsAffine, scalar: &SubgroupScalar) -> EdwardsAffine {
    (EdwardsProjective::from(*point) * scalar).into_affine()
}

/// Add two points.
pub fn add_points(a: &EdwardsAffine, b: &EdwardsAffine) -> EdwardsAffine {
    (EdwardsProjective::from(*a) + EdwardsProjective::from(*b)).into_affine()
}

/// Check that a point is on the curve and inside the prime-order subgroup.
///
/// The identity is rejected: no protocol value (public key, ciphertext
/// component, signature nonce) is ever the neutral element.
pub fn validate_point(point: &EdwardsAffine) -> Result<(), CurveError> {
    if point.is_zero()
        || !point.is_on_curve()
        || !point.is_in_correct_subgroup_assuming_on_curve()
    {
        return Err(CurveError::InvalidPoint);
    }
    Ok(())
}

/// Whether a base-field element is odd.
pub fn is_odd(value: &Fq) -> bool {
    value.into_bigint().is_odd()
}

/// Reduce a base-field element into the subgroup scalar field.
///
/// The subgroup order is smaller than the base field modulus, so this is a
/// plain modular reduction.
pub fn fq_to_scalar(value: &Fq) -> SubgroupScalar {
    SubgroupScalar::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

/// Lift a subgroup scalar into the base field. Always exact: the subgroup
/// order is below the base-field modulus.
pub fn scalar_to_fq(value: &SubgroupScalar) -> Fq {
    Fq::from_le_bytes_mod_order(&value.into_bigint().to_bytes_le())
}

/// Convert a base-field element into a subgroup scalar only when it already
/// lies in `[0, l)`. Used on imported signature scalars, where a value at or
/// above the order signals a malleated or garbage decryption.
pub fn fq_to_scalar_checked(value: &Fq) -> Option<SubgroupScalar> {
    let candidate = num_bigint::BigUint::from_bytes_be(&value.into_bigint().to_bytes_be());
    let order =
        num_bigint::BigUint::from_bytes_be(&SubgroupScalar::MODULUS.to_bytes_be());
    (candidate < order).then(|| fq_to_scalar(value))
}

/// Pack a point into 32 bytes: little-endian `y` with the parity of `x` in
/// the most significant bit. This is the zk-kit EdDSA-Poseidon layout.
pub fn pack_public_key(point: &EdwardsAffine) -> [u8; FIELD_SIZE] {
    let mut out = [0u8; FIELD_SIZE];
    let y_bytes = point.y.into_bigint().to_bytes_le();
    out[..y_bytes.len().min(FIELD_SIZE)].copy_from_slice(&y_bytes[..y_bytes.len().min(FIELD_SIZE)]);
    if is_odd(&point.x) {
        out[FIELD_SIZE - 1] |= 0x80;
    }
    out
}

/// Unpack a point encoded by [`pack_public_key`].
///
/// Recovers `x` from the curve equation `a*x^2 + y^2 = 1 + d*x^2*y^2` and
/// selects the root whose parity matches the packed sign bit, then validates
/// subgroup membership.
pub fn unpack_public_key(bytes: &[u8; FIELD_SIZE]) -> Result<EdwardsAffine, CurveError> {
    let mut y_bytes = *bytes;
    let x_is_odd = y_bytes[FIELD_SIZE - 1] & 0x80 != 0;
    y_bytes[FIELD_SIZE - 1] &= 0x7F;
    let y = Fq::from_le_bytes_mod_order(&y_bytes);

    // x^2 = (y^2 - 1) / (d*y^2 - a)
    let y2 = y.square();
    let denominator = EdwardsConfig::COEFF_D * y2 - EdwardsConfig::COEFF_A;
    let x2 = (y2 - Fq::ONE) * denominator.inverse().ok_or(CurveError::InvalidPacking)?;
    let mut x = x2.sqrt().ok_or(CurveError::InvalidPacking)?;
    if is_odd(&x) != x_is_odd {
        x = -x;
    }

    let point = EdwardsAffine::new_unchecked(x, y);
    validate_point(&point)?;
    Ok(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::UniformRand;

    #[test]
    fn base8_is_in_prime_subgroup() {
        validate_point(&BASE8).expect("B8 valid");
        // Multiplying by the subgroup order lands on the identity.
        let order_minus_one = -SubgroupScalar::ONE;
        let back = add_points(&mul_base8(&order_minus_one), &BASE8);
        assert!(back.is_zero());
    }

    #[test]
    fn pack_unpack_round_trip() {
        let mut rng = ark_std::test_rng();
        for _ in 0..8 {
            let scalar = SubgroupScalar::rand(&mut rng);
            let point = mul_base8(&scalar);
            let packed = pack_public_key(&point);
            let unpacked = unpack_public_key(&packed).expect("unpack");
            assert_eq!(unpacked, point);
        }
    }

    #[test]
    fn rejects_identity() {
        assert!(matches!(
            validate_point(&EdwardsAffine::zero()),
            Err(CurveError::InvalidPoint)
        ));
    }

    #[test]
    fn rejects_off_curve_point() {
        let bogus = EdwardsAffine::new_unchecked(Fq::from(3u64), Fq::from(7u64));
        assert!(matches!(
            validate_point(&bogus),
            Err(CurveError::InvalidPoint)
        ));
    }

    #[test]
    fn scalar_round_trip_through_base_field() {
        let mut rng = ark_std::test_rng();
        let scalar = SubgroupScalar::rand(&mut rng);
        assert_eq!(fq_to_scalar(&scalar_to_fq(&scalar)), scalar);
    }
}
