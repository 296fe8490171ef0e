//! EdDSA-Poseidon keypairs on BabyJubJub.
//!
//! A keypair holds the raw secret (a BN254 field element), the derived
//! subgroup scalar used for every point multiplication, and the public key
//! `scalar * B8`. Secret-scalar derivation expands the secret through a
//! 64-byte BLAKE3 XOF, clamps the low half RFC-8032 style and shifts out the
//! cofactor bits, which keeps every derived scalar strictly below the
//! subgroup order; the bound is still re-checked explicitly because colliding
//! public keys are exactly the failure mode the check exists to rule out.
//!
//! Signatures are EdDSA with a Poseidon challenge,
//! `hm = Poseidon5(R8.x, R8.y, pk.x, pk.y, msg)`, verified as
//! `S * B8 == R8 + hm * pk`. Both sides live in the prime-order subgroup
//! because every point is a `B8` multiple, so no cofactor scaling appears
//! in the equation.

use ark_bn254::Fr;
use ark_ed_on_bn254::{EdwardsAffine, EdwardsProjective, Fr as SubgroupScalar};
use ark_ff::{BigInteger, PrimeField, UniformRand};
use ark_std::rand::Rng;
use hmac::{Hmac, Mac};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use num_bigint::BigUint;
use sha2::Sha512;
use zeroize::Zeroize;

use amaci_types::fr_to_be_bytes;

use crate::babyjubjub::{
    CurveError, fq_to_scalar, mul_base8, mul_point, validate_point,
};
use crate::poseidon;

/// Hardened-derivation marker bit of a BIP-32 path segment.
const HARDENED: u32 = 0x8000_0000;

/// Errors raised by keypair construction and use.
#[derive(Debug, thiserror::Error)]
pub enum KeypairError {
    /// Secret bytes did not form a usable key.
    #[error("invalid secret key material")]
    InvalidSecret,
    /// A derived scalar fell outside the subgroup order.
    #[error("secret scalar out of subgroup range")]
    OutOfRange,
    /// The BIP-32 derivation path could not be parsed.
    #[error("invalid derivation path `{0}`")]
    InvalidDerivationPath(String),
    /// The BIP-39 mnemonic was rejected.
    #[error("invalid mnemonic: {0}")]
    Mnemonic(#[from] bip39::Error),
    /// A curve-level check failed.
    #[error(transparent)]
    Curve(#[from] CurveError),
    /// The self-check signature did not verify.
    #[error("keypair failed its signature self-check")]
    InvalidSignature,
}

/// An EdDSA-Poseidon signature: the nonce point and the response scalar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    /// Nonce point `r * B8`.
    pub r8: EdwardsAffine,
    /// Response scalar `r + hm * scalar`, reduced mod the subgroup order.
    pub s: SubgroupScalar,
}

/// A BabyJubJub keypair.
#[derive(Clone)]
pub struct Keypair {
    secret: Fr,
    scalar: SubgroupScalar,
    public: EdwardsAffine,
}

impl Keypair {
    /// Generate a keypair from fresh randomness.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Result<Self, KeypairError> {
        Self::from_secret(Fr::rand(rng))
    }

    /// Build a keypair from an existing secret field element.
    pub fn from_secret(secret: Fr) -> Result<Self, KeypairError> {
        let scalar = derive_secret_scalar(&secret)?;
        let public = mul_base8(&scalar);
        Ok(Self {
            secret,
            scalar,
            public,
        })
    }

    /// Build a keypair from a big-endian hex secret (with or without a
    /// `0x` prefix).
    pub fn from_secret_hex(secret: &str) -> Result<Self, KeypairError> {
        let secret =
            amaci_types::fr_from_hex(secret).map_err(|_| KeypairError::InvalidSecret)?;
        Self::from_secret(secret)
    }

    /// Derive a keypair from a BIP-39 mnemonic through BIP-32 at `path`
    /// (e.g. `m/44'/118'/0'/0/0`). The 32-byte child key is interpreted
    /// big-endian and reduced into the field.
    pub fn from_mnemonic(
        phrase: &str,
        passphrase: &str,
        path: &str,
    ) -> Result<Self, KeypairError> {
        let mnemonic = bip39::Mnemonic::parse_normalized(phrase)?;
        let mut seed = mnemonic.to_seed_normalized(passphrase);
        let child = derive_hd_key(&seed, path);
        seed.zeroize();
        let child =
            child.ok_or_else(|| KeypairError::InvalidDerivationPath(path.to_string()))?;
        Self::from_secret(Fr::from_be_bytes_mod_order(&child))
    }

    /// Run a sign/verify round trip over a fixed message, confirming the
    /// keypair is internally consistent.
    pub fn validated(self) -> Result<Self, KeypairError> {
        let probe = Fr::from(u64::from_be_bytes(*b"amaci\0\0\0"));
        if !verify(&self.public, probe, &self.sign(probe)) {
            return Err(KeypairError::InvalidSignature);
        }
        Ok(self)
    }

    /// The raw secret field element. Kept only for signing and for the
    /// operator's deterministic randomness derivation.
    pub fn secret(&self) -> Fr {
        self.secret
    }

    /// The derived subgroup scalar; always in `[0, l)`.
    pub fn secret_scalar(&self) -> SubgroupScalar {
        self.scalar
    }

    /// The public key `scalar * B8`.
    pub fn public_key(&self) -> EdwardsAffine {
        self.public
    }

    /// Sign a field-element message.
    pub fn sign(&self, message: Fr) -> Signature {
        let mut expanded = expand_secret(&self.secret);

        // Deterministic nonce from the upper expansion half and the message;
        // 512-bit reduction keeps the distribution unbiased.
        let mut hasher = blake3::Hasher::new();
        hasher.update(&expanded[32..]);
        hasher.update(&fr_to_be_bytes(&message));
        let mut nonce_bytes = [0u8; 64];
        hasher.finalize_xof().fill(&mut nonce_bytes);
        let r = SubgroupScalar::from_be_bytes_mod_order(&nonce_bytes);
        expanded.zeroize();
        nonce_bytes.zeroize();

        let r8 = mul_base8(&r);
        let hm = poseidon::hash5(&[r8.x, r8.y, self.public.x, self.public.y, message]);
        let s = r + fq_to_scalar(&hm) * self.scalar;
        Signature { r8, s }
    }

    /// ECDH shared point `scalar * other`.
    pub fn ecdh(&self, other: &EdwardsAffine) -> Result<EdwardsAffine, KeypairError> {
        validate_point(other)?;
        Ok(mul_point(other, &self.scalar))
    }

    /// Poseidon hash of the ECDH shared point, used as the private lookup
    /// tag on deactivate leaves.
    pub fn shared_key_hash(&self, other: &EdwardsAffine) -> Result<Fr, KeypairError> {
        let shared = self.ecdh(other)?;
        Ok(poseidon::hash2(shared.x, shared.y))
    }
}

/// Verify an EdDSA-Poseidon signature.
///
/// Checks subgroup membership of both points (the response scalar is in
/// range by construction of its type) and the equation
/// `S * B8 == R8 + hm * pk`. Every protocol point is a `B8` multiple, so
/// the cofactor is already cleared on both sides and no extra scaling is
/// needed.
pub fn verify(public_key: &EdwardsAffine, message: Fr, signature: &Signature) -> bool {
    if validate_point(public_key).is_err() || validate_point(&signature.r8).is_err() {
        return false;
    }
    let hm = poseidon::hash5(&[
        signature.r8.x,
        signature.r8.y,
        public_key.x,
        public_key.y,
        message,
    ]);
    let challenge = fq_to_scalar(&hm);
    let lhs = EdwardsProjective::from(mul_base8(&signature.s));
    let rhs = EdwardsProjective::from(signature.r8)
        + EdwardsProjective::from(*public_key) * challenge;
    lhs == rhs
}

/// Expand a secret into 64 bytes through the BLAKE3 XOF.
fn expand_secret(secret: &Fr) -> [u8; 64] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&fr_to_be_bytes(secret));
    let mut out = [0u8; 64];
    hasher.finalize_xof().fill(&mut out);
    out
}

/// Derive the subgroup scalar for a secret: clamp the low expansion half,
/// drop the three cofactor bits, and enforce the subgroup bound.
fn derive_secret_scalar(secret: &Fr) -> Result<SubgroupScalar, KeypairError> {
    let mut expanded = expand_secret(secret);
    let mut buf: [u8; 32] = expanded[..32].try_into().expect("64-byte expansion");
    buf[0] &= 0xF8;
    buf[31] &= 0x7F;
    buf[31] |= 0x40;
    let pruned = BigUint::from_bytes_le(&buf) >> 3u32;
    expanded.zeroize();
    buf.zeroize();
    ensure_in_subgroup(&pruned)?;
    Ok(SubgroupScalar::from_le_bytes_mod_order(&pruned.to_bytes_le()))
}

/// Enforce `value < l`. A scalar at or above the subgroup order would alias
/// another key's public point.
fn ensure_in_subgroup(value: &BigUint) -> Result<(), KeypairError> {
    let order = BigUint::from_bytes_be(
        &SubgroupScalar::MODULUS.to_bytes_be(),
    );
    if value >= &order {
        return Err(KeypairError::OutOfRange);
    }
    Ok(())
}

/// BIP-32 child-key derivation over secp256k1.
///
/// Returns `None` only on the (negligible) invalid-key branches the BIP-32
/// specification reserves.
fn derive_hd_key(seed: &[u8], path: &str) -> Option<[u8; 32]> {
    type HmacSha512 = Hmac<Sha512>;

    let mut mac =
        HmacSha512::new_from_slice(b"Bitcoin seed").expect("hmac accepts any key length");
    mac.update(seed);
    let digest = mac.finalize().into_bytes();
    let mut key: [u8; 32] = digest[..32].try_into().expect("64-byte digest");
    let mut chain_code: [u8; 32] = digest[32..].try_into().expect("64-byte digest");

    for segment in parse_derivation_path(path)? {
        let mut mac =
            HmacSha512::new_from_slice(&chain_code).expect("hmac accepts any key length");
        if segment & HARDENED != 0 {
            mac.update(&[0u8]);
            mac.update(&key);
        } else {
            let parent = k256::SecretKey::from_slice(&key).ok()?;
            mac.update(parent.public_key().to_encoded_point(true).as_bytes());
        }
        mac.update(&segment.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let tweak = k256::SecretKey::from_slice(&digest[..32]).ok()?;
        let parent = k256::SecretKey::from_slice(&key).ok()?;
        let child = *tweak.to_nonzero_scalar() + *parent.to_nonzero_scalar();
        let child_bytes: [u8; 32] = child.to_bytes().into();
        if child_bytes == [0u8; 32] {
            return None;
        }
        key = child_bytes;
        chain_code = digest[32..].try_into().expect("64-byte digest");
    }
    Some(key)
}

/// Parse `m/44'/118'/0'/0/0`-style paths; `'` or `h` marks a hardened
/// segment.
fn parse_derivation_path(path: &str) -> Option<Vec<u32>> {
    let mut parts = path.split('/');
    if parts.next() != Some("m") {
        return None;
    }
    parts
        .map(|segment| {
            let (digits, hardened) = match segment
                .strip_suffix('\'')
                .or_else(|| segment.strip_suffix('h'))
            {
                Some(stripped) => (stripped, true),
                None => (segment, false),
            };
            let index: u32 = digits.parse().ok()?;
            if index >= HARDENED {
                return None;
            }
            Some(if hardened { index | HARDENED } else { index })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaci_types::DEFAULT_DERIVATION_PATH;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn sign_and_verify_round_trip() {
        let mut rng = ark_std::test_rng();
        let keypair = Keypair::random(&mut rng).expect("keypair");
        let message = Fr::from(42u64);
        let signature = keypair.sign(message);
        assert!(verify(&keypair.public_key(), message, &signature));

        // Wrong message.
        assert!(!verify(&keypair.public_key(), Fr::from(43u64), &signature));

        // Wrong key.
        let other = Keypair::random(&mut rng).expect("keypair");
        assert!(!verify(&other.public_key(), message, &signature));
    }

    #[test]
    fn signing_is_deterministic() {
        let keypair = Keypair::from_secret(Fr::from(7u64)).expect("keypair");
        let message = Fr::from(9u64);
        assert_eq!(keypair.sign(message), keypair.sign(message));
    }

    #[test]
    fn subgroup_order_constant_matches_the_curve() {
        let order = BigUint::from_bytes_be(&SubgroupScalar::MODULUS.to_bytes_be());
        assert_eq!(
            order.to_str_radix(10),
            amaci_types::SUBGROUP_ORDER_DEC
        );
    }

    #[test]
    fn secret_scalar_is_below_subgroup_order() {
        let mut rng = ark_std::test_rng();
        for _ in 0..16 {
            let keypair = Keypair::random(&mut rng).expect("keypair");
            let value = BigUint::from_bytes_be(
                &keypair.secret_scalar().into_bigint().to_bytes_be(),
            );
            ensure_in_subgroup(&value).expect("scalar in range");
        }
    }

    #[test]
    fn hex_import_matches_field_import() {
        let keypair = Keypair::from_secret(Fr::from(0xabcdefu64)).expect("keypair");
        let from_hex = Keypair::from_secret_hex("0xabcdef").expect("keypair");
        assert_eq!(keypair.public_key(), from_hex.public_key());
    }

    #[test]
    fn mnemonic_derivation_is_deterministic() {
        let a = Keypair::from_mnemonic(TEST_MNEMONIC, "", DEFAULT_DERIVATION_PATH)
            .expect("keypair");
        let b = Keypair::from_mnemonic(TEST_MNEMONIC, "", DEFAULT_DERIVATION_PATH)
            .expect("keypair");
        assert_eq!(a.public_key(), b.public_key());

        // A different account index lands on a different key.
        let c = Keypair::from_mnemonic(TEST_MNEMONIC, "", "m/44'/118'/0'/0/1")
            .expect("keypair");
        assert_ne!(a.public_key(), c.public_key());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(parse_derivation_path("44'/118'").is_none());
        assert!(parse_derivation_path("m/44x'/0").is_none());
        assert!(parse_derivation_path("m/2147483648").is_none());
        assert_eq!(
            parse_derivation_path("m/44'/118'/0'/0/0").expect("path"),
            vec![44 | HARDENED, 118 | HARDENED, HARDENED, 0, 0]
        );
    }

    #[test]
    fn ecdh_is_symmetric() {
        let mut rng = ark_std::test_rng();
        let a = Keypair::random(&mut rng).expect("keypair");
        let b = Keypair::random(&mut rng).expect("keypair");
        let ab = a.ecdh(&b.public_key()).expect("ecdh");
        let ba = b.ecdh(&a.public_key()).expect("ecdh");
        assert_eq!(ab, ba);
        assert_eq!(
            a.shared_key_hash(&b.public_key()).expect("hash"),
            b.shared_key_hash(&a.public_key()).expect("hash")
        );
    }

    #[test]
    fn validated_accepts_fresh_keypair() {
        let mut rng = ark_std::test_rng();
        Keypair::random(&mut rng)
            .expect("keypair")
            .validated()
            .expect("self-check");
    }
}
