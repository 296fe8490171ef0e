//! Packed-command codec.
//!
//! A command fits its integer fields into one field element through fixed
//! bit slices (`nonce:32 | state_idx:32 | vo_idx:32 | new_votes:96 |
//! salt:56`, 248 bits total), signs `Poseidon3(packed, new_pk.x, new_pk.y)`
//! and travels as the 6-tuple `[packed, new_pk.x, new_pk.y, R8.x, R8.y, S]`
//! under the Poseidon cipher. The pair `(0, 0)` in the public-key lanes is a
//! sentinel meaning "no key rotation on this command", so those lanes are
//! carried as raw coordinates rather than a validated curve point.

use ark_bn254::Fr;
use ark_ed_on_bn254::EdwardsAffine;
use ark_ff::{BigInteger, Field, PrimeField, Zero};
use ark_std::UniformRand;
use ark_std::rand::Rng;
use num_bigint::BigUint;

use crate::babyjubjub::{fq_to_scalar_checked, scalar_to_fq, validate_point};
use crate::cipher;
use crate::keypair::{Keypair, Signature, verify};
use crate::poseidon;

/// Bit widths of the packed slices, low to high.
const NONCE_BITS: u32 = 32;
const STATE_IDX_BITS: u32 = 32;
const VO_IDX_BITS: u32 = 32;
const NEW_VOTES_BITS: u32 = 96;
const SALT_BITS: u32 = 56;

/// Errors raised while packing command fields.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A field does not fit its bit slice.
    #[error("{field} does not fit in {bits} bits")]
    FieldOverflow {
        /// Name of the offending slice.
        field: &'static str,
        /// Width of the slice.
        bits: u32,
    },
}

/// The integer fields of a command before packing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackedCommand {
    /// Replay counter; must be the state leaf's nonce plus one.
    pub nonce: u32,
    /// Target state-leaf index.
    pub state_idx: u32,
    /// Target vote-option index.
    pub vo_idx: u32,
    /// New cumulative weight for the option; at most 96 bits.
    pub new_votes: u128,
    /// Blinding salt; at most 56 bits.
    pub salt: u64,
}

impl PackedCommand {
    /// Build a command with a freshly drawn 56-bit salt.
    pub fn with_random_salt<R: Rng + ?Sized>(
        nonce: u32,
        state_idx: u32,
        vo_idx: u32,
        new_votes: u128,
        rng: &mut R,
    ) -> Self {
        Self {
            nonce,
            state_idx,
            vo_idx,
            new_votes,
            salt: u64::rand(rng) & ((1u64 << SALT_BITS) - 1),
        }
    }

    /// Pack the fields into a single field element.
    pub fn pack(&self) -> Result<Fr, CommandError> {
        if self.new_votes >> NEW_VOTES_BITS != 0 {
            return Err(CommandError::FieldOverflow {
                field: "new_votes",
                bits: NEW_VOTES_BITS,
            });
        }
        if self.salt >> SALT_BITS != 0 {
            return Err(CommandError::FieldOverflow {
                field: "salt",
                bits: SALT_BITS,
            });
        }
        let mut packed = BigUint::from(self.nonce);
        packed |= BigUint::from(self.state_idx) << NONCE_BITS;
        packed |= BigUint::from(self.vo_idx) << (NONCE_BITS + STATE_IDX_BITS);
        packed |= BigUint::from(self.new_votes)
            << (NONCE_BITS + STATE_IDX_BITS + VO_IDX_BITS);
        packed |= BigUint::from(self.salt)
            << (NONCE_BITS + STATE_IDX_BITS + VO_IDX_BITS + NEW_VOTES_BITS);
        Ok(Fr::from_le_bytes_mod_order(&packed.to_bytes_le()))
    }

    /// Extract the fields from a packed element. Slices are masked out of
    /// the low 248 bits; anything above is ignored.
    pub fn unpack(packed: &Fr) -> Self {
        let value = BigUint::from_bytes_be(&packed.into_bigint().to_bytes_be());
        let mask = |bits: u32| (BigUint::from(1u8) << bits) - 1u8;
        let slice = |shift: u32, bits: u32| (&value >> shift) & mask(bits);
        Self {
            nonce: u32::try_from(slice(0, NONCE_BITS)).expect("32-bit slice"),
            state_idx: u32::try_from(slice(NONCE_BITS, STATE_IDX_BITS))
                .expect("32-bit slice"),
            vo_idx: u32::try_from(slice(NONCE_BITS + STATE_IDX_BITS, VO_IDX_BITS))
                .expect("32-bit slice"),
            new_votes: u128::try_from(slice(
                NONCE_BITS + STATE_IDX_BITS + VO_IDX_BITS,
                NEW_VOTES_BITS,
            ))
            .expect("96-bit slice"),
            salt: u64::try_from(slice(
                NONCE_BITS + STATE_IDX_BITS + VO_IDX_BITS + NEW_VOTES_BITS,
                SALT_BITS,
            ))
            .expect("56-bit slice"),
        }
    }
}

/// A decrypted, signed command.
#[derive(Clone, Copy, Debug)]
pub struct Command {
    packed_field: Fr,
    /// Decoded integer fields.
    pub packed: PackedCommand,
    /// Raw new-public-key coordinates; `(0, 0)` means no rotation.
    pub new_pub_key: (Fr, Fr),
    /// The voter's signature over the message hash.
    pub signature: Signature,
}

impl Command {
    /// Sign a command with the voter's key. `new_pub_key` is carried
    /// verbatim, including the `(0, 0)` sentinel.
    pub fn sign(
        packed: PackedCommand,
        new_pub_key: (Fr, Fr),
        signer: &Keypair,
    ) -> Result<Self, CommandError> {
        let packed_field = packed.pack()?;
        let signature =
            signer.sign(poseidon::hash3(&[packed_field, new_pub_key.0, new_pub_key.1]));
        Ok(Self {
            packed_field,
            packed,
            new_pub_key,
            signature,
        })
    }

    /// The signed message hash `Poseidon3(packed, new_pk.x, new_pk.y)`.
    pub fn msg_hash(&self) -> Fr {
        poseidon::hash3(&[self.packed_field, self.new_pub_key.0, self.new_pub_key.1])
    }

    /// The packed field element as it travels in the plaintext.
    pub fn packed_field(&self) -> Fr {
        self.packed_field
    }

    /// Whether the command carries the no-rotation sentinel.
    pub fn keeps_key(&self) -> bool {
        self.new_pub_key.0.is_zero() && self.new_pub_key.1.is_zero()
    }

    /// Verify the signature against a state public key.
    pub fn verify_signature(&self, public_key: &EdwardsAffine) -> bool {
        verify(public_key, self.msg_hash(), &self.signature)
    }

    /// Encrypt under the ECDH shared point into seven field elements.
    pub fn encrypt(&self, shared_key: &EdwardsAffine) -> [Fr; 7] {
        let plaintext = [
            self.packed_field,
            self.new_pub_key.0,
            self.new_pub_key.1,
            self.signature.r8.x,
            self.signature.r8.y,
            scalar_to_fq(&self.signature.s),
        ];
        cipher::encrypt(&plaintext, (shared_key.x, shared_key.y), Fr::ZERO)
            .try_into()
            .expect("6-element plaintext encrypts to 7")
    }

    /// Decrypt a message ciphertext.
    ///
    /// Returns `None` when the cipher rejects the ciphertext or the
    /// recovered signature material is malformed (nonce point off the
    /// subgroup, response scalar out of range). A `None` command is an
    /// invalid message, not a batch failure.
    pub fn decrypt(ciphertext: &[Fr; 7], shared_key: &EdwardsAffine) -> Option<Self> {
        let plaintext =
            cipher::decrypt(ciphertext, (shared_key.x, shared_key.y), Fr::ZERO, 6)?;
        let packed_field = plaintext[0];
        let r8 = EdwardsAffine::new_unchecked(plaintext[3], plaintext[4]);
        validate_point(&r8).ok()?;
        let s = fq_to_scalar_checked(&plaintext[5])?;
        Some(Self {
            packed_field,
            packed: PackedCommand::unpack(&packed_field),
            new_pub_key: (plaintext[1], plaintext[2]),
            signature: Signature { r8, s },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trip() {
        let command = PackedCommand {
            nonce: 3,
            state_idx: 17,
            vo_idx: 4,
            new_votes: (1u128 << 96) - 1,
            salt: (1u64 << 56) - 1,
        };
        let packed = command.pack().expect("pack");
        assert_eq!(PackedCommand::unpack(&packed), command);
    }

    #[test]
    fn rejects_oversized_fields() {
        let command = PackedCommand {
            nonce: 1,
            state_idx: 0,
            vo_idx: 0,
            new_votes: 1u128 << 96,
            salt: 0