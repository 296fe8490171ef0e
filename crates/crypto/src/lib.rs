//! Cryptographic primitives of the AMACI core.
//!
//! Everything in this crate is synchronous and pure: BabyJubJub curve
//! arithmetic, the circom-compatible Poseidon hash family, EdDSA-Poseidon
//! keypairs and signatures, the ElGamal odd/even codec, the Poseidon duplex
//! cipher and the packed-command codec. All scalars live in the BN254 scalar
//! field; subgroup scalars live in the BabyJubJub prime-subgroup field.

pub mod babyjubjub;
pub mod cipher;
pub mod command;
pub mod elgamal;
pub mod keypair;
pub mod poseidon;

pub use babyjubjub::{CurveError, PublicKey};
pub use command::{Command, CommandError, PackedCommand};
pub use elgamal::{ElGamalCiphertext, ElGamalError};
pub use keypair::{Keypair, KeypairError, Signature};
pub use poseidon::HashError;
