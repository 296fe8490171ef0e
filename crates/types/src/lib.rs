//! Shared types for the AMACI core.
//!
//! Holds the protocol constants, the per-round configuration, and the small
//! field/bytes helpers every other crate leans on. Everything here is pure
//! data; no tree or curve logic lives in this crate.

mod config;
mod constants;
mod field;

pub use config::{ConfigError, RoundConfig};
pub use constants::{
    DEACTIVATE_KEY_SALT, DEFAULT_DERIVATION_PATH, FIELD_SIZE, NULLIFIER_DOMAIN_TAG,
    SUBGROUP_ORDER_DEC, TREE_DEGREE, tally_shift,
};
pub use field::{
    FieldDecodeError, decode_tally_leaf, fr_from_be_bytes, fr_from_hex, fr_to_be_bytes, fr_to_hex,
};
