//! Poseidon duplex encryption.
//!
//! Symmetric authenticated encryption over field elements, built on the
//! width-4 Poseidon permutation: the shared ECDH point seeds the capacity,
//! three message lanes are absorbed per permutation call, and one final lane
//! authenticates the whole ciphertext. A 6-element command therefore
//! encrypts to exactly seven field elements.
//!
//! Decryption failure is not an error: an undecryptable ciphertext simply
//! was not addressed to this key, and the message pipeline records it as an
//! invalid message without aborting the batch.

use ark_bn254::Fr;
use ark_ff::{Field, Zero};

use crate::poseidon::permute;

/// Message lanes absorbed per permutation call.
const RATE: usize = 3;

fn two_pow_128() -> Fr {
    Fr::from(1u128 << 127) * Fr::from(2u64)
}

/// Initial duplex state: zero capacity lane, the shared-key coordinates, and
/// the nonce bound to the plaintext length.
fn initial_state(key: (Fr, Fr), nonce: Fr, length: usize) -> [Fr; RATE + 1] {
    let length = Fr::from(u64::try_from(length).expect("message length fits u64"));
    [Fr::ZERO, key.0, key.1, nonce + length * two_pow_128()]
}

/// Encrypt `message` under the shared key. The output carries
/// `message.len().div_ceil(3) * 3 + 1` field elements.
pub fn encrypt(message: &[Fr], key: (Fr, Fr), nonce: Fr) -> Vec<Fr> {
    let mut padded = message.to_vec();
    while !padded.len().is_multiple_of(RATE) {
        padded.push(Fr::ZERO);
    }

    let mut state = initial_state(key, nonce, message.len());
    let mut ciphertext = Vec::with_capacity(padded.len() + 1);
    for chunk in padded.chunks_exact(RATE) {
        permute(&mut state);
        for (lane, value) in chunk.iter().enumerate() {
            state[lane + 1] += value;
            ciphertext.push(state[lane + 1]);
        }
    }
    permute(&mut state);
    ciphertext.push(state[1]);
    ciphertext
}

/// Decrypt a ciphertext produced by [`encrypt`] into `length` plaintext
/// elements. Returns `None` when the ciphertext has the wrong shape, the
/// authentication lane mismatches, or the padding does not decrypt to zero.
pub fn decrypt(ciphertext: &[Fr], key: (Fr, Fr), nonce: Fr, length: usize) -> Option<Vec<Fr>> {
    let padded_len = length.div_ceil(RATE) * RATE;
    if ciphertext.len() != padded_len + 1 {
        return None;
    }

    let mut state = initial_state(key, nonce, length);
    let mut message = Vec::with_capacity(padded_len);
    for chunk in ciphertext[..padded_len].chunks_exact(RATE) {
        permute(&mut state);
        for (lane, value) in chunk.iter().enumerate() {
            message.push(*value - state[lane + 1]);
            state[lane + 1] = *value;
        }
    }

    if message[length..].iter().any(|pad| !pad.is_zero()) {
        return None;
    }

    permute(&mut state);
    if ciphertext[padded_len] != state[1] {
        return None;
    }

    message.truncate(length);
    Some(message)
}
