//! Chained message queues.
//!
//! Every published message carries seven ciphertext elements and the
//! ephemeral public key of its sender. The queue is an append-only log whose
//! entries are Merkle-chained: reordering any prefix invalidates every later
//! chain hash and with it the batch commitments derived from them.

use ark_bn254::Fr;
use ark_ff::Zero;

use amaci_crypto::Command;
use amaci_crypto::poseidon::{hash2, hash5};

/// Chain digest of one message over the previous digest:
/// `hash2(hash5(ct[0..5]), hash5([ct[5], ct[6], pk.x, pk.y, prev]))`.
pub fn chain_hash(ciphertext: &[Fr; 7], enc_pub_key: (Fr, Fr), prev_hash: Fr) -> Fr {
    let lo: [Fr; 5] = ciphertext[..5].try_into().expect("slice of 5");
    let hi = [
        ciphertext[5],
        ciphertext[6],
        enc_pub_key.0,
        enc_pub_key.1,
        prev_hash,
    ];
    hash2(hash5(&lo), hash5(&hi))
}

/// One queued message with its chain digests and the eagerly decrypted
/// command (`None` for undecryptable or padding messages).
#[derive(Clone, Debug)]
pub struct Message {
    /// Poseidon-cipher output, seven field elements.
    pub ciphertext: [Fr; 7],
    /// The sender's ephemeral public key coordinates.
    pub enc_pub_key: (Fr, Fr),
    /// Chain digest of the previous message (zero for the first).
    pub prev_hash: Fr,
    /// This message's chain digest.
    pub hash: Fr,
    /// The decrypted command, cached at ingestion time.
    pub command: Option<Command>,
}

impl Message {
    /// A synthetic padding message; its zero ephemeral-key x-coordinate is
    /// the sentinel batch circuits skip on.
    pub fn empty() -> Self {
        Self {
            ciphertext: [Fr::zero(); 7],
            enc_pub_key: (Fr::zero(), Fr::zero()),
            prev_hash: Fr::zero(),
            hash: Fr::zero(),
            command: None,
        }
    }

    /// Whether this is a padding message.
    pub fn is_padding(&self) -> bool {
        self.enc_pub_key.0.is_zero()
    }
}

/// Recompute the chain over a message log and confirm every stored digest.
pub fn verify_chain(messages: &[Message]) -> bool {
    let mut prev = Fr::zero();
    for message in messages {
        if message.prev_hash != prev {
            return false;
        }
        if chain_hash(&message.ciphertext, message.enc_pub_key, prev) != message.hash {
            return false;
        }
        prev = message.hash;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use ark_std::UniformRand;

    fn message_after(prev_hash: Fr, rng: &mut impl ark_std::rand::Rng) -> Message {
        let ciphertext: [Fr; 7] = core::array::from_fn(|_| Fr::rand(rng));
        let enc_pub_key = (Fr::rand(rng), Fr::rand(rng));
        let hash = chain_hash(&ciphertext, enc_pub_key, prev_hash);
        Message {
            ciphertext,
            enc_pub_key,
            prev_hash,
            hash,
            command: None,
        }
    }

    #[test]
    fn chain_verifies_in_append_order() {
        let mut rng = ark_std::test_rng();
        let mut log = Vec::new();
        let mut prev = Fr::zero();
        for _ in 0..4 {
            let message = message_after(prev, &mut rng);
            prev = message.hash;
            log.push(message);
        }
        assert!(verify_chain(&log));
    }

    #[test]
    fn reordering_breaks_the_chain() {
        let mut rng = ark_std::test_rng();
        let mut log = Vec::new();
        let mut prev = Fr::zero();
        for _ in 0..3 {
            let message = message_after(prev, &mut rng);
            prev = message.hash;
            log.push(message);
        }
        log.swap(0, 1);
        assert!(!verify_chain(&log));
    }

    #[test]
    fn tampered_ciphertext_breaks_the_chain() {
        let mut rng = ark_std::test_rng();
        let mut log = vec![message_after(Fr::zero(), &mut rng)];
        log[0].ciphertext[2] += Fr::from(1u64);
        assert!(!verify_chain(&log));
    }

    #[test]
    fn padding_sentinel() {
        assert!(Message::empty().is_padding());
    }
}
