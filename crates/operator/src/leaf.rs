//! Voter state leaves.

use ark_bn254::Fr;

use amaci_crypto::elgamal::ElGamalCiphertext;
use amaci_crypto::poseidon::hash10;

/// One voter's state: key, balance, vote-option root, replay counter and the
/// operator's odd/even ciphertext.
///
/// Fields 5..=9 (the ciphertext and the reserved x-increment) are set at
/// signup, untouched by vote processing, and replaced wholesale when a
/// deactivated voter rebinds a fresh key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StateLeaf {
    /// Voter public key coordinates.
    pub pub_key: (Fr, Fr),
    /// Voice credits remaining.
    pub balance: u128,
    /// Root of the voter's per-option tree.
    pub vote_option_root: Fr,
    /// Monotonically increasing replay counter.
    pub nonce: u32,
    /// ElGamal ciphertext `[c1.x, c1.y, c2.x, c2.y]` encoding the leaf's
    /// activity parity.
    pub ciphertext: [Fr; 4],
    /// Reserved; zero in the current protocol revision.
    pub x_increment: Fr,
}

impl StateLeaf {
    /// Build a fresh leaf at signup.
    pub fn new(
        pub_key: (Fr, Fr),
        balance: u128,
        vote_option_root: Fr,
        ciphertext: &ElGamalCiphertext,
    ) -> Self {
        Self {
            pub_key,
            balance,
            vote_option_root,
            nonce: 0,
            ciphertext: ciphertext.as_fields(),
            x_increment: Fr::from(0u64),
        }
    }

    /// The ten on-chain fields in leaf order.
    pub fn as_fields(&self) -> [Fr; 10] {
        [
            self.pub_key.0,
            self.pub_key.1,
            Fr::from(self.balance),
            self.vote_option_root,
            Fr::from(u64::from(self.nonce)),
            self.ciphertext[0],
            self.ciphertext[1],
            self.ciphertext[2],
            self.ciphertext[3],
            self.x_increment,
        ]
    }

    /// The leaf digest `hash2(hash5(fields[0..5]), hash5(fields[5..10]))`.
    pub fn hash(&self) -> Fr {
        hash10(&self.as_fields())
    }
}
