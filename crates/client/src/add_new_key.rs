//! Add-new-key witness assembly.
//!
//! A deactivated voter proves, without revealing which deactivate leaf is
//! theirs, that some leaf carries their operator shared-key tag, and binds a
//! fresh key to the re-randomized ciphertext. The nullifier derived from the
//! old secret scalar makes the rebinding one-shot; the on-chain verifier
//! rejects a repeated nullifier.

use ark_bn254::Fr;
use ark_ed_on_bn254::{EdwardsAffine, Fr as SubgroupScalar};
use ark_std::UniformRand;
use ark_std::rand::Rng;

use amaci_crypto::babyjubjub::scalar_to_fq;
use amaci_crypto::elgamal::{ElGamalCiphertext, rerandomize};
use amaci_crypto::keypair::Keypair;
use amaci_crypto::poseidon::{compute_input_hash, hash2, hash5};
use amaci_tree::QuinTree;
use amaci_types::{NULLIFIER_DOMAIN_TAG, TREE_DEGREE};

use crate::voter::ClientError;

/// The full private and public input set of one add-new-key proof.
#[derive(Clone, Debug)]
pub struct AddNewKeyWitness {
    /// EVM-packed public input hash.
    pub input_hash: Fr,
    /// Operator public key coordinates.
    pub operator_pub_key: (Fr, Fr),
    /// Root of the rebuilt deactivate tree.
    pub deactivate_root: Fr,
    /// Index of the voter's deactivate leaf.
    pub deactivate_index: usize,
    /// Poseidon digest of that leaf.
    pub leaf_hash: Fr,
    /// Original ciphertext component `C1`.
    pub c1: (Fr, Fr),
    /// Original ciphertext component `C2`.
    pub c2: (Fr, Fr),
    /// The fresh re-randomization scalar.
    pub randomness: SubgroupScalar,
    /// Re-randomized component `D1`.
    pub d1: (Fr, Fr),
    /// Re-randomized component `D2`.
    pub d2: (Fr, Fr),
    /// Sibling path of the deactivate leaf.
    pub path: Vec<Vec<Fr>>,
    /// One-shot rebinding tag `Poseidon2(old_scalar, domain_tag)`.
    pub nullifier: Fr,
    /// The old secret scalar, a private circuit input.
    pub old_secret_scalar: SubgroupScalar,
}

impl AddNewKeyWitness {
    /// The re-randomized ciphertext the fresh state leaf inherits.
    pub fn rebound_ciphertext(&self) -> Result<ElGamalCiphertext, ClientError> {
        Ok(ElGamalCiphertext::from_fields(&[
            self.d1.0, self.d1.1, self.d2.0, self.d2.1,
        ])?)
    }

    /// The public inputs in hash order.
    pub fn public_inputs(&self) -> Vec<Fr> {
        vec![
            self.deactivate_root,
            hash2(self.operator_pub_key.0, self.operator_pub_key.1),
            self.nullifier,
            self.d1.0,
            self.d1.1,
            self.d2.0,
            self.d2.1,
        ]
    }
}

/// Locate the voter's deactivate leaf by its shared-key tag, re-randomize
/// its ciphertext and assemble the proof inputs.
///
/// `deactivate_leaves` is the full on-chain leaf set (typically fetched via
/// [`crate::Indexer`]); `deactivate_tree_depth` is the round's deactivate
/// tree geometry.
pub fn build_add_new_key_witness<R: Rng + ?Sized>(
    old_keypair: &Keypair,
    operator_pub_key: &EdwardsAffine,
    deactivate_leaves: &[[Fr; 5]],
    deactivate_tree_depth: usize,
    rng: &mut R,
) -> Result<AddNewKeyWitness, ClientError> {
    let tag = old_keypair.shared_key_hash(operator_pub_key)?;
    let index = deactivate_leaves
        .iter()
        .position(|leaf| leaf[4] == tag)
        .ok_or(ClientError::NoDeactivate)?;
    let leaf = &deactivate_leaves[index];

    let ciphertext =
        ElGamalCiphertext::from_fields(&[leaf[0], leaf[1], leaf[2], leaf[3]])?;
    let randomness = SubgroupScalar::rand(rng);
    let rebound = rerandomize(operator_pub_key, &ciphertext, &randomness)?;

    let nullifier = hash2(
        scalar_to_fq(&old_keypair.secret_scalar()),
        Fr::from(NULLIFIER_DOMAIN_TAG),
    );

    let blank_leaf = hash5(&[Fr::from(0u64); 5]);
    let mut tree = QuinTree::new(TREE_DEGREE, deactivate_tree_depth, blank_leaf)?;
    let hashes: Vec<Fr> = deactivate_leaves.iter().map(hash5).collect();
    tree.init_leaves(&hashes);
    let path = tree.path_element_of(index)?;

    let operator_pk = (operator_pub_key.x, operator_pub_key.y);
    let mut witness = AddNewKeyWitness {
        input_hash: Fr::from(0u64),
        operator_pub_key: operator_pk,
        deactivate_root: tree.root(),
        deactivate_index: index,
        leaf_hash: hash5(leaf),
        c1: (ciphertext.c1.x, ciphertext.c1.y),
        c2: (ciphertext.c2.x, ciphertext.c2.y),
        randomness,
        d1: (rebound.c1.x, rebound.c1.y),
        d2: (rebound.c2.x, rebound.c2.y),
        path,
        nullifier,
        old_secret_scalar: old_keypair.secret_scalar(),
    };
    witness.input_hash = compute_input_hash(&witness.public_inputs());
    Ok(witness)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaci_crypto::elgamal::{decrypt_parity, encrypt_parity};

    /// Fabricate a deactivate leaf for `voter` as the operator would.
    fn leaf_for(
        voter: &Keypair,
        operator: &Keypair,
        odd: bool,
        randomness: u64,
    ) -> [Fr; 5] {
        let (ciphertext, _) = encrypt_parity(
            odd,
            &operator.public_key(),
            &SubgroupScalar::from(randomness),
        )
        .expect("encrypt");
        let fields = ciphertext.as_fields();
        let tag = operator
            .shared_key_hash(&voter.public_key())
            .expect("shared key");
        [fields[0], fields[1], fields[2], fields[3], tag]
    }

    #[test]
    fn witness_finds_own_leaf_and_rerandomizes() {
        let mut rng = ark_std::test_rng();
        let operator = Keypair::random(&mut rng).expect("keypair");
        let alice = Keypair::random(&mut rng).expect("keypair");
        let bob = Keypair::random(&mut rng).expect("keypair");

        let leaves = vec![
            leaf_for(&bob, &operator, true, 11),
            leaf_for(&alice, &operator, true, 22),
        ];
        let witness = build_add_new_key_witness(
            &alice,
            &operator.public_key(),
            &leaves,
            4,
            &mut rng,
        )
        .expect("witness");

        assert_eq!(witness.deactivate_index, 1);
        assert_eq!(witness.leaf_hash, hash5(&leaves[1]));
        assert_eq!(witness.path.len(), 4);
        assert_eq!(witness.input_hash, compute_input_hash(&witness.public_inputs()));

        // The rebound ciphertext still decrypts to the same parity.
        let rebound = witness.rebound_ciphertext().expect("ciphertext");
        assert!(decrypt_parity(&operator.secret_scalar(), &rebound, Fr::from(0u64))
            .expect("parity"));
        assert_ne!((witness.d1, witness.d2), (witness.c1, witness.c2));
    }

    #[test]
    fn nullifier_is_deterministic_per_old_key() {
        let mut rng = ark_std::test_rng();
        let operator = Keypair::random(&mut rng).expect("keypair");
        let alice = Keypair::random(&mut rng).expect("keypair");
        let leaves = vec![leaf_for(&alice, &operator, true, 5)];

        let first = build_add_new_key_witness(
            &alice,
            &operator.public_key(),
            &leaves,
            4,
            &mut rng,
        )
        .expect("witness");
        let second = build_add_new_key_witness(
            &alice,
            &operator.public_key(),
            &leaves,
            4,
            &mut rng,
        )
        .expect("witness");

        assert_eq!(first.nullifier, second.nullifier);
        // Fresh randomness each time.
        assert_ne!(first.d1, second.d1);
    }

    #[test]
    fn missing_leaf_is_rejected() {
        let mut rng = ark_std::test_rng();
        let operator = Keypair::random(&mut rng).expect("keypair");
        let alice = Keypair::random(&mut rng).expect("keypair");
        let stranger = Keypair::random(&mut rng).expect("keypair");
        let leaves = vec![leaf_for(&stranger, &operator, true, 5)];

        assert!(matches!(
            build_add_new_key_witness(
                &alice,
                &operator.public_key(),
                &leaves,
                4,
                &mut rng
            ),
            Err(ClientError::NoDeactivate)
        ));
    }
}
