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
        input_hash: Fr::from(0u64)