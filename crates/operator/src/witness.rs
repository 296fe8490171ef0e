//! Witness bundles emitted by the batch processors.
//!
//! Field order inside each bundle is stable: the external prover's input
//! layout is positional, and `public_inputs()` returns exactly the field
//! list the EVM-packed input hash is computed over, in hash order.

use ark_bn254::Fr;

use amaci_crypto::poseidon::compute_input_hash;

/// Witness for one deactivate batch.
#[derive(Clone, Debug)]
pub struct DeactivateWitness {
    /// Queue index of the first message in the batch.
    pub batch_start: usize,
    /// One past the queue index of the last real message in the batch.
    pub batch_end: usize,
    /// Deactivate-tree root after the batch.
    pub new_deactivate_root: Fr,
    /// `Poseidon2` hash of the operator public key.
    pub operator_pub_key_hash: Fr,
    /// Chain digest preceding the batch.
    pub batch_start_hash: Fr,
    /// Chain digest of the last real message in the batch.
    pub batch_end_hash: Fr,
    /// `hash2(active_root, deactivate_root)` before the batch.
    pub current_deactivate_commitment: Fr,
    /// `hash2(active_root, deactivate_root)` after the batch.
    pub new_deactivate_commitment: Fr,
    /// Root of the state tree truncated to the signed-up prefix.
    pub sub_state_root: Fr,
    /// EVM-packed public input hash.
    pub input_hash: Fr,
    /// Message ciphertexts, padded to the batch width.
    pub messages: Vec<[Fr; 7]>,
    /// Ephemeral public keys per message; `(0, 0)` marks padding.
    pub enc_pub_keys: Vec<(Fr, Fr)>,
    /// Pre-batch state leaves referenced per message.
    pub state_leaves: Vec<[Fr; 10]>,
    /// State-tree sibling paths per message.
    pub state_paths: Vec<Vec<Vec<Fr>>>,
    /// Active-state leaves before the batch, per message.
    pub current_active_state_leaves: Vec<Fr>,
    /// Active-state leaves after the batch, per message.
    pub new_active_state_leaves: Vec<Fr>,
    /// Active-state sibling paths per message.
    pub active_state_paths: Vec<Vec<Vec<Fr>>>,
    /// Deactivate leaves appended by the batch (five fields each).
    pub new_deactivate_leaves: Vec<[Fr; 5]>,
    /// Deactivate-tree sibling paths at the appended indices.
    pub deactivate_paths: Vec<Vec<Vec<Fr>>>,
    /// Per-message validity as judged by the operator.
    pub valid: Vec<bool>,
}

impl DeactivateWitness {
    /// The public inputs in hash order.
    pub fn public_inputs(&self) -> Vec<Fr> {
        vec![
            self.new_deactivate_root,
            self.operator_pub_key_hash,
            self.batch_start_hash,
            self.batch_end_hash,
            self.current_deactivate_commitment,
            self.new_deactivate_commitment,
            self.sub_state_root,
        ]
    }

    /// Recompute the EVM-packed hash over [`Self::public_inputs`].
    pub fn compute_input_hash(&self) -> Fr {
        compute_input_hash(&self.public_inputs())
    }
}

/// Witness for one reverse-order vote batch.
#[derive(Clone, Debug)]
pub struct ProcessMessagesWitness {
    /// Queue index of the first message in the window.
    pub batch_start: usize,
    /// One past the queue index of the last message in the window.
    pub batch_end: usize,
    /// `max_vote_options | num_sign_ups << 32 | is_quadratic << 64`.
    pub packed_vals: Fr,
    /// `Poseidon2` hash of the operator public key.
    pub operator_pub_key_hash: Fr,
    /// Chain digest preceding the window.
    pub batch_start_hash: Fr,
    /// Chain digest of the last message in the window.
    pub batch_end_hash: Fr,
    /// State commitment before the batch.
    pub old_state_commitment: Fr,
    /// State commitment after the batch.
    pub new_state_commitment: Fr,
    /// `hash2(active_root, deactivate_root)` at processing time.
    pub deactivate_commitment: Fr,
    /// EVM-packed public input hash.
    pub input_hash: Fr,
    /// State root before the batch.
    pub old_state_root: Fr,
    /// State root after the batch.
    pub new_state_root: Fr,
    /// Salt bound into the old commitment.
    pub old_state_salt: Fr,
    /// Salt bound into the new commitment.
    pub new_state_salt: Fr,
    /// Message ciphertexts, padded to the batch width.
    pub messages: Vec<[Fr; 7]>,
    /// Ephemeral public keys per message; `(0, 0)` marks padding.
    pub enc_pub_keys: Vec<(Fr, Fr)>,
    /// State index each slot was judged against (the dummy top index for
    /// invalid slots).
    pub state_indices: Vec<usize>,
    /// Pre-update state leaf per slot.
    pub current_state_leaves: Vec<[Fr; 10]>,
    /// State-tree sibling paths per slot, taken before the update.
    pub current_state_paths: Vec<Vec<Vec<Fr>>>,
    /// Pre-update weight on the addressed vote option per slot.
    pub current_vote_weights: Vec<Fr>,
    /// Vote-option-tree sibling paths per slot, taken before the update.
    pub current_vote_paths: Vec<Vec<Vec<Fr>>>,
    /// Active-state leaf per slot.
    pub active_state_leaves: Vec<Fr>,
    /// Active-state sibling paths per slot.
    pub active_state_paths: Vec<Vec<Vec<Fr>>>,
    /// Per-slot validity as judged by the operator.
    pub valid: Vec<bool>,
}

impl ProcessMessagesWitness {
    /// The public inputs in hash order.
    pub fn public_inputs(&self) -> Vec<Fr> {
        vec![
            self.packed_vals,
            self.operator_pub_key_hash,
            self.batch_start_hash,
            self.batch_end_hash,
            self.old_state_commitment,
            self.new_state_commitment,
            self.deactivate_commitment,
        ]
    }

    /// Recompute the EVM-packed hash over [`Self::public_inputs`].
    pub fn compute_input_hash(&self) -> Fr {
        compute_input_hash(&self.public_inputs())
    }
}

/// Witness for one tally batch.
#[derive(Clone, Debug)]
pub struct TallyWitness {
    /// Zero-based tally batch number.
    pub batch_num: usize,
    /// Final state root the batch proves against.
    pub state_root: Fr,
    /// Final state salt.
    pub state_salt: Fr,
    /// `num_sign_ups | batch_num << 32`.
    pub packed_vals: Fr,
    /// Final state commitment.
    pub state_commitment: Fr,
    /// Tally commitment before the batch.
    pub current_tally_commitment: Fr,
    /// Tally commitment after the batch.
    pub new_tally_commitment: Fr,
    /// EVM-packed public input hash.
    pub input_hash: Fr,
    /// State leaves of the folded user group.
    pub state_leaves: Vec<[Fr; 10]>,
    /// Per-user per-option weights of the folded group.
    pub vote_weights: Vec<Vec<Fr>>,
    /// Tally-tree leaves after the batch.
    pub tally_leaves: Vec<Fr>,
}

impl TallyWitness {
    /// The public inputs in hash order.
    pub fn public_inputs(&self) -> Vec<Fr> {
        vec![
            self.packed_vals,
            self.state_commitment,
            self.current_tally_commitment,
            self.new_tally_commitment,
        ]
    }

    /// Recompute the EVM-packed hash over [`Self::public_inputs`].
    pub fn compute_input_hash(&self) -> Fr {
        compute_input_hash(&self.public_inputs())
    }
}
