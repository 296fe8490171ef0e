//! The coordinator state machine.
//!
//! Four monotone phases: Filling (signups and message ingestion),
//! Processing (vote batches consumed from the end of the queue), Tallying
//! and Ended. Deactivate batches run during Filling or Processing: voters
//! need their deactivate leaves on chain before the period ends so a fresh
//! key can be bound and used within the same round.

use std::collections::BTreeMap;

use ark_bn254::Fr;
use ark_ed_on_bn254::{EdwardsAffine, Fr as SubgroupScalar};
use ark_ff::Zero;
use ark_std::UniformRand;
use ark_std::rand::Rng;
use num_bigint::BigUint;

use amaci_crypto::babyjubjub::{fq_to_scalar, validate_point};
use amaci_crypto::elgamal::{ElGamalCiphertext, ElGamalError, decrypt_parity, encrypt_parity};
use amaci_crypto::keypair::{Keypair, KeypairError};
use amaci_crypto::poseidon::{hash2, hash3, hash5, hash10};
use amaci_crypto::Command;
use amaci_tree::{QuinTree, TreeError};
use amaci_types::{ConfigError, DEACTIVATE_KEY_SALT, RoundConfig, TREE_DEGREE, tally_shift};

use crate::cost::cost_for;
use crate::leaf::StateLeaf;
use crate::message::{Message, chain_hash};
use crate::witness::{DeactivateWitness, ProcessMessagesWitness, TallyWitness};

/// The operator's lifecycle phases; transitions are monotone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Accepting signups and encrypted messages.
    Filling,
    /// Consuming vote batches in reverse queue order.
    Processing,
    /// Folding per-voter weights into the tally tree.
    Tallying,
    /// The round is finished.
    Ended,
}

/// Errors raised by the state machine.
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// An operation was issued outside its permitted phase.
    #[error("{operation} is not allowed in phase {phase:?}")]
    WrongPhase {
        /// The rejected operation.
        operation: &'static str,
        /// The phase the machine was in.
        phase: Phase,
    },
    /// A tree access failed; fatal for the call.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// Key material or a point was malformed; fatal for the call.
    #[error(transparent)]
    Keypair(#[from] KeypairError),
    /// An odd/even ciphertext operation failed; fatal for the call.
    #[error(transparent)]
    ElGamal(#[from] ElGamalError),
    /// The round configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Signups must arrive in index order.
    #[error("signup index {got} out of order, expected {expected}")]
    SignupOutOfOrder {
        /// The next free index.
        expected: usize,
        /// The requested index.
        got: usize,
    },
    /// A batch call found no unprocessed messages.
    #[error("no messages left to process")]
    NothingToProcess,
    /// A deactivate batch was requested with a zero input size.
    #[error("deactivate batch size must be non-zero")]
    EmptyBatch,
    /// The sub-state snapshot would cover more voters than signed up.
    #[error("sub state tree length {requested} exceeds {signed_up} signups")]
    SubTreeTooLong {
        /// Requested truncation length.
        requested: usize,
        /// Current signup count.
        signed_up: usize,
    },
}

/// A voter's vote-option bookkeeping: the Poseidon tree and the raw weights.
#[derive(Clone, Debug)]
struct VoteBook {
    tree: QuinTree,
    weights: Vec<u128>,
}

/// The coordinator state machine; one instance per round.
pub struct Operator {
    config: RoundConfig,
    keypair: Keypair,
    phase: Phase,

    state_tree: QuinTree,
    active_tree: QuinTree,
    deactivate_tree: QuinTree,
    tally_tree: QuinTree,
    empty_vote_tree: QuinTree,

    state_leaves: Vec<StateLeaf>,
    vote_books: BTreeMap<usize, VoteBook>,

    messages: Vec<Message>,
    deactivate_messages: Vec<Message>,
    deactivate_leaves: Vec<[Fr; 5]>,
    processed_deactivate_count: usize,

    msg_end_idx: usize,
    state_salt: Fr,
    state_commitment: Fr,

    tally: Vec<Fr>,
    current_tally_commitment: Fr,
    tally_salt: Fr,
    tally_batch_num: usize,
}

impl Operator {
    /// Build a fresh round. The zero leaves are the digests of all-zero
    /// field vectors so padded witness slots stay provable.
    pub fn new(config: RoundConfig, keypair: Keypair) -> Result<Self, OperatorError> {
        let config = config.validated()?;
        let blank_state_leaf = hash10(&[Fr::zero(); 10]);
        let blank_deactivate_leaf = hash5(&[Fr::zero(); 5]);

        let state_tree = QuinTree::new(TREE_DEGREE, config.state_tree_depth, blank_state_leaf)?;
        let active_tree = QuinTree::new(TREE_DEGREE, config.state_tree_depth, Fr::zero())?;
        let deactivate_tree = QuinTree::new(
            TREE_DEGREE,
            config.deactivate_tree_depth(),
            blank_deactivate_leaf,
        )?;
        let tally_tree = QuinTree::new(TREE_DEGREE, config.vote_option_tree_depth, Fr::zero())?;
        let empty_vote_tree =
            QuinTree::new(TREE_DEGREE, config.vote_option_tree_depth, Fr::zero())?;
        let option_capacity = empty_vote_tree.capacity();

        Ok(Self {
            config,
            keypair,
            phase: Phase::Filling,
            state_tree,
            active_tree,
            deactivate_tree,
            tally_tree,
            empty_vote_tree,
            state_leaves: Vec::new(),
            vote_books: BTreeMap::new(),
            messages: Vec::new(),
            deactivate_messages: Vec::new(),
            deactivate_leaves: Vec::new(),
            processed_deactivate_count: 0,
            msg_end_idx: 0,
            state_salt: Fr::zero(),
            state_commitment: Fr::zero(),
            tally: vec![Fr::zero(); option_capacity],
            current_tally_commitment: Fr::zero(),
            tally_salt: Fr::zero(),
            tally_batch_num: 0,
        })
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Round configuration.
    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    /// Number of signed-up voters.
    pub fn num_sign_ups(&self) -> usize {
        self.state_leaves.len()
    }

    /// Current state-tree root.
    pub fn state_root(&self) -> Fr {
        self.state_tree.root()
    }

    /// Current deactivate-tree root.
    pub fn deactivate_root(&self) -> Fr {
        self.deactivate_tree.root()
    }

    /// Running state commitment `hash2(state_root, state_salt)`.
    pub fn state_commitment(&self) -> Fr {
        self.state_commitment
    }

    /// `hash2(active_root, deactivate_root)`, the deactivate commitment.
    pub fn deactivate_commitment(&self) -> Fr {
        hash2(self.active_tree.root(), self.deactivate_tree.root())
    }

    /// Running tally commitment.
    pub fn tally_commitment(&self) -> Fr {
        self.current_tally_commitment
    }

    /// The vote-message log.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The deactivate-message log.
    pub fn deactivate_messages(&self) -> &[Message] {
        &self.deactivate_messages
    }

    /// All deactivate leaves appended so far (five fields each).
    pub fn deactivate_leaves(&self) -> &[[Fr; 5]] {
        &self.deactivate_leaves
    }

    /// The state leaf at `index`, if signed up.
    pub fn state_leaf(&self, index: usize) -> Option<&StateLeaf> {
        self.state_leaves.get(index)
    }

    /// Decoded per-option tally `(sum, sum_of_squares)`.
    pub fn tally_results(&self) -> Vec<(u128, u128)> {
        self.tally
            .iter()
            .map(amaci_types::decode_tally_leaf)
            .collect()
    }

    /// `Poseidon2` hash of the operator public key.
    pub fn operator_pub_key_hash(&self) -> Fr {
        let pk = self.keypair.public_key();
        hash2(pk.x, pk.y)
    }

    fn expect_phase(&self, expected: Phase, operation: &'static str) -> Result<(), OperatorError> {
        if self.phase != expected {
            return Err(OperatorError::WrongPhase {
                operation,
                phase: self.phase,
            });
        }
        Ok(())
    }

    /// Create the `index`-th state leaf from a sign-up event.
    ///
    /// When the boundary does not supply a ciphertext, the operator encrypts
    /// the even ("active") parity under its own key with fresh randomness.
    /// Rebinding a deactivated voter is the same operation with the
    /// re-randomized deactivate ciphertext supplied.
    pub fn init_state_tree<R: Rng + ?Sized>(
        &mut self,
        index: usize,
        pub_key: &EdwardsAffine,
        balance: u128,
        ciphertext: Option<ElGamalCiphertext>,
        rng: &mut R,
    ) -> Result<(), OperatorError> {
        self.expect_phase(Phase::Filling, "init_state_tree")?;
        validate_point(pub_key).map_err(KeypairError::Curve)?;
        if index != self.state_leaves.len() {
            return Err(OperatorError::SignupOutOfOrder {
                expected: self.state_leaves.len(),
                got: index,
            });
        }
        let ciphertext = match ciphertext {
            Some(ciphertext) => ciphertext,
            None => {
                let randomness = SubgroupScalar::rand(rng);
                encrypt_parity(false, &self.keypair.public_key(), &randomness)?.0
            }
        };
        let leaf = StateLeaf::new(
            (pub_key.x, pub_key.y),
            balance,
            self.empty_vote_tree.root(),
            &ciphertext,
        );
        self.state_tree.update_leaf(index, leaf.hash())?;
        self.state_leaves.push(leaf);
        Ok(())
    }

    fn ingest(&self, ciphertext: [Fr; 7], enc_pub_key: (Fr, Fr), prev_hash: Fr) -> Message {
        let hash = chain_hash(&ciphertext, enc_pub_key, prev_hash);
        let enc_point = EdwardsAffine::new_unchecked(enc_pub_key.0, enc_pub_key.1);
        let command = self
            .keypair
            .ecdh(&enc_point)
            .ok()
            .and_then(|shared| Command::decrypt(&ciphertext, &shared));
        Message {
            ciphertext,
            enc_pub_key,
            prev_hash,
            hash,
            command,
        }
    }

    /// Append a vote message to the queue, extending the chain hash and
    /// caching the decrypted command.
    pub fn push_message(
        &mut self,
        ciphertext: [Fr; 7],
        enc_pub_key: (Fr, Fr),
    ) -> Result<(), OperatorError> {
        self.expect_phase(Phase::Filling, "push_message")?;
        let prev_hash = self.messages.last().map_or(Fr::zero(), |m| m.hash);
        let message = self.ingest(ciphertext, enc_pub_key, prev_hash);
        self.messages.push(message);
        Ok(())
    }

    /// Append a deactivate message to its queue.
    pub fn push_deactivate_message(
        &mut self,
        ciphertext: [Fr; 7],
        enc_pub_key: (Fr, Fr),
    ) -> Result<(), OperatorError> {
        self.expect_phase(Phase::Filling, "push_deactivate_message")?;
        let prev_hash = self.deactivate_messages.last().map_or(Fr::zero(), |m| m.hash);
        let message = self.ingest(ciphertext, enc_pub_key, prev_hash);
        self.deactivate_messages.push(message);
        Ok(())
    }

    /// Close the voting period: freeze the queue end, zero the state salt
    /// and commit the current state root. An empty queue goes straight to
    /// Tallying.
    pub fn end_vote_period(&mut self) -> Result<(), OperatorError> {
        self.expect_phase(Phase::Filling, "end_vote_period")?;
        self.msg_end_idx = self.messages.len();
        self.state_salt = Fr::zero();
        self.state_commitment = hash2(self.state_tree.root(), Fr::zero());
        if self.messages.is_empty() {
            self.phase = Phase::Tallying;
        } else {
            self.phase = Phase::Processing;
        }
        Ok(())
    }

    /// Deterministic deactivate randomness,
    /// `Poseidon3(operator_sk, 20040, new_active_leaf)`; identical runs
    /// reproduce identical ciphertexts and commitments.
    fn static_rand(&self, new_active_leaf: Fr) -> SubgroupScalar {
        fq_to_scalar(&hash3(&[
            self.keypair.secret(),
            Fr::from(DEACTIVATE_KEY_SALT),
            new_active_leaf,
        ]))
    }

    /// Whether a state leaf's ciphertext still decrypts to the even
    /// ("active") parity.
    fn leaf_parity_even(&self, leaf: &StateLeaf) -> Result<bool, ElGamalError> {
        let ciphertext = ElGamalCiphertext::from_fields(&leaf.ciphertext)?;
        let parity = decrypt_parity(
            &self.keypair.secret_scalar(),
            &ciphertext,
            leaf.x_increment,
        )?;
        Ok(!parity)
    }

    /// Process one deactivate batch of up to `input_size` messages against
    /// the state truncated to `sub_state_tree_length` voters.
    ///
    /// Allowed while Filling (so voters can rebind within the round) and
    /// while Processing. The deactivate tree is append-only, so the batch
    /// runs in queue order.
    pub fn process_deactivate_messages(
        &mut self,
        input_size: usize,
        sub_state_tree_length: usize,
    ) -> Result<DeactivateWitness, OperatorError> {
        if !matches!(self.phase, Phase::Filling | Phase::Processing) {
            return Err(OperatorError::WrongPhase {
                operation: "process_deactivate_messages",
                phase: self.phase,
            });
        }
        if input_size == 0 {
            return Err(OperatorError::EmptyBatch);
        }
        if sub_state_tree_length > self.state_leaves.len() {
            return Err(OperatorError::SubTreeTooLong {
                requested: sub_state_tree_length,
                signed_up: self.state_leaves.len(),
            });
        }

        let batch_start = self.processed_deactivate_count;
        let available = self.deactivate_messages.len() - batch_start;
        if available == 0 {
            return Err(OperatorError::NothingToProcess);
        }
        let real_count = available.min(input_size);
        let batch_end = batch_start + real_count;

        let sub_state_tree = self.state_tree.sub_tree(sub_state_tree_length)?;
        let sub_state_root = sub_state_tree.root();
        let current_commitment = self.deactivate_commitment();
        let dummy_index = self.state_tree.capacity() - 1;

        let mut slots: Vec<Message> =
            self.deactivate_messages[batch_start..batch_end].to_vec();
        slots.resize(input_size, Message::empty());

        let mut witness = DeactivateWitness {
            batch_start,
            batch_end,
            new_deactivate_root: Fr::zero(),
            operator_pub_key_hash: self.operator_pub_key_hash(),
            batch_start_hash: self.deactivate_messages[batch_start].prev_hash,
            batch_end_hash: self.deactivate_messages[batch_end - 1].hash,
            current_deactivate_commitment: current_commitment,
            new_deactivate_commitment: Fr::zero(),
            sub_state_root,
            input_hash: Fr::zero(),
            messages: Vec::with_capacity(input_size),
            enc_pub_keys: Vec::with_capacity(input_size),
            state_leaves: Vec::with_capacity(input_size),
            state_paths: Vec::with_capacity(input_size),
            current_active_state_leaves: Vec::with_capacity(input_size),
            new_active_state_leaves: Vec::with_capacity(input_size),
            active_state_paths: Vec::with_capacity(input_size),
            new_deactivate_leaves: Vec::with_capacity(input_size),
            deactivate_paths: Vec::with_capacity(input_size),
            valid: Vec::with_capacity(input_size),
        };

        for (i, message) in slots.iter().enumerate() {
            let claimed = message
                .command
                .as_ref()
                .map(|command| command.packed.state_idx as usize);
            let snapshot_idx = match claimed {
                Some(idx) if idx < sub_state_tree_length => idx,
                _ => dummy_index,
            };

            let leaf_fields = if snapshot_idx < sub_state_tree_length {
                self.state_leaves[snapshot_idx].as_fields()
            } else {
                [Fr::zero(); 10]
            };
            let current_active = self.active_tree.leaf(snapshot_idx)?;

            witness.messages.push(message.ciphertext);
            witness.enc_pub_keys.push(message.enc_pub_key);
            witness.state_leaves.push(leaf_fields);
            witness
                .state_paths
                .push(sub_state_tree.path_element_of(snapshot_idx)?);
            witness.current_active_state_leaves.push(current_active);
            witness
                .active_state_paths
                .push(self.active_tree.path_element_of(snapshot_idx)?);

            let valid = self.check_deactivate_command(
                message,
                sub_state_tree_length,
                snapshot_idx,
                current_active,
            );

            let new_active = if valid {
                Fr::from(u64::try_from(batch_start + i + 1).expect("queue index fits u64"))
            } else {
                current_active
            };
            witness.new_active_state_leaves.push(new_active);
            witness.valid.push(valid);

            // The appended ciphertext encodes the leaf's resulting activity:
            // odd for a completed deactivation, even when the command errored.
            let randomness = self.static_rand(new_active);
            let (deactivate_ct, _) =
                encrypt_parity(valid, &self.keypair.public_key(), &randomness)?;

            if message.is_padding() {
                witness.new_deactivate_leaves.push([Fr::zero(); 5]);
                witness.deactivate_paths.push(
                    self.deactivate_tree
                        .path_element_of(self.deactivate_leaves.len())?,
                );
                continue;
            }

            let shared_hash = if valid {
                let leaf = &self.state_leaves[snapshot_idx];
                let pk = EdwardsAffine::new_unchecked(leaf.pub_key.0, leaf.pub_key.1);
                self.keypair.shared_key_hash(&pk)?
            } else {
                Fr::zero()
            };

            let ct_fields = deactivate_ct.as_fields();
            let deactivate_leaf = [
                ct_fields[0],
                ct_fields[1],
                ct_fields[2],
                ct_fields[3],
                shared_hash,
            ];
            let leaf_index = self.deactivate_leaves.len();
            self.deactivate_tree
                .update_leaf(leaf_index, hash5(&deactivate_leaf))?;
            self.deactivate_leaves.push(deactivate_leaf);
            witness.new_deactivate_leaves.push(deactivate_leaf);
            witness
                .deactivate_paths
                .push(self.deactivate_tree.path_element_of(leaf_index)?);

            if valid {
                self.active_tree.update_leaf(snapshot_idx, new_active)?;
            }
        }

        self.processed_deactivate_count = batch_end;
        witness.new_deactivate_root = self.deactivate_tree.root();
        witness.new_deactivate_commitment = self.deactivate_commitment();
        witness.input_hash = witness.compute_input_hash();
        log::debug!(
            "deactivate batch [{batch_start}, {batch_end}): {} valid",
            witness.valid.iter().filter(|v| **v).count()
        );
        Ok(witness)
    }

    /// Validity of one deactivate command: present, in the snapshot range,
    /// not already deactivated (bookkeeping and ciphertext parity agree),
    /// and signed by the state key.
    fn check_deactivate_command(
        &self,
        message: &Message,
        sub_state_tree_length: usize,
        snapshot_idx: usize,
        current_active: Fr,
    ) -> bool {
        let Some(command) = message.command.as_ref() else {
            return false;
        };
        let state_idx = command.packed.state_idx as usize;
        if state_idx >= sub_state_tree_length || snapshot_idx != state_idx {
            return false;
        }
        if !current_active.is_zero() {
            return false;
        }
        let leaf = &self.state_leaves[state_idx];
        match self.leaf_parity_even(leaf) {
            Ok(true) => {}
            _ => return false,
        }
        let pk = EdwardsAffine::new_unchecked(leaf.pub_key.0, leaf.pub_key.1);
        command.verify_signature(&pk)
    }

    /// `max_vote_options | num_sign_ups << 32 | is_quadratic << 64`.
    fn packed_vals(&self) -> Fr {
        let mut packed = BigUint::from(self.config.max_vote_options);
        packed |= BigUint::from(self.state_leaves.len()) << 32u32;
        if self.config.quadratic_cost {
            packed |= BigUint::from(1u8) << 64u32;
        }
        Fr::from(packed)
    }

    /// Process the next vote batch: the highest unconsumed
    /// `message_batch_size`-aligned window, iterated from its end so nonces
    /// apply in ascending order. Transitions to Tallying when the window
    /// reaches the front of the queue.
    pub fn process_messages(
        &mut self,
        new_state_salt: Fr,
    ) -> Result<ProcessMessagesWitness, OperatorError> {
        self.expect_phase(Phase::Processing, "process_messages")?;
        if self.msg_end_idx == 0 {
            return Err(OperatorError::NothingToProcess);
        }

        let batch_size = self.config.message_batch_size;
        let batch_end = self.msg_end_idx;
        let batch_start = ((batch_end - 1) / batch_size) * batch_size;
        let dummy_index = self.state_tree.capacity() - 1;
        let option_capacity = self.empty_vote_tree.capacity();
        let cost = cost_for(self.config.quadratic_cost);

        let old_state_root = self.state_tree.root();
        let old_state_commitment = self.state_commitment;
        let old_state_salt = self.state_salt;

        let mut slots: Vec<Message> = self.messages[batch_start..batch_end].to_vec();
        slots.resize(batch_size, Message::empty());

        let mut witness = ProcessMessagesWitness {
            batch_start,
            batch_end,
            packed_vals: self.packed_vals(),
            operator_pub_key_hash: self.operator_pub_key_hash(),
            batch_start_hash: self.messages[batch_start].prev_hash,
            batch_end_hash: self.messages[batch_end - 1].hash,
            old_state_commitment,
            new_state_commitment: Fr::zero(),
            deactivate_commitment: self.deactivate_commitment(),
            input_hash: Fr::zero(),
            old_state_root,
            new_state_root: Fr::zero(),
            old_state_salt,
            new_state_salt,
            messages: vec![[Fr::zero(); 7]; batch_size],
            enc_pub_keys: vec![(Fr::zero(), Fr::zero()); batch_size],
            state_indices: vec![dummy_index; batch_size],
            current_state_leaves: vec![[Fr::zero(); 10]; batch_size],
            current_state_paths: vec![Vec::new(); batch_size],
            current_vote_weights: vec![Fr::zero(); batch_size],
            current_vote_paths: vec![Vec::new(); batch_size],
            active_state_leaves: vec![Fr::zero(); batch_size],
            active_state_paths: vec![Vec::new(); batch_size],
            valid: vec![false; batch_size],
        };

        for i in (0..batch_size).rev() {
            let message = &slots[i];
            let command = message.command;

            let claimed = command.map(|c| c.packed.state_idx as usize);
            let snapshot_idx = match claimed {
                Some(idx) if idx < self.state_leaves.len() => idx,
                _ => dummy_index,
            };
            let snapshot_vo = command
                .map(|c| c.packed.vo_idx as usize)
                .filter(|vo| *vo < option_capacity)
                .unwrap_or(0);

            // Snapshot everything before this message mutates the trees.
            witness.messages[i] = message.ciphertext;
            witness.enc_pub_keys[i] = message.enc_pub_key;
            witness.current_state_leaves[i] = self
                .state_leaves
                .get(snapshot_idx)
                .map_or([Fr::zero(); 10], StateLeaf::as_fields);
            witness.current_state_paths[i] = self.state_tree.path_element_of(snapshot_idx)?;
            let (current_weight, vote_path) = match self.vote_books.get(&snapshot_idx) {
                Some(book) => (
                    book.tree.leaf(snapshot_vo)?,
                    book.tree.path_element_of(snapshot_vo)?,
                ),
                None => (
                    Fr::zero(),
                    self.empty_vote_tree.path_element_of(snapshot_vo)?,
                ),
            };
            witness.current_vote_weights[i] = current_weight;
            witness.current_vote_paths[i] = vote_path;
            witness.active_state_leaves[i] = self.active_tree.leaf(snapshot_idx)?;
            witness.active_state_paths[i] = self.active_tree.path_element_of(snapshot_idx)?;

            let Some(command) = command else {
                log::debug!("slot {i}: no command");
                continue;
            };
            let state_idx = command.packed.state_idx as usize;
            let vo_idx = command.packed.vo_idx as usize;
            let new_votes = command.packed.new_votes;

            if state_idx >= self.state_leaves.len() {
                log::debug!("slot {i}: state index {state_idx} out of range");
                continue;
            }
            if vo_idx >= self.config.max_vote_options {
                log::debug!("slot {i}: vote option {vo_idx} out of range");
                continue;
            }
            let leaf = &self.state_leaves[state_idx];
            if command.packed.nonce != leaf.nonce + 1 {
                log::debug!(
                    "slot {i}: nonce {} against state nonce {}",
                    command.packed.nonce,
                    leaf.nonce
                );
                continue;
            }
            let pk = EdwardsAffine::new_unchecked(leaf.pub_key.0, leaf.pub_key.1);
            if !command.verify_signature(&pk) {
                log::debug!("slot {i}: signature rejected");
                continue;
            }
            let current_votes = self
                .vote_books
                .get(&state_idx)
                .map_or(0, |book| book.weights[vo_idx]);
            let Some(new_balance) = cost.apply(leaf.balance, current_votes, new_votes) else {
                log::debug!("slot {i}: insufficient balance");
                continue;
            };

            // Apply.
            let book = self.vote_books.entry(state_idx).or_insert_with(|| VoteBook {
                tree: self.empty_vote_tree.clone(),
                weights: vec![0; option_capacity],
            });
            book.weights[vo_idx] = new_votes;
            book.tree.update_leaf(vo_idx, Fr::from(new_votes))?;
            let vote_option_root = book.tree.root();

            let leaf = &mut self.state_leaves[state_idx];
            leaf.vote_option_root = vote_option_root;
            leaf.balance = new_balance;
            leaf.nonce = command.packed.nonce;
            if !command.keeps_key() {
                leaf.pub_key = command.new_pub_key;
            }
            let leaf_hash = leaf.hash();
            self.state_tree.update_leaf(state_idx, leaf_hash)?;

            witness.state_indices[i] = state_idx;
            witness.valid[i] = true;
        }

        witness.new_state_root = self.state_tree.root();
        witness.new_state_commitment = hash2(witness.new_state_root, new_state_salt);
        witness.input_hash = witness.compute_input_hash();

        self.state_commitment = witness.new_state_commitment;
        self.state_salt = new_state_salt;
        self.msg_end_idx = batch_start;
        log::debug!(
            "vote batch [{batch_start}, {batch_end}): {} valid",
            witness.valid.iter().filter(|v| **v).count()
        );
        if batch_start == 0 {
            self.phase = Phase::Tallying;
        }
        Ok(witness)
    }

    /// Fold the next group of `5^int_state_tree_depth` voters into the
    /// tally. Transitions to Ended after the last group.
    pub fn process_tally(&mut self, tally_salt: Fr) -> Result<TallyWitness, OperatorError> {
        self.expect_phase(Phase::Tallying, "process_tally")?;

        let group_size = self.config.tally_batch_size();
        let start = self.tally_batch_num * group_size;
        let end = (start + group_size).min(self.state_leaves.len());
        if start > 0 && start >= self.state_leaves.len() {
            return Err(OperatorError::NothingToProcess);
        }

        let shift = tally_shift();
        let mut state_leaves = Vec::with_capacity(end.saturating_sub(start));
        let mut vote_weights = Vec::with_capacity(end.saturating_sub(start));
        for user in start..end {
            state_leaves.push(self.state_leaves[user].as_fields());
            let weights: Vec<Fr> = match self.vote_books.get(&user) {
                Some(book) => {
                    for (option, weight) in book
                        .weights
                        .iter()
                        .enumerate()
                        .take(self.config.max_vote_options)
                    {
                        let value = Fr::from(*weight);
                        self.tally[option] += value * (value + shift);
                    }
                    book.weights.iter().map(|w| Fr::from(*w)).collect()
                }
                None => vec![Fr::zero(); self.empty_vote_tree.capacity()],
            };
            vote_weights.push(weights);
        }

        self.tally_tree.init_leaves(&self.tally);
        let new_tally_commitment = hash2(self.tally_tree.root(), tally_salt);

        let mut packed = BigUint::from(self.state_leaves.len());
        packed |= BigUint::from(self.tally_batch_num) << 32u32;
        let packed_vals = Fr::from(packed);

        let mut witness = TallyWitness {
            batch_num: self.tally_batch_num,
            state_root: self.state_tree.root(),
            state_salt: self.state_salt,
            packed_vals,
            state_commitment: self.state_commitment,
            current_tally_commitment: self.current_tally_commitment,
            new_tally_commitment,
            input_hash: Fr::zero(),
            state_leaves,
            vote_weights,
            tally_leaves: self.tally.clone(),
        };
        witness.input_hash = witness.compute_input_hash();

        self.current_tally_commitment = new_tally_commitment;
        self.tally_salt = tally_salt;
        self.tally_batch_num += 1;
        if end >= self.state_leaves.len() {
            self.phase = Phase::Ended;
        }
        Ok(witness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaci_crypto::PackedCommand;
    use amaci_types::DEFAULT_DERIVATION_PATH;
    use ark_std::rand::rngs::StdRng;

    fn config() -> RoundConfig {
        RoundConfig {
            state_tree_depth: 2,
            vote_option_tree_depth: 1,
            int_state_tree_depth: 1,
            message_batch_size: 5,
            max_vote_options: 5,
            quadratic_cost: false,
            mnemonic_derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
        }
    }

    fn operator(rng: &mut StdRng) -> (Operator, Keypair) {
        let keypair = Keypair::random(rng).expect("keypair");
        let operator = Operator::new(config(), keypair.clone()).expect("operator");
        (operator, keypair)
    }

    /// Build one encrypted command the way a voter client would.
    fn encrypted_command(
        voter: &Keypair,
        operator_pk: &EdwardsAffine,
        packed: PackedCommand,
        new_pub_key: (Fr, Fr),
        rng: &mut StdRng,
    ) -> ([Fr; 7], (Fr, Fr)) {
        let command = Command::sign(packed, new_pub_key, voter).expect("sign");
        let ephemeral = Keypair::random(rng).expect("keypair");
        let shared = ephemeral.ecdh(operator_pk).expect("ecdh");
        let pk = ephemeral.public_key();
        (command.encrypt(&shared), (pk.x, pk.y))
    }

    #[test]
    fn phases_gate_operations() {
        let mut rng = ark_std::test_rng();
        let (mut op, _) = operator(&mut rng);

        assert!(matches!(
            op.process_messages(Fr::zero()),
            Err(OperatorError::WrongPhase { .. })
        ));
        assert!(matches!(
            op.process_tally(Fr::zero()),
            Err(OperatorError::WrongPhase { .. })
        ));

        op.end_vote_period().expect("end vote period");
        // Empty queue goes straight to tallying; filling is closed.
        assert_eq!(op.phase(), Phase::Tallying);
        assert!(matches!(
            op.push_message([Fr::zero(); 7], (Fr::zero(), Fr::zero())),
            Err(OperatorError::WrongPhase { .. })
        ));
    }

    #[test]
    fn signups_are_sequential_and_active() {
        let mut rng = ark_std::test_rng();
        let (mut op, _) = operator(&mut rng);
        let voter = Keypair::random(&mut rng).expect("keypair");

        op.init_state_tree(0, &voter.public_key(), 100, None, &mut rng)
            .expect("signup");
        assert_eq!(op.num_sign_ups(), 1);
        assert!(matches!(
            op.init_state_tree(3, &voter.public_key(), 100, None, &mut rng),
            Err(OperatorError::SignupOutOfOrder {
                expected: 1,
                got: 3
            })
        ));

        // The signup ciphertext decrypts to the even ("active") parity.
        let leaf = op.state_leaf(0).expect("leaf").clone();
        assert!(op.leaf_parity_even(&leaf).expect("parity"));
    }

    #[test]
    fn message_chain_is_maintained() {
        let mut rng = ark_std::test_rng();
        let (mut op, op_keys) = operator(&mut rng);
        let voter = Keypair::random(&mut rng).expect("keypair");
        op.init_state_tree(0, &voter.public_key(), 100, None, &mut rng)
            .expect("signup");

        for nonce in [2u32, 1u32] {
            let packed = PackedCommand::with_random_salt(nonce, 0, 0, 10, &mut rng);
            let pk = voter.public_key();
            let (ciphertext, enc_pk) =
                encrypted_command(&voter, &op_keys.public_key(), packed, (pk.x, pk.y), &mut rng);
            op.push_message(ciphertext, enc_pk).expect("push");
        }
        assert!(crate::message::verify_chain(op.messages()));
        assert!(op.messages().iter().all(|m| m.command.is_some()));
    }

    #[test]
    fn single_voter_round_applies_votes() {
        let mut rng = ark_std::test_rng();
        let (mut op, op_keys) = operator(&mut rng);
        let voter = Keypair::random(&mut rng).expect("keypair");
        op.init_state_tree(0, &voter.public_key(), 100, None, &mut rng)
            .expect("signup");

        // Reverse generation: nonce 2 enters the queue first, the
        // first-processed (nonce 1) message carries the sentinel key.
        let pk = voter.public_key();
        let plan = [(2u32, 1u32, 30u128, (pk.x, pk.y)), (1, 0, 50, (Fr::zero(), Fr::zero()))];
        for (nonce, option, weight, new_key) in plan {
            let packed = PackedCommand::with_random_salt(nonce, 0, option, weight, &mut rng);
            let (ciphertext, enc_pk) =
                encrypted_command(&voter, &op_keys.public_key(), packed, new_key, &mut rng);
            op.push_message(ciphertext, enc_pk).expect("push");
        }

        op.end_vote_period().expect("end vote period");
        let witness = op.process_messages(Fr::from(11u64)).expect("process");
        assert_eq!(witness.valid.iter().filter(|v| **v).count(), 2);
        assert_eq!(witness.input_hash, witness.compute_input_hash());
        assert_eq!(op.phase(), Phase::Tallying);

        let leaf = op.state_leaf(0).expect("leaf");
        assert_eq!(leaf.balance, 20);
        assert_eq!(leaf.nonce, 2);

        op.process_tally(Fr::from(3u64)).expect("tally");
        assert_eq!(op.phase(), Phase::Ended);
        let results = op.tally_results();
        assert_eq!(results[0].0, 50);
        assert_eq!(results[1].0, 30);
        assert_eq!(results[2].0, 0);
    }

    #[test]
    fn deactivate_marks_and_blocks_repeats() {
        let mut rng = ark_std::test_rng();
        let (mut op, op_keys) = operator(&mut rng);
        let voter = Keypair::random(&mut rng).expect("keypair");
        op.init_state_tree(0, &voter.public_key(), 100, None, &mut rng)
            .expect("signup");

        for _ in 0..2 {
            let packed = PackedCommand::with_random_salt(1, 0, 0, 0, &mut rng);
            let (ciphertext, enc_pk) = encrypted_command(
                &voter,
                &op_keys.public_key(),
                packed,
                (Fr::zero(), Fr::zero()),
                &mut rng,
            );
            op.push_deactivate_message(ciphertext, enc_pk).expect("push");
        }

        let witness = op
            .process_deactivate_messages(4, 1)
            .expect("process deactivate");
        // The first command deactivates; the repeat sees a non-zero
        // active-state leaf and errors.
        assert_eq!(witness.valid, vec![true, false, false, false]);
        assert_eq!(op.deactivate_leaves().len(), 2);
        assert_eq!(witness.input_hash, witness.compute_input_hash());

        // A valid deactivation's leaf decrypts odd, the errored one even.
        let valid_leaf =
            ElGamalCiphertext::from_fields(&op.deactivate_leaves()[0][..4].try_into().expect("4"))
                .expect("ciphertext");
        assert!(decrypt_parity(&op_keys.secret_scalar(), &valid_leaf, Fr::zero())
            .expect("parity"));
        let errored_leaf =
            ElGamalCiphertext::from_fields(&op.deactivate_leaves()[1][..4].try_into().expect("4"))
                .expect("ciphertext");
        assert!(!decrypt_parity(&op_keys.secret_scalar(), &errored_leaf, Fr::zero())
            .expect("parity"));

        // The shared-key tag lets the voter find their own leaf.
        assert_eq!(
            op.deactivate_leaves()[0][4],
            voter
                .shared_key_hash(&op_keys.public_key())
                .expect("shared key")
        );
    }

    #[test]
    fn deactivate_batches_reject_bad_arguments() {
        let mut rng = ark_std::test_rng();
        let (mut op, _) = operator(&mut rng);
        assert!(matches!(
            op.process_deactivate_messages(0, 0),
            Err(OperatorError::EmptyBatch)
        ));
        assert!(matches!(
            op.process_deactivate_messages(4, 1),
            Err(OperatorError::SubTreeTooLong {
                requested: 1,
                signed_up: 0
            })
        ));
        assert!(matches!(
            op.process_deactivate_messages(4, 0),
            Err(OperatorError::NothingToProcess)
        ));
    }
}


