//! Full-round scenarios over literal inputs.

use amaci_client::build_add_new_key_witness;
use amaci_crypto::elgamal::{decrypt_parity, encrypt_parity, rerandomize};
use amaci_crypto::keypair::Keypair;
use amaci_operator::verify_chain;
use amaci_tree::{QuinTree, TreeError};
use amaci_types::TREE_DEGREE;
use anyhow::Result;
use ark_bn254::Fr;
use ark_ed_on_bn254::Fr as SubgroupScalar;
use ark_ff::{Field, UniformRand};

use super::utils::{Round, reference_config};

/// Three voters, linear cost, depth 2.
#[test]
fn three_voters_linear_round() -> Result<()> {
    let mut rng = ark_std::test_rng();
    let mut round = Round::new(reference_config(false), &[100, 100, 100], &mut rng)?;

    let v1 = round.client(0)?.build_vote_payload(0, &[(0, 50), (1, 30)], &mut rng)?;
    let v2 = round.client(1)?.build_vote_payload(1, &[(1, 40), (2, 20)], &mut rng)?;
    round.push(&v1)?;
    round.push(&v2)?;
    assert!(verify_chain(round.operator.messages()));

    round.run_to_completion()?;

    assert_eq!(round.linear_tallies(), vec![50, 70, 20, 0, 0]);
    assert_eq!(round.balance(0), 20);
    assert_eq!(round.balance(1), 40);
    assert_eq!(round.balance(2), 100);
    Ok(())
}

/// Deactivate, rebind a fresh key, vote again with it.
#[test]
fn deactivate_then_add_new_key() -> Result<()> {
    let mut rng = ark_std::test_rng();
    let mut round = Round::new(reference_config(false), &[100, 100, 100], &mut rng)?;

    // The same traffic as the linear three-voter round.
    let v1 = round.client(0)?.build_vote_payload(0, &[(0, 50), (1, 30)], &mut rng)?;
    let v2 = round.client(1)?.build_vote_payload(1, &[(1, 40), (2, 20)], &mut rng)?;
    round.push(&v1)?;
    round.push(&v2)?;

    // V1 deactivates; the operator services the deactivate queue during the
    // voting period so the leaf is available for rebinding.
    let deactivate = round.client(0)?.build_deactivate_payload(0, &mut rng)?;
    round.push_deactivate(&deactivate)?;
    let witness = round.operator.process_deactivate_messages(2, 3)?;
    assert!(witness.valid[0]);

    // V1 locates its leaf, re-randomizes and binds a fresh key at the next
    // state index with the original balance.
    let old_key = round.voters[0].clone();
    let add_witness = build_add_new_key_witness(
        &old_key,
        &round.operator_keys.public_key(),
        round.operator.deactivate_leaves(),
        round.operator.config().deactivate_tree_depth(),
        &mut rng,
    )?;
    let rebind_index = round.operator.num_sign_ups();
    assert_eq!(rebind_index, 3);

    let fresh = Keypair::random(&mut rng)?;
    round.operator.init_state_tree(
        rebind_index,
        &fresh.public_key(),
        100,
        Some(add_witness.rebound_ciphertext()?),
        &mut rng,
    )?;
    round.voters.push(fresh);

    let v1_new = round.client(3)?.build_vote_payload(
        u32::try_from(rebind_index)?,
        &[(2, 60), (3, 25)],
        &mut rng,
    )?;
    round.push(&v1_new)?;

    round.run_to_completion()?;

    assert_eq!(round.linear_tallies(), vec![50, 70, 80, 25, 0]);

    // The nullifier is a deterministic function of the old key: a second
    // witness build reproduces it bit for bit, so the verifier can spot any
    // second rebinding attempt.
    let replay = build_add_new_key_witness(
        &old_key,
        &round.operator_keys.public_key(),
        round.operator.deactivate_leaves(),
        round.operator.config().deactivate_tree_depth(),
        &mut rng,
    )?;
    assert_eq!(replay.nullifier, add_witness.nullifier);
    Ok(())
}

/// Two separate payloads both restart from nonce 1; reverse processing
/// applies the later one and rejects the earlier.
#[test]
fn nonce_coherence_across_payloads() -> Result<()> {
    let mut rng = ark_std::test_rng();
    let mut round = Round::new(reference_config(false), &[100], &mut rng)?;

    let first = round.client(0)?.build_vote_payload(0, &[(0, 5)], &mut rng)?;
    let second = round.client(0)?.build_vote_payload(0, &[(2, 3)], &mut rng)?;
    round.push(&first)?;
    round.push(&second)?;

    round.operator.end_vote_period()?;
    let witness = round.operator.process_messages(Fr::from(1u64))?;
    // Queue order [first, second]; slots beyond are padding. The later
    // payload is consumed first and succeeds; the earlier one then fails
    // the nonce check but stays in the transcript.
    assert_eq!(witness.valid, vec![false, true, false, false, false]);
    assert_eq!(round.operator.messages().len(), 2);

    while round.operator.phase() == amaci_operator::Phase::Tallying {
        round.operator.process_tally(Fr::from(9u64))?;
    }
    assert_eq!(round.linear_tallies(), vec![0, 0, 3, 0, 0]);
    assert_eq!(round.balance(0), 97);
    Ok(())
}

/// Index `5^depth` is rejected, `5^depth - 1` accepted.
#[test]
fn tree_bounds() {
    let tree = QuinTree::new(TREE_DEGREE, 2, Fr::ZERO).expect("tree");
    assert!(tree.leaf(24).is_ok());
    assert!(matches!(
        tree.leaf(25),
        Err(TreeError::LeafIndexOutOfBounds { index: 25, .. })
    ));
}

/// Re-randomization preserves the odd parity while changing the
/// ciphertext.
#[test]
fn rerandomization_invariance() -> Result<()> {
    let mut rng = ark_std::test_rng();
    let operator = Keypair::random(&mut rng)?;

    let randomness = SubgroupScalar::rand(&mut rng);
    let (ciphertext, _) = encrypt_parity(true, &operator.public_key(), &randomness)?;
    for _ in 0..4 {
        let fresh = SubgroupScalar::rand(&mut rng);
        let rerandomized = rerandomize(&operator.public_key(), &ciphertext, &fresh)?;
        assert_ne!(rerandomized, ciphertext);
        assert!(decrypt_parity(
            &operator.secret_scalar(),
            &rerandomized,
            Fr::ZERO
        )?);
    }
    Ok(())
}

/// Quadratic accounting accepts cost 89 and retains, without applying,
/// the command that would push the cost to 113.
#[test]
fn quadratic_accounting() -> Result<()> {
    let mut rng = ark_std::test_rng();
    let mut round = Round::new(reference_config(true), &[100, 100], &mut rng)?;

    // Valid plan: 5^2 + 8^2 = 89 <= 100.
    let valid = round.client(0)?.build_vote_payload(0, &[(0, 5), (1, 8)], &mut rng)?;
    // Overdrawn plan: 7^2 + 8^2 = 113 > 100. The (0,7) command applies,
    // the (1,8) command exceeds the remaining credits.
    let overdrawn = round.client(1)?.build_vote_payload(1, &[(0, 7), (1, 8)], &mut rng)?;
    round.push(&valid)?;
    round.push(&overdrawn)?;

    round.operator.end_vote_period()?;
    let witness = round.operator.process_messages(Fr::from(1u64))?;
    // Slot order: [v0 nonce2, v0 nonce1, v1 nonce2, v1 nonce1, padding].
    assert_eq!(witness.valid, vec![true, true, false, true, false]);
    // The rejected command is retained in the transcript.
    assert_eq!(round.operator.messages().len(), 4);
    assert!(verify_chain(round.operator.messages()));

    while round.operator.phase() == amaci_operator::Phase::Tallying {
        round.operator.process_tally(Fr::from(5u64))?;
    }

    assert_eq!(round.linear_tallies(), vec![12, 8, 0, 0, 0]);
    assert_eq!(round.balance(0), 11);
    // Voter 1 paid only for the applied 7-weight vote.
    assert_eq!(round.balance(1), 51);

    // The quadratic sums are recoverable from the same leaves.
    let results = round.operator.tally_results();
    assert_eq!(results[0].1, 25 + 49);
    assert_eq!(results[1].1, 64);
    Ok(())
}

/// Witness bundles export to the positional circuit-input map the external
/// prover consumes.
#[test]
fn witness_bundle_exports_to_circuit_inputs() -> Result<()> {
    let mut rng = ark_std::test_rng();
    let mut round = Round::new(reference_config(false), &[100], &mut rng)?;
    let payload = round.client(0)?.build_vote_payload(0, &[(0, 10)], &mut rng)?;
    round.push(&payload)?;
    round.operator.end_vote_period()?;
    let witness = round.operator.process_messages(Fr::from(1u64))?;

    let mut inputs = amaci_prover::CircuitInputs::new();
    inputs.set_fr("inputHash", &witness.input_hash);
    inputs.set_fr_array("publicInputs", &witness.public_inputs());
    inputs.set_fr_matrix("msgs", &witness.messages.iter().map(|m| m.to_vec()).collect::<Vec<_>>());
    assert_eq!(inputs.signals.len(), 3);
    assert_eq!(witness.input_hash, witness.compute_input_hash());
    Ok(())
}


