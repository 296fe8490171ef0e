//! Round harness shared by the scenarios.

use amaci_client::{MessagePayload, VoterClient};
use amaci_crypto::Keypair;
use amaci_operator::{Operator, Phase};
use amaci_types::{DEFAULT_DERIVATION_PATH, RoundConfig};
use anyhow::Result;
use ark_bn254::Fr;
use ark_std::rand::rngs::StdRng;

/// The reference configuration used by the scenarios:
/// 25 voters, 5 options, batch size 5.
pub fn reference_config(quadratic_cost: bool) -> RoundConfig {
    RoundConfig {
        state_tree_depth: 2,
        vote_option_tree_depth: 1,
        int_state_tree_depth: 1,
        message_batch_size: 5,
        max_vote_options: 5,
        quadratic_cost,
        mnemonic_derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
    }
}

/// A round under construction: the operator plus the voters' clients.
pub struct Round {
    pub operator: Operator,
    pub operator_keys: Keypair,
    pub voters: Vec<Keypair>,
}

impl Round {
    /// Start a round and sign up `balances.len()` voters.
    pub fn new(config: RoundConfig, balances: &[u128], rng: &mut StdRng) -> Result<Self> {
        let operator_keys = Keypair::random(rng)?;
        let mut operator = Operator::new(config, operator_keys.clone())?;
        let mut voters = Vec::with_capacity(balances.len());
        for (index, balance) in balances.iter().enumerate() {
            let voter = Keypair::random(rng)?;
            operator.init_state_tree(index, &voter.public_key(), *balance, None, rng)?;
            voters.push(voter);
        }
        Ok(Self {
            operator,
            operator_keys,
            voters,
        })
    }

    /// A payload builder for the voter at `index`.
    pub fn client(&self, index: usize) -> Result<VoterClient> {
        Ok(VoterClient::new(
            self.voters[index].clone(),
            self.operator_keys.public_key(),
        )?)
    }

    /// Push a vote payload into the operator's queue.
    pub fn push(&mut self, payload: &[MessagePayload]) -> Result<()> {
        for message in payload {
            let pk = message.ephemeral_pub_key;
            self.operator.push_message(message.ciphertext, (pk.x, pk.y))?;
        }
        Ok(())
    }

    /// Push a deactivate payload into its queue.
    pub fn push_deactivate(&mut self, payload: &[MessagePayload]) -> Result<()> {
        for message in payload {
            let pk = message.ephemeral_pub_key;
            self.operator
                .push_deactivate_message(message.ciphertext, (pk.x, pk.y))?;
        }
        Ok(())
    }

    /// Close the period and run every vote and tally batch.
    pub fn run_to_completion(&mut self) -> Result<()> {
        self.operator.end_vote_period()?;
        let mut salt = 1u64;
        while self.operator.phase() == Phase::Processing {
            self.operator.process_messages(Fr::from(salt))?;
            salt += 1;
        }
        while self.operator.phase() == Phase::Tallying {
            self.operator.process_tally(Fr::from(salt))?;
            salt += 1;
        }
        assert_eq!(self.operator.phase(), Phase::Ended);
        Ok(())
    }

    /// The linear per-option totals.
    pub fn linear_tallies(&self) -> Vec<u128> {
        self.operator
            .tally_results()
            .into_iter()
            .map(|(sum, _)| sum)
            .collect()
    }

    /// The remaining balance of the voter at `index`.
    pub fn balance(&self, index: usize) -> u128 {
        self.operator
            .state_leaf(index)
            .expect("signed up")
            .balance
    }
}

