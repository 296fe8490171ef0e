//! Vote and deactivate payload assembly.

use ark_bn254::Fr;
use ark_ed_on_bn254::EdwardsAffine;
use ark_ff::Zero;
use ark_std::rand::Rng;

use amaci_crypto::babyjubjub::CurveError;
use amaci_crypto::keypair::{Keypair, KeypairError};
use amaci_crypto::{Command, CommandError, PackedCommand};
use amaci_tree::TreeError;

/// Errors raised by payload construction.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The selection plan names the same option twice.
    #[error("duplicate vote option {0}")]
    DuplicateOption(u32),
    /// The selection plan is empty after dropping zero weights.
    #[error("no non-zero selections")]
    EmptyPlan,
    /// No deactivate leaf carries this voter's shared-key tag.
    #[error("no deactivate leaf for this key")]
    NoDeactivate,
    /// Key material was rejected.
    #[error(transparent)]
    Keypair(#[from] KeypairError),
    /// A point failed curve validation.
    #[error(transparent)]
    Curve(#[from] CurveError),
    /// Command packing failed.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Rebuilding the deactivate tree failed.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// An odd/even ciphertext operation failed.
    #[error(transparent)]
    ElGamal(#[from] amaci_crypto::ElGamalError),
}

/// One encrypted message ready for publication: seven ciphertext elements
/// plus the ephemeral public key, nine field elements on the wire.
#[derive(Clone, Debug)]
pub struct MessagePayload {
    /// Poseidon-cipher output.
    pub ciphertext: [Fr; 7],
    /// The fresh ephemeral public key used for this message's ECDH.
    pub ephemeral_pub_key: EdwardsAffine,
}

impl MessagePayload {
    /// The on-chain serialization: ciphertext followed by the ephemeral
    /// key coordinates.
    pub fn to_fields(&self) -> [Fr; 9] {
        [
            self.ciphertext[0],
            self.ciphertext[1],
            self.ciphertext[2],
            self.ciphertext[3],
            self.ciphertext[4],
            self.ciphertext[5],
            self.ciphertext[6],
            self.ephemeral_pub_key.x,
            self.ephemeral_pub_key.y,
        ]
    }
}

/// A voter's payload builder.
pub struct VoterClient {
    keypair: Keypair,
    operator_pub_key: EdwardsAffine,
}

impl VoterClient {
    /// Create a client for one voter keypair and the round's operator key.
    pub fn new(keypair: Keypair, operator_pub_key: EdwardsAffine) -> Result<Self, ClientError> {
        amaci_crypto::babyjubjub::validate_point(&operator_pub_key)?;
        Ok(Self {
            keypair,
            operator_pub_key,
        })
    }

    /// Create a client from the operator key in its packed configuration
    /// form.
    pub fn from_packed_operator_key(
        keypair: Keypair,
        packed: &[u8; 32],
    ) -> Result<Self, ClientError> {
        let operator_pub_key = amaci_crypto::babyjubjub::unpack_public_key(packed)?;
        Self::new(keypair, operator_pub_key)
    }

    /// The voter's keypair.
    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    /// Build the payload for a full voting plan.
    ///
    /// Duplicate option indices are rejected, zero-weight selections are
    /// dropped and the rest sorted by option index. Messages are generated
    /// in reverse plan order so the operator's reverse batch processing
    /// consumes nonces `1..=k` ascending; the last-produced message (nonce
    /// 1, first to be processed) carries the `(0, 0)` no-rotation sentinel,
    /// all others the voter's current key. Everything a voter intends for
    /// one round must be in a single payload: a separate payload restarts
    /// from nonce 1 and invalidates the earlier one.
    pub fn build_vote_payload<R: Rng + ?Sized>(
        &self,
        state_idx: u32,
        selections: &[(u32, u128)],
        rng: &mut R,
    ) -> Result<Vec<MessagePayload>, ClientError> {
        let mut seen = std::collections::BTreeSet::new();
        for (option, _) in selections {
            if !seen.insert(*option) {
                return Err(ClientError::DuplicateOption(*option));
            }
        }
        let mut plan: Vec<(u32, u128)> = selections
            .iter()
            .copied()
            .filter(|(_, weight)| *weight != 0)
            .collect();
        if plan.is_empty() {
            return Err(ClientError::EmptyPlan);
        }
        plan.sort_by_key(|(option, _)| *option);

        self.build_messages(state_idx, &plan, rng)
    }

    /// Build a deactivate payload: a single nonce-1 message with a zero
    /// selection.
    pub fn build_deactivate_payload<R: Rng + ?Sized>(
        &self,
        state_idx: u32,
        rng: &mut R,
    ) -> Result<Vec<MessagePayload>, ClientError> {
        self.build_messages(state_idx, &[(0, 0)], rng)
    }

    fn build_messages<R: Rng + ?Sized>(
        &self,
        state_idx: u32,
        plan: &[(u32, u128)],
        rng: &mut R,
    ) -> Result<Vec<MessagePayload>, ClientError> {
        let own_pk = self.keypair.public_key();
        let mut payload = Vec::with_capacity(plan.len());
        for (position, (option, weight)) in plan.iter().enumerate().rev() {
            let nonce = u32::try_from(position + 1).expect("plan length fits u32");
            let new_pub_key = if position == 0 {
                (Fr::zero(), Fr::zero())
            } else {
                (own_pk.x, own_pk.y)
            };
            let packed =
                PackedCommand::with_random_salt(nonce, state_idx, *option, *weight, rng);
            let command = Command::sign(packed, new_pub_key, &self.keypair)?;

            let ephemeral = Keypair::random(rng)?;
            let shared = ephemeral.ecdh(&self.operator_pub_key)?;
            payload.push(MessagePayload {
                ciphertext: command.encrypt(&shared),
                ephemeral_pub_key: ephemeral.public_key(),
            });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaci_crypto::keypair::verify;

    fn clients() -> (VoterClient, Keypair) {
        let mut rng = ark_std::test_rng();
        let operator = Keypair::random(&mut rng).expect("keypair");
        let voter = Keypair::random(&mut rng).expect("keypair");
        (
            VoterClient::new(voter, operator.public_key()).expect("client"),
            operator,
        )
    }

    fn decrypt_all(
        payload: &[MessagePayload],
        operator: &Keypair,
    ) -> Vec<Command> {
        payload
            .iter()
            .map(|message| {
                let shared = operator
                    .ecdh(&message.ephemeral_pub_key)
                    .expect("ecdh");
                Command::decrypt(&message.ciphertext, &shared).expect("decrypt")
            })
            .collect()
    }

    #[test]
    fn payload_is_reverse_ordered_with_sentinel() {
        let mut rng = ark_std::test_rng();
        let (client, operator) = clients();
        let payload = client
            .build_vote_payload(3, &[(0, 50), (1, 30)], &mut rng)
            .expect("payload");
        assert_eq!(payload.len(), 2);

        let commands = decrypt_all(&payload, &operator);
        // Produced in reverse plan order: nonce 2 first, then nonce 1.
        assert_eq!(commands[0].packed.nonce, 2);
        assert_eq!(commands[0].packed.vo_idx, 1);
        assert_eq!(commands[0].packed.new_votes, 30);
        assert!(!commands[0].keeps_key());
        assert_eq!(commands[1].packed.nonce, 1);
        assert_eq!(commands[1].packed.vo_idx, 0);
        assert_eq!(commands[1].packed.new_votes, 50);
        assert!(commands[1].keeps_key());

        let voter_pk = client.keypair().public_key();
        for command in &commands {
            assert!(verify(&voter_pk, command.msg_hash(), &command.signature));
        }
    }

    #[test]
    fn zero_weights_are_dropped_and_plan_sorted() {
        let mut rng = ark_std::test_rng();
        let (client, operator) = clients();
        let payload = client
            .build_vote_payload(0, &[(4, 7), (2, 0), (1, 9)], &mut rng)
            .expect("payload");
        let commands = decrypt_all(&payload, &operator);
      