//! Per-round protocol configuration.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DERIVATION_PATH, TREE_DEGREE};

/// Errors raised while validating a [`RoundConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A tree depth parameter was zero or too large to address with `usize`.
    #[error("invalid tree depth {0}")]
    InvalidDepth(usize),
    /// `max_vote_options` exceeds the capacity of the vote-option tree.
    #[error("max_vote_options {max} exceeds vote option tree capacity {capacity}")]
    TooManyVoteOptions {
        /// Configured option count.
        max: usize,
        /// `5^vote_option_tree_depth`.
        capacity: usize,
    },
    /// `message_batch_size` must be at least one message.
    #[error("message_batch_size must be non-zero")]
    EmptyBatch,
    /// `int_state_tree_depth` must not exceed `state_tree_depth`.
    #[error("int_state_tree_depth {int} exceeds state_tree_depth {state}")]
    IntDepthTooLarge {
        /// Tally subtree depth.
        int: usize,
        /// State tree depth.
        state: usize,
    },
}

/// Static parameters of one voting round.
///
/// The operator and every voter client must agree on these values; they fix
/// the tree geometries, the batch size the circuits were compiled for, and
/// the credit-accounting mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundConfig {
    /// State-tree depth; the round admits up to `5^state_tree_depth` voters.
    pub state_tree_depth: usize,
    /// Per-voter vote-option tree depth.
    pub vote_option_tree_depth: usize,
    /// Intermediate state-tree depth governing the tally batch size
    /// (`5^int_state_tree_depth` voters per tally batch).
    pub int_state_tree_depth: usize,
    /// Fixed number of messages consumed per process-messages call.
    pub message_batch_size: usize,
    /// Number of live vote options; at most `5^vote_option_tree_depth`.
    pub max_vote_options: usize,
    /// `true` for quadratic voice-credit accounting, `false` for linear.
    #[serde(default)]
    pub quadratic_cost: bool,
    /// BIP-32 path used when deriving keypairs from a mnemonic.
    #[serde(default = "default_path")]
    pub mnemonic_derivation_path: String,
}

fn default_path() -> String {
    DEFAULT_DERIVATION_PATH.to_string()
}

impl RoundConfig {
    /// Validate the configuration, returning it unchanged on success.
    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.state_tree_depth == 0 || self.state_tree_depth > 12 {
            return Err(ConfigError::InvalidDepth(self.state_tree_depth));
        }
        if self.vote_option_tree_depth == 0 || self.vote_option_tree_depth > 12 {
            return Err(ConfigError::InvalidDepth(self.vote_option_tree_depth));
        }
        if self.int_state_tree_depth > self.state_tree_depth {
            return Err(ConfigError::IntDepthTooLarge {
                int: self.int_state_tree_depth,
                state: self.state_tree_depth,
            });
        }
        if self.message_batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }
        let capacity = TREE_DEGREE.pow(u32::try_from(self.vote_option_tree_depth).map_err(
            |_| ConfigError::InvalidDepth(self.vote_option_tree_depth),
        )?);
        if self.max_vote_options > capacity {
            return Err(ConfigError::TooManyVoteOptions {
                max: self.max_vote_options,
                capacity,
            });
        }
        Ok(self)
    }

    /// Voter capacity of the state tree, `5^state_tree_depth`.
    pub fn state_tree_capacity(&self) -> usize {
        TREE_DEGREE.pow(u32::try_from(self.state_tree_depth).expect("depth <= 12"))
    }

    /// Depth of the deactivate tree. It is two levels deeper than the state
    /// tree so it can absorb repeated deactivations per signup.
    pub fn deactivate_tree_depth(&self) -> usize {
        self.state_tree_depth + 2
    }

    /// Number of voters folded per tally batch, `5^int_state_tree_depth`.
    pub fn tally_batch_size(&self) -> usize {
        TREE_DEGREE.pow(u32::try_from(self.int_state_tree_depth).expect("depth <= 12"))
    }
}
