//! Coordinator state machine for the AMACI core.
//!
//! The operator owns every mutable tree of a round: the state tree, the
//! active-state tree, the append-only deactivate tree and the lazily
//! materialized per-voter vote-option trees. It ingests encrypted messages
//! into chained queues, processes deactivate batches forward and vote
//! batches in reverse, maintains the running commitments, and emits the
//! witness bundles an external Groth16 prover consumes.
//!
//! Everything here is synchronous and single-threaded; each `process_*`
//! call is an all-or-nothing transition on the in-memory trees.

mod cost;
mod leaf;
mod message;
mod operator;
mod witness;

pub use cost::{CommandCost, LinearCost, QuadraticCost, cost_for};
pub use leaf::StateLeaf;
pub use message::{Message, chain_hash, verify_chain};
pub use operator::{Operator, OperatorError, Phase};
pub use witness::{DeactivateWitness, ProcessMessagesWitness, TallyWitness};
