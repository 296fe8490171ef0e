//! Voter-side building blocks.
//!
//! A voter client assembles vote, deactivate and add-new-key payloads from a
//! keypair and the operator's public key. Clients are independent of each
//! other and share nothing mutable; all chain and indexer I/O stays behind
//! the [`Indexer`] trait so the builders remain synchronous and pure.

mod add_new_key;
mod indexer;
mod voter;

pub use add_new_key::{AddNewKeyWitness, build_add_new_key_witness};
pub use indexer::{Indexer, IndexerError};
pub use voter::{ClientError, MessagePayload, VoterClient};
