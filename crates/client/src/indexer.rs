//! Consumed indexer interface.
//!
//! The core never talks to the chain or the indexer directly; callers
//! implement this trait over their transport and own the retry policy.
//! [`IndexerError::Unavailable`] is what surfaces after the transport layer
//! has exhausted its retries.

use ark_bn254::Fr;
use async_trait::async_trait;

/// Errors surfaced by indexer implementations.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
    /// The indexer could not be reached after retries.
    #[error("indexer unavailable: {0}")]
    Unavailable(String),
    /// The indexer returned data the core cannot interpret.
    #[error("malformed indexer response: {0}")]
    Malformed(String),
}

/// Read-only view of the on-chain event log.
#[async_trait]
pub trait Indexer {
    /// All deactivate leaves of a round, in append order; five field
    /// elements per leaf.
    async fn fetch_all_deactivate_logs(
        &self,
        contract: &str,
    ) -> Result<Vec<[Fr; 5]>, IndexerError>;

    /// The state index a public key signed up under, if any.
    async fn get_sign_up_event_by_pub_key(
        &self,
        contract: &str,
        pub_key: (Fr, Fr),
    ) -> Result<Option<u64>, IndexerError>;
}
