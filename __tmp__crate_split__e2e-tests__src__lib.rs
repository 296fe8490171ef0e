//! End-to-end tests for the AMACI core.
//!
//! These drive a full round through the public APIs: voter clients build
//! encrypted payloads, the operator ingests and processes them in batches,
//! and the tallies are decoded from the tally-tree encoding. No proving
//! backend is involved; the witness bundles are checked for internal
//! consistency instead.

#[cfg(test)]
mod tests;


