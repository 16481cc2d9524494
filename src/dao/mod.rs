/// Row-level database backends behind the synchronized store.
pub mod backend;
/// Claim store contract and its local and synchronized implementations.
pub mod claim_store;
/// Domain entities shared by every layer.
pub mod models;
/// Storage and claim error types.
pub mod storage;
