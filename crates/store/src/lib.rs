//! Credential store for the auth gateway
//!
//! Owns the persisted form of every credential entity: OAuth clients,
//! authorization grants, access/refresh tokens, API keys, and key rotation
//! policies. The OAuth and API key crates hold only transient handles and
//! go through the `CredentialStore` trait for every read and write.
//!
//! The operations that need linearizability (grant consumption, refresh
//! token rotation, API key rotation/revocation) are single conditional
//! updates on the trait, so the callers never take locks of their own.
//!
//! Backends:
//! - `MemoryStore`: process-local tables, for tests and single-node dev
//! - `FileStore`: the same tables persisted to a JSON document with atomic
//!   temp-file + rename writes

pub mod backend;
pub mod error;
pub mod file;
pub mod memory;
pub mod models;
mod tables;

pub use backend::{CredentialStore, StoreFuture};
pub use error::{Error, Result};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use models::{
    ApiKey, ApiKeyStatus, AuthorizationGrant, ChallengeMethod, ClientStatus, ConsumeOutcome,
    KeyRotationPolicy, NewTokenPair, OAuthClient, PolicyScope, RotateOutcome, TokenKind,
    TokenRecord, TokenStatus,
};
