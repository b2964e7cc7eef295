//! API key lifecycle for the auth gateway
//!
//! Keys look like `agk_<prefix>_<secret>`. The prefix is public and indexed
//! for lookup; only a digest of the secret is stored. Rotation keeps the old
//! key valid for the policy's grace period, after which the sweep task
//! revokes it.

pub mod error;
pub mod keys;
pub mod sweep;

pub use error::{Error, Result};
pub use keys::{ApiKeyManager, IssuedKey, PolicyDefaults, parse_presented_key};
pub use sweep::spawn_sweep_task;
