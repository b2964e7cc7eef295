//! OAuth2 Authorization Code + PKCE for the auth gateway
//!
//! - `pkce`: verifier/challenge validation (RFC 7636)
//! - `clients`: the client registry
//! - `grant`: authorization code issuance and single-use consumption
//! - `token`: the token exchange engine (code exchange, refresh rotation,
//!   introspection, revocation, replay escalation)
//! - `purge`: background deletion of long-dead grants and tokens
//!
//! Every persisted read and write goes through `store::CredentialStore`.

pub mod clients;
pub mod constants;
pub mod error;
pub mod grant;
pub mod pkce;
pub mod purge;
pub mod token;

pub use clients::{ClientRegistry, validate_redirect_uri};
pub use error::{Error, Result};
pub use grant::{AuthorizationCodeIssuer, AuthorizationRequest, IssuedCode};
pub use purge::{purge_cycle, spawn_purge_task};
pub use token::{ExchangeStage, ReplayPolicy, TokenExchangeEngine, TokenLifetimes, TokenPair};
