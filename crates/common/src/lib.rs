//! Shared building blocks for the auth gateway crates
//!
//! Nothing here knows about OAuth or API keys. The other crates share the
//! redacting `Secret`, the `Clock` behind every expiry decision and the
//! token/digest helpers in `crypto`.

mod clock;
mod crypto;
mod error;
mod secret;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{constant_time_eq, digest, random_token};
pub use error::{Error, Result};
pub use secret::Secret;
