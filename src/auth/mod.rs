//! Admin authorization gate
//!
//! Answers a single question before any upload or catalog mutation: is the
//! current session allowed to administer the site?

pub mod mock;
pub mod token;

pub use mock::MockAuth;
pub use token::TokenAuth;

use crate::Result;
use async_trait::async_trait;

#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn is_authorized(&self) -> Result<bool>;
}
