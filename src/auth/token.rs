use super::AuthGate;
use crate::Result;
use async_trait::async_trait;
use subtle::ConstantTimeEq;

/// Authorizes a session that presents the configured admin token.
pub struct TokenAuth {
    expected: String,
    presented: Option<String>,
}

impl TokenAuth {
    pub fn new(expected: String, presented: Option<String>) -> Self {
        Self {
            expected,
            presented,
        }
    }
}

#[async_trait]
impl AuthGate for TokenAuth {
    async fn is_authorized(&self) -> Result<bool> {
        let Some(presented) = self.presented.as_deref() else {
            return Ok(false);
        };
        let expected = self.expected.as_bytes();
        if expected.is_empty() {
            return Ok(false);
        }
        Ok(expected.ct_eq(presented.as_bytes()).into())
    }
}
