use super::AuthGate;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct MockAuth {
    authorized: Arc<AtomicBool>,
    check_count: Arc<AtomicUsize>,
}

impl MockAuth {
    pub fn new() -> Self {
        Self {
            authorized: Arc::new(AtomicBool::new(true)),
            check_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn denied() -> Self {
        let auth = Self::new();
        auth.set_authorized(false);
        auth
    }

    pub fn set_authorized(&self, authorized: bool) {
        self.authorized.store(authorized, Ordering::SeqCst);
    }

    pub fn get_check_count(&self) -> usize {
        self.check_count.load(Ordering::SeqCst)
    }
}

impl Default for MockAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthGate for MockAuth {
    async fn is_authorized(&self) -> Result<bool> {
        self.check_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.authorized.load(Ordering::SeqCst))
    }
}
