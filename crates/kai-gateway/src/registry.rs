//! Process-wide map of active calls.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use kai_core::error::{KaiError, Result};

use crate::call::CallSession;

#[derive(Default)]
pub struct CallRegistry {
    calls: RwLock<HashMap<String, Arc<CallSession>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call. Fails if the call id is already active.
    pub async fn insert(&self, session: Arc<CallSession>) -> Result<()> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(&session.call_id) {
            return Err(KaiError::Session(format!(
                "call {} is already active",
                session.call_id
            )));
        }
        calls.insert(session.call_id.clone(), session);
        #[cfg(feature = "metrics")]
        crate::metrics::record_call_start();
        Ok(())
    }

    pub async fn remove(&self, call_id: &str) -> Option<Arc<CallSession>> {
        let removed = self.calls.write().await.remove(call_id);
        #[cfg(feature = "metrics")]
        if removed.is_some() {
            crate::metrics::record_call_end();
        }
        removed
    }

    pub async fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.calls.read().await.get(call_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.calls.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.calls.read().await.is_empty()
    }

    pub async fn call_ids(&self) -> Vec<String> {
        self.calls.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::test_support::session;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let registry = CallRegistry::new();
        let (s, _w) = session("MZ-a");
        registry.insert(s.clone()).await.unwrap();
        assert_eq!(registry.len().await, 1);
        assert!(registry.get("MZ-a").await.is_some());

        let (dup, _w2) = session("MZ-a");
        assert!(registry.insert(dup).await.is_err());

        assert!(registry.remove("MZ-a").await.is_some());
        assert!(registry.remove("MZ-a").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_calls_are_isolated() {
        let registry = Arc::new(CallRegistry::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let (s, _w) = session(&format!("MZ-{i}"));
                registry.insert(s).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut ids = registry.call_ids().await;
        ids.sort();
        assert_eq!(ids.len(), 16);
        assert!(ids.contains(&"MZ-15".to_string()));
    }
}
