//! Handler registration, grounded in the teacher's `kernel::jobs::registry::JobRegistry`:
//! a map from a string key to a boxed async closure, keyed here by a plain
//! job-type string rather than a typed `CommandMeta`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// A unit of work dispatched by job type. Implementors receive the job's
/// opaque payload and return an opaque result or an error.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, data: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

#[async_trait]
impl<F, Fut> JobHandler for F
where
    F: Fn(serde_json::Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = anyhow::Result<serde_json::Value>> + Send,
{
    async fn handle(&self, data: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        (self)(data).await
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_type: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(job_type.into(), handler);
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closures_can_register_directly() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            "echo",
            Arc::new(|data: serde_json::Value| async move { Ok(data) }),
        );

        assert!(registry.is_registered("echo"));
        let handler = registry.get("echo").unwrap();
        let out = handler.handle(serde_json::json!({"a": 1})).await.unwrap();
        assert_eq!(out, serde_json::json!({"a": 1}));
    }

    #[test]
    fn unregistered_type_is_absent() {
        let registry = HandlerRegistry::new();
        assert!(!registry.is_registered("missing"));
        assert!(registry.get("missing").is_none());
    }
}
