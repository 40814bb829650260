use crate::client::InstanceClient;
use crate::error::{ControllerError, Result};
use crate::patch::GuardedPatch;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use virtnet_core::{record_key, Instance};

fn instance_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn decode(doc: &Value) -> Result<Instance> {
    serde_json::from_value(doc.clone()).map_err(|e| {
        ControllerError::internal_error(format!("Stored instance is invalid: {}", e))
    })
}

/// In-memory instance store for tests and dry runs
///
/// Instances are kept as raw documents, like an API server keeps them, so
/// fields the records do not model are part of every precondition check.
/// Patches are applied with real JSON-Patch semantics. A failure can be
/// injected to simulate API errors.
#[derive(Clone, Default)]
pub struct MockInstanceStore {
    documents: Arc<RwLock<HashMap<String, Value>>>,
    patch_failure: Arc<RwLock<Option<String>>>,
    patch_count: Arc<RwLock<usize>>,
}

impl MockInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: Instance) {
        let key = instance_key(instance.namespace(), instance.name());
        match serde_json::to_value(&instance) {
            Ok(doc) => {
                self.documents.write().await.insert(key.clone(), doc);
                debug!("Mock: instance stored: {}", key);
            }
            Err(e) => warn!("Mock: cannot store instance {}: {}", key, e),
        }
    }

    /// Store a raw instance document as a server would hold it
    pub async fn insert_document(&self, doc: Value) -> Result<()> {
        let instance = decode(&doc)?;
        let (namespace, name) = record_key(&instance.metadata, "instance")?;
        let key = instance_key(namespace, name);
        self.documents.write().await.insert(key.clone(), doc);
        debug!("Mock: document stored: {}", key);
        Ok(())
    }

    /// Raw stored document, including fields the records do not model
    pub async fn document(&self, namespace: &str, name: &str) -> Option<Value> {
        self.documents
            .read()
            .await
            .get(&instance_key(namespace, name))
            .cloned()
    }

    /// Make every following patch fail with `message`
    pub async fn fail_patches_with(&self, message: impl Into<String>) {
        *self.patch_failure.write().await = Some(message.into());
    }

    /// Number of patches accepted so far
    pub async fn patch_count(&self) -> usize {
        *self.patch_count.read().await
    }
}

#[async_trait]
impl InstanceClient for MockInstanceStore {
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Instance> {
        let documents = self.documents.read().await;
        let doc = documents
            .get(&instance_key(namespace, name))
            .ok_or_else(|| ControllerError::instance_not_found(namespace, name))?;
        decode(doc)
    }

    async fn patch_instance(
        &self,
        namespace: &str,
        name: &str,
        patch: &GuardedPatch,
    ) -> Result<Instance> {
        if let Some(message) = self.patch_failure.read().await.as_ref() {
            return Err(ControllerError::patch_failed(namespace, name, message.clone()));
        }

        let key = instance_key(namespace, name);
        let mut documents = self.documents.write().await;
        let stored = documents
            .get_mut(&key)
            .ok_or_else(|| ControllerError::instance_not_found(namespace, name))?;

        for (path, expected) in patch.preconditions() {
            if stored.pointer(path) != Some(expected) {
                return Err(ControllerError::concurrency_conflict(
                    namespace,
                    name,
                    format!("test failed at {}", path),
                ));
            }
        }
        let mut doc = stored.clone();
        json_patch::patch(&mut doc, &patch.to_json_patch()?.0)
            .map_err(|e| ControllerError::patch_failed(namespace, name, e.to_string()))?;
        let instance = decode(&doc)?;

        *stored = doc;
        *self.patch_count.write().await += 1;
        debug!("Mock: instance patched: {}", key);
        Ok(instance)
    }
}
