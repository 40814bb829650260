use crate::error::Result;
use crate::patch::GuardedPatch;
use async_trait::async_trait;
use virtnet_core::Instance;

/// Trait for the instance record store
///
/// Abstracts the API server so the reconcilers can be driven against
/// `MockInstanceStore` in tests and dry runs.
#[async_trait]
pub trait InstanceClient: Send + Sync {
    /// Fetch an instance record
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Instance>;

    /// Apply a guarded patch, failing with `ConcurrencyConflict` when a
    /// precondition does not hold
    async fn patch_instance(
        &self,
        namespace: &str,
        name: &str,
        patch: &GuardedPatch,
    ) -> Result<Instance>;
}
