use crate::client::InstanceClient;
use crate::error::{ControllerError, Result};
use crate::patch::GuardedPatch;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use virtnet_core::Instance;

const JSON_PATCH_CONTENT_TYPE: &str = "application/json-patch+json";

/// HTTP client for instance records on the API server
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn instance_url(&self, namespace: &str, name: &str) -> String {
        format!(
            "{}/apis/kubevirt.io/v1/namespaces/{}/virtualmachineinstances/{}",
            self.base_url, namespace, name
        )
    }
}

#[async_trait]
impl InstanceClient for ApiClient {
    /// GET /apis/kubevirt.io/v1/namespaces/{namespace}/virtualmachineinstances/{name}
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Instance> {
        let url = self.instance_url(namespace, name);
        debug!("GET {}", url);

        let resp = self.client.get(&url).send().await.map_err(|e| {
            ControllerError::internal_error(format!("HTTP request failed: {}", e))
        })?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ControllerError::instance_not_found(namespace, name));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ControllerError::internal_error(format!(
                "GET instance failed with status {}: {}",
                status, body
            )));
        }

        resp.json::<Instance>().await.map_err(|e| {
            ControllerError::internal_error(format!("Failed to parse instance: {}", e))
        })
    }

    /// PATCH /apis/kubevirt.io/v1/namespaces/{namespace}/virtualmachineinstances/{name}
    async fn patch_instance(
        &self,
        namespace: &str,
        name: &str,
        patch: &GuardedPatch,
    ) -> Result<Instance> {
        let url = self.instance_url(namespace, name);
        debug!("PATCH {}", url);

        let resp = self
            .client
            .patch(&url)
            .header(CONTENT_TYPE, JSON_PATCH_CONTENT_TYPE)
            .body(patch.to_body()?)
            .send()
            .await
            .map_err(|e| ControllerError::patch_failed(namespace, name, e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            // A failed `test` operation comes back as 422, a stale write as 409
            if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
                warn!("Patch of instance {}/{} rejected: {}", namespace, name, body);
                return Err(ControllerError::concurrency_conflict(namespace, name, body));
            }
            if status == StatusCode::NOT_FOUND {
                return Err(ControllerError::instance_not_found(namespace, name));
            }
            return Err(ControllerError::patch_failed(
                namespace,
                name,
                format!("status {}: {}", status, body),
            ));
        }

        resp.json::<Instance>().await.map_err(|e| {
            ControllerError::internal_error(format!("Failed to parse instance: {}", e))
        })
    }
}
