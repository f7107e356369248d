//! Read-modify-write access to the labels of the sidecar's own pod

use crate::error::{Result, SidecarError};
use async_trait::async_trait;
use json_patch::{AddOperation, PatchOperation, TestOperation};
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, Patch, PatchParams},
    client::Client,
    ResourceExt,
};
use serde_json::json;
use std::collections::BTreeMap;

/// Labels of a pod together with the version they were read at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSnapshot {
    /// Current label map
    pub labels: BTreeMap<String, String>,
    /// Object version the labels were read at; writes are rejected if it moved
    pub resource_version: Option<String>,
}

impl LabelSnapshot {
    pub fn contains(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }
}

/// Label store for a single named pod.
///
/// `get_labels` failures are fatal for the caller. `set_labels` must fail with
/// [`SidecarError::ObjectWrite`] when the pod changed since the snapshot was
/// taken, or when the API rejects the update.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PodStore: Send + Sync {
    /// Fetch the pod and return its labels
    async fn get_labels(&self) -> Result<LabelSnapshot>;

    /// Write the full label map back, scoped to the snapshot's version
    async fn set_labels(&self, snapshot: &LabelSnapshot) -> Result<()>;
}

/// [`PodStore`] backed by the Kubernetes API
pub struct KubePodStore {
    api: Api<Pod>,
    namespace: String,
    name: String,
}

impl KubePodStore {
    /// Create a store for pod `name` in `namespace`
    pub fn new(client: Client, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            api: Api::namespaced(client, &namespace),
            namespace,
            name: name.into(),
        }
    }
}

#[async_trait]
impl PodStore for KubePodStore {
    async fn get_labels(&self) -> Result<LabelSnapshot> {
        let pod = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| SidecarError::object_read(&self.namespace, &self.name, e))?;

        Ok(LabelSnapshot {
            labels: pod.labels().clone(),
            resource_version: pod.resource_version(),
        })
    }

    async fn set_labels(&self, snapshot: &LabelSnapshot) -> Result<()> {
        let patch = label_patch(snapshot)?;

        self.api
            .patch(&self.name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|e| SidecarError::object_write(e.to_string()))?;

        tracing::debug!(
            "Updated labels of pod {}/{}: {:?}",
            self.namespace,
            self.name,
            snapshot.labels
        );
        Ok(())
    }
}

/// Build the JSON patch replacing the label map.
///
/// The leading `test` operation makes the API server reject the patch when the
/// resource version no longer matches the snapshot.
pub(crate) fn label_patch(snapshot: &LabelSnapshot) -> Result<json_patch::Patch> {
    let mut operations = Vec::with_capacity(2);

    if let Some(version) = &snapshot.resource_version {
        operations.push(PatchOperation::Test(TestOperation {
            path: "/metadata/resourceVersion".to_string(),
            value: json!(version),
        }));
    }

    operations.push(PatchOperation::Add(AddOperation {
        path: "/metadata/labels".to_string(),
        value: serde_json::to_value(&snapshot.labels)?,
    }));

    Ok(json_patch::Patch(operations))
}
