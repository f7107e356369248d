//! Identity of the lease the pod group competes for

use crate::{
    error::Result,
    labels::{K8S_COMPONENT, K8S_NAME},
    pod::PodStore,
};
use std::collections::BTreeMap;
use std::fmt;

/// Name, namespace and holder identity of the election lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockDescriptor {
    /// `<app.kubernetes.io/name>-<app.kubernetes.io/component>`
    pub name: String,
    /// Same namespace as the pod
    pub namespace: String,
    /// The pod name
    pub holder_identity: String,
}

impl LockDescriptor {
    /// Derive the descriptor from a pod's labels.
    ///
    /// Missing labels yield empty name segments; the result is not validated.
    pub fn from_labels(
        labels: &BTreeMap<String, String>,
        namespace: impl Into<String>,
        holder_identity: impl Into<String>,
    ) -> Self {
        let app_name = labels.get(K8S_NAME).map(String::as_str).unwrap_or_default();
        let component = labels
            .get(K8S_COMPONENT)
            .map(String::as_str)
            .unwrap_or_default();

        Self {
            name: format!("{}-{}", app_name, component),
            namespace: namespace.into(),
            holder_identity: holder_identity.into(),
        }
    }

    /// Read the pod once and derive the descriptor from its labels
    pub async fn build<S: PodStore + ?Sized>(
        store: &S,
        namespace: &str,
        pod_name: &str,
    ) -> Result<Self> {
        let snapshot = store.get_labels().await?;
        Ok(Self::from_labels(&snapshot.labels, namespace, pod_name))
    }
}

impl fmt::Display for LockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({})", self.namespace, self.name, self.holder_identity)
    }
}
