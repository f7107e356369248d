//! Label keys and values read or written on the sidecar's pod.

// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/

/// Standard label for the name of the application, first half of the lock name
pub const K8S_NAME: &str = "app.kubernetes.io/name";

/// Standard label for the component within the architecture, second half of the lock name
pub const K8S_COMPONENT: &str = "app.kubernetes.io/component";

/// Value written under the configured label key while this pod leads
pub const ACTIVE_VALUE: &str = "active";
