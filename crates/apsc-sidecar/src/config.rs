//! Command line and environment configuration

use crate::error::{Result, SidecarError};
use clap::Parser;

/// Label key used when `LABEL_KEY` is unset or empty
pub const DEFAULT_LABEL_KEY: &str = "apsc.knoppiks.de/state";

#[derive(Parser, Debug, Clone)]
#[clap(
    name = "apsc-sidecar",
    version,
    about = "Marks exactly one replica of a pod group as active via lease-based leader election"
)]
pub struct Args {
    /// Namespace of the pod this sidecar runs in
    #[clap(long, env = "POD_NAMESPACE", default_value = "")]
    pub pod_namespace: String,

    /// Name of the pod this sidecar runs in
    #[clap(long, env = "POD_NAME", default_value = "")]
    pub pod_name: String,

    /// Label set to "active" on the leading pod
    #[clap(long, env = "LABEL_KEY", default_value = DEFAULT_LABEL_KEY)]
    pub label_key: String,

    /// Enable debug logging
    #[clap(short, long)]
    pub debug: bool,
}

impl Args {
    /// Validate the parsed arguments into a [`SidecarConfig`]
    pub fn into_config(self) -> Result<SidecarConfig> {
        SidecarConfig::new(self.pod_namespace, self.pod_name, self.label_key)
    }
}

/// Validated sidecar configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarConfig {
    /// Pod namespace, also the lease namespace
    pub namespace: String,
    /// Pod name, also the lease holder identity
    pub pod_name: String,
    /// Label key toggled between present ("active") and absent
    pub label_key: String,
}

impl SidecarConfig {
    /// Build a configuration, rejecting empty required values.
    ///
    /// An empty label key falls back to [`DEFAULT_LABEL_KEY`].
    pub fn new(
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        label_key: impl Into<String>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let pod_name = pod_name.into();
        let mut label_key = label_key.into();

        if namespace.is_empty() {
            return Err(SidecarError::config("missing POD_NAMESPACE env var"));
        }
        if pod_name.is_empty() {
            return Err(SidecarError::config("missing POD_NAME env var"));
        }
        if label_key.is_empty() {
            label_key = DEFAULT_LABEL_KEY.to_string();
        }

        Ok(Self {
            namespace,
            pod_name,
            label_key,
        })
    }
}
