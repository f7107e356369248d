//! Active/passive sidecar for Kubernetes
//!
//! This crate marks exactly one replica of a pod group as active by setting a
//! label on its pod while it holds a coordination lease, and removes the label
//! when leadership is lost or the sidecar shuts down.

pub mod config;
pub mod election;
pub mod error;
pub mod labels;
pub mod lock;
pub mod pod;
pub mod shutdown;
pub mod sidecar;

pub use config::{Args, SidecarConfig, DEFAULT_LABEL_KEY};
pub use election::{ElectionConfig, KubeLeaseLock, LeaderElector, LeadershipCallbacks, LeaseLock};
pub use error::{Result, SidecarError};
pub use lock::LockDescriptor;
pub use pod::{KubePodStore, LabelSnapshot, PodStore};
pub use sidecar::{SideCar, Transition};
