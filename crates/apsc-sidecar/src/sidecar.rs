//! Active/passive state machine driven by leadership changes

use crate::{
    config::SidecarConfig,
    election::{ElectionConfig, LeaderElector, LeadershipCallbacks, LeaseLock},
    error::{Result, SidecarError},
    labels::ACTIVE_VALUE,
    lock::LockDescriptor,
    pod::PodStore,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Outcome of a state machine operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The label was written and the flag updated
    Applied,
    /// Nothing to write
    Unchanged,
    /// The label write was rejected; the flag was left as it was
    WriteFailed,
}

/// Process-wide controller owning the active flag.
///
/// Transitions run under the flag's mutex, so a signal-triggered demotion
/// cannot interleave with a leadership-triggered read-modify-write.
pub struct SideCar<S> {
    config: SidecarConfig,
    store: S,
    active: Mutex<bool>,
    lock: OnceLock<LockDescriptor>,
    shutdown: CancellationToken,
    shutting_down: AtomicBool,
}

impl<S: PodStore> SideCar<S> {
    /// Create a passive sidecar
    pub fn new(config: SidecarConfig, store: S) -> Self {
        Self {
            config,
            store,
            active: Mutex::new(false),
            lock: OnceLock::new(),
            shutdown: CancellationToken::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Token cancelled on shutdown; stops the election loop
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Whether [`shutdown`](Self::shutdown) has started demoting
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Whether the last successful label write by this process set the label
    pub async fn is_active(&self) -> bool {
        *self.active.lock().await
    }

    /// Read the pod and build the lock descriptor; later calls return the first one
    pub async fn build_lock(&self) -> Result<&LockDescriptor> {
        if let Some(descriptor) = self.lock.get() {
            return Ok(descriptor);
        }

        let descriptor =
            LockDescriptor::build(&self.store, &self.config.namespace, &self.config.pod_name)
                .await?;
        tracing::info!("Using lease {}", descriptor);
        Ok(self.lock.get_or_init(|| descriptor))
    }

    /// The lock descriptor, if [`build_lock`](Self::build_lock) succeeded
    pub fn lock(&self) -> Result<&LockDescriptor> {
        self.lock.get().ok_or(SidecarError::LockNotBuilt)
    }

    /// Label the pod active unless the label is already there.
    ///
    /// The flag only becomes `true` through a write made by this call; a label
    /// left by an earlier process leaves the flag untouched.
    pub async fn mark_active(&self) -> Result<Transition> {
        let mut active = self.active.lock().await;

        let mut snapshot = self.store.get_labels().await?;
        if snapshot.contains(&self.config.label_key) {
            tracing::debug!("Label {} already present", self.config.label_key);
            return Ok(Transition::Unchanged);
        }

        snapshot
            .labels
            .insert(self.config.label_key.clone(), ACTIVE_VALUE.to_string());

        match self.store.set_labels(&snapshot).await {
            Ok(()) => {
                *active = true;
                Ok(Transition::Applied)
            }
            Err(e) if !e.is_fatal() => {
                tracing::error!("error updating pod labels: {}", e);
                Ok(Transition::WriteFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the label if this process set it.
    ///
    /// A no-op unless the flag is `true`. When the label is already gone the
    /// flag is cleared without writing.
    pub async fn mark_passive(&self) -> Result<Transition> {
        let mut active = self.active.lock().await;
        if !*active {
            return Ok(Transition::Unchanged);
        }

        let mut snapshot = self.store.get_labels().await?;
        if snapshot.labels.remove(&self.config.label_key).is_none() {
            tracing::debug!("Label {} already removed", self.config.label_key);
            *active = false;
            return Ok(Transition::Unchanged);
        }

        match self.store.set_labels(&snapshot).await {
            Ok(()) => {
                *active = false;
                Ok(Transition::Applied)
            }
            Err(e) if !e.is_fatal() => {
                tracing::error!("error updating pod labels: {}", e);
                Ok(Transition::WriteFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Demote, then cancel the election loop so it releases the lease.
    ///
    /// Cancellation happens even when the demotion fails.
    pub async fn shutdown(&self) -> Result<Transition> {
        self.shutting_down.store(true, Ordering::SeqCst);
        let demoted = self.mark_passive().await;
        self.shutdown.cancel();
        demoted
    }

    /// Run one leadership term against the lease built by `lease_for`.
    ///
    /// Fails with [`SidecarError::LockNotBuilt`] before
    /// [`build_lock`](Self::build_lock) succeeded.
    pub async fn run_leader_election<L, F>(&self, lease_for: F) -> Result<()>
    where
        L: LeaseLock,
        F: FnOnce(&LockDescriptor, &ElectionConfig) -> L,
    {
        let descriptor = self.lock()?;
        let config = ElectionConfig::default();
        let elector = LeaderElector::new(lease_for(descriptor, &config), config)?;

        tracing::info!("Starting leader election for {}", descriptor);
        elector.run(self, &self.shutdown).await
    }
}

#[async_trait]
impl<S: PodStore> LeadershipCallbacks for SideCar<S> {
    async fn on_started_leading(&self) -> Result<()> {
        tracing::info!("we are the leader, marking active");
        self.mark_active().await.map(|_| ())
    }

    async fn on_stopped_leading(&self) -> Result<()> {
        tracing::info!("no longer the leader, marking inactive");
        self.mark_passive().await.map(|_| ())
    }
}
