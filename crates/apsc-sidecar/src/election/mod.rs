//! Lease-based leader election loop
//!
//! [`LeaderElector`] runs a single leadership term: it retries acquisition
//! until the lease is held, fires [`LeadershipCallbacks::on_started_leading`],
//! renews until a renewal round misses its deadline or the cancellation token
//! fires, and finally fires [`LeadershipCallbacks::on_stopped_leading`].

pub mod lease;

pub use lease::{KubeLeaseLock, LeaseLock};

use crate::error::{Result, SidecarError};
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// How long a lease is valid after its last renewal
pub const LEASE_DURATION: Duration = Duration::from_secs(15);
/// How long the leader keeps retrying a renewal before giving up leadership
pub const RENEW_DEADLINE: Duration = Duration::from_secs(10);
/// Pause between acquire and renew attempts
pub const RETRY_PERIOD: Duration = Duration::from_secs(2);

const JITTER_FACTOR: f64 = 0.2;

/// Edge-triggered leadership notifications.
///
/// An `Err` returned from a callback is fatal and stops the election loop.
#[async_trait]
pub trait LeadershipCallbacks: Send + Sync {
    /// This candidate acquired the lease
    async fn on_started_leading(&self) -> Result<()>;

    /// The election loop is exiting, whether or not it ever led
    async fn on_stopped_leading(&self) -> Result<()>;
}

/// Election timings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
    /// Release a held lease when the loop is cancelled instead of letting it expire
    pub release_on_cancel: bool,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_duration: LEASE_DURATION,
            renew_deadline: RENEW_DEADLINE,
            retry_period: RETRY_PERIOD,
            release_on_cancel: true,
        }
    }
}

impl ElectionConfig {
    /// Check the timings leave the leader room to renew before the lease expires
    pub fn validate(&self) -> Result<()> {
        if self.retry_period.is_zero() {
            return Err(SidecarError::timing("retry period must be positive"));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(SidecarError::timing(format!(
                "renew deadline {:?} must be shorter than lease duration {:?}",
                self.renew_deadline, self.lease_duration
            )));
        }
        if self.retry_period.mul_f64(1.0 + JITTER_FACTOR) >= self.renew_deadline {
            return Err(SidecarError::timing(format!(
                "retry period {:?} must be shorter than renew deadline {:?}",
                self.retry_period, self.renew_deadline
            )));
        }
        Ok(())
    }

    fn jittered_retry_period(&self) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.0..JITTER_FACTOR);
        self.retry_period.mul_f64(1.0 + jitter)
    }
}

/// Drives a [`LeaseLock`] through one leadership term
pub struct LeaderElector<L> {
    lock: L,
    config: ElectionConfig,
}

impl<L: LeaseLock> LeaderElector<L> {
    /// Create an elector, rejecting timings that cannot make progress
    pub fn new(lock: L, config: ElectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { lock, config })
    }

    /// Run until leadership is lost or `cancel` fires.
    ///
    /// `on_stopped_leading` is invoked on every exit except a fatal error from
    /// `on_started_leading`.
    pub async fn run(
        &self,
        callbacks: &dyn LeadershipCallbacks,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.lead(callbacks, cancel).await?;
        callbacks.on_stopped_leading().await
    }

    async fn lead(
        &self,
        callbacks: &dyn LeadershipCallbacks,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if !self.acquire(cancel).await {
            tracing::info!("Election cancelled before the lease was acquired");
            return Ok(());
        }

        tracing::info!("Acquired lease");
        callbacks.on_started_leading().await?;

        self.renew(cancel).await;

        if cancel.is_cancelled() && self.config.release_on_cancel {
            if let Err(e) = self.lock.release().await {
                tracing::warn!("Failed to release lease: {}", e);
            }
        }

        Ok(())
    }

    /// Retry until the lease is held; `false` when cancelled first
    async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }

            match self.lock.try_acquire_or_renew().await {
                Ok(true) => return true,
                Ok(false) => tracing::debug!("Lease is held by another candidate"),
                Err(e) => tracing::warn!("Failed to acquire lease: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.jittered_retry_period()) => {}
            }
        }
    }

    /// Keep renewing until a round misses the renew deadline or `cancel` fires
    async fn renew(&self, cancel: &CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }

            match tokio::time::timeout(self.config.renew_deadline, self.renew_round(cancel)).await
            {
                Ok(true) => tracing::debug!("Renewed lease"),
                Ok(false) => return,
                Err(_) => {
                    tracing::warn!(
                        "Failed to renew lease within {:?}, leadership lost",
                        self.config.renew_deadline
                    );
                    return;
                }
            }
        }
    }

    /// Attempt renewals every retry period; `false` when cancelled first
    async fn renew_round(&self, cancel: &CancellationToken) -> bool {
        loop {
            match self.lock.try_acquire_or_renew().await {
                Ok(true) => return true,
                Ok(false) => tracing::warn!("Lease was taken over by another candidate"),
                Err(e) => tracing::warn!("Failed to renew lease: {}", e),
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }
}
