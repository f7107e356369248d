//! `coordination.k8s.io/v1` Lease backed lock
//!
//! Expiry of another holder's lease is judged on this process's monotonic
//! clock: a foreign lease counts as expired only once its record has stayed
//! unchanged for its lease duration since this candidate first saw it. The
//! holder's `renewTime` is never compared against the local wall clock.

use crate::{error::Result, lock::LockDescriptor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::{
    api::coordination::v1::{Lease, LeaseSpec},
    apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta},
};
use kube::{
    api::{Api, PostParams},
    client::Client,
};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Lock primitive driven by the election loop
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Take or renew the lease; `true` when this candidate holds it afterwards
    async fn try_acquire_or_renew(&self) -> Result<bool>;

    /// Give up the lease if this candidate holds it
    async fn release(&self) -> Result<()>;
}

/// Last lease record seen and when it was first seen in that form
#[derive(Debug, Default)]
pub(crate) struct ObservedRecord {
    last: Option<(LeaseSpec, Instant)>,
}

impl ObservedRecord {
    /// Note `spec` as seen at `now` and report whether it has gone unrenewed
    /// for its own lease duration
    pub(crate) fn observe(&mut self, spec: &LeaseSpec, now: Instant) -> bool {
        let since = match &self.last {
            Some((record, since)) if record == spec => *since,
            _ => {
                self.last = Some((spec.clone(), now));
                now
            }
        };

        let seconds = spec.lease_duration_seconds.unwrap_or(0).max(0);
        now.duration_since(since) >= Duration::from_secs(u64::from(seconds.unsigned_abs()))
    }

    /// Remember a record this candidate wrote itself
    pub(crate) fn record(&mut self, spec: LeaseSpec, now: Instant) {
        self.last = Some((spec, now));
    }
}

/// [`LeaseLock`] over a Kubernetes `Lease` object
pub struct KubeLeaseLock {
    api: Api<Lease>,
    descriptor: LockDescriptor,
    lease_duration: Duration,
    observed: Mutex<ObservedRecord>,
}

impl KubeLeaseLock {
    pub fn new(client: Client, descriptor: LockDescriptor, lease_duration: Duration) -> Self {
        Self {
            api: Api::namespaced(client, &descriptor.namespace),
            descriptor,
            lease_duration,
            observed: Mutex::new(ObservedRecord::default()),
        }
    }

    fn lease_duration_seconds(&self) -> i32 {
        i32::try_from(self.lease_duration.as_secs()).unwrap_or(i32::MAX)
    }

    async fn remember(&self, lease: Lease) {
        self.observed
            .lock()
            .await
            .record(lease.spec.unwrap_or_default(), Instant::now());
    }
}

#[async_trait]
impl LeaseLock for KubeLeaseLock {
    async fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();
        let name = &self.descriptor.name;

        let Some(mut lease) = self.api.get_opt(name).await? else {
            let lease = Lease {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(self.descriptor.namespace.clone()),
                    ..Default::default()
                },
                spec: Some(LeaseSpec {
                    holder_identity: Some(self.descriptor.holder_identity.clone()),
                    lease_duration_seconds: Some(self.lease_duration_seconds()),
                    acquire_time: Some(MicroTime(now)),
                    renew_time: Some(MicroTime(now)),
                    lease_transitions: Some(0),
                    ..Default::default()
                }),
            };

            return match self.api.create(&PostParams::default(), &lease).await {
                Ok(created) => {
                    self.remember(created).await;
                    Ok(true)
                }
                Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
                Err(e) => Err(e.into()),
            };
        };

        let current = lease.spec.take().unwrap_or_default();
        let expired = self
            .observed
            .lock()
            .await
            .observe(&current, Instant::now());

        let Some(spec) = takeover_spec(
            current,
            &self.descriptor.holder_identity,
            now,
            self.lease_duration_seconds(),
            expired,
        ) else {
            return Ok(false);
        };
        lease.spec = Some(spec);

        // resourceVersion from the read scopes the replace
        match self.api.replace(name, &PostParams::default(), &lease).await {
            Ok(updated) => {
                self.remember(updated).await;
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn release(&self) -> Result<()> {
        let name = &self.descriptor.name;

        let Some(mut lease) = self.api.get_opt(name).await? else {
            return Ok(());
        };

        let spec = lease.spec.take().unwrap_or_default();
        if spec.holder_identity.as_deref() != Some(self.descriptor.holder_identity.as_str()) {
            return Ok(());
        }

        let now = Utc::now();
        lease.spec = Some(LeaseSpec {
            holder_identity: Some(String::new()),
            lease_duration_seconds: Some(1),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            ..spec
        });

        let released = self.api.replace(name, &PostParams::default(), &lease).await?;
        self.remember(released).await;
        tracing::info!("Released lease {}", self.descriptor);
        Ok(())
    }
}

/// Compute the spec to write when taking or renewing `current`.
///
/// Returns `None` while another holder's lease is live, i.e. not `expired`
/// as observed locally.
pub(crate) fn takeover_spec(
    current: LeaseSpec,
    identity: &str,
    now: DateTime<Utc>,
    lease_duration_seconds: i32,
    expired: bool,
) -> Option<LeaseSpec> {
    let holder = current.holder_identity.as_deref().unwrap_or_default();
    let ours = holder == identity;

    if !holder.is_empty() && !ours && !expired {
        return None;
    }

    let acquire_time = match (&current.acquire_time, ours) {
        (Some(time), true) => time.clone(),
        _ => MicroTime(now),
    };
    let transitions = current.lease_transitions.unwrap_or(0) + i32::from(!ours);

    Some(LeaseSpec {
        holder_identity: Some(identity.to_string()),
        lease_duration_seconds: Some(lease_duration_seconds),
        acquire_time: Some(acquire_time),
        renew_time: Some(MicroTime(now)),
        lease_transitions: Some(transitions),
        ..current
    })
}
