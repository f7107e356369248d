//! End-to-end leadership flow against in-memory pod and lease fakes

use apsc_sidecar::{
    LabelSnapshot, LeaseLock, PodStore, Result, SideCar, SidecarConfig, SidecarError,
    DEFAULT_LABEL_KEY,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct PodState {
    labels: Mutex<BTreeMap<String, String>>,
    version: AtomicUsize,
    writes: AtomicUsize,
    reject_writes: AtomicBool,
}

/// Shared in-memory pod
#[derive(Clone, Default)]
struct MemoryPod(Arc<PodState>);

impl MemoryPod {
    fn with_app_labels() -> Self {
        let pod = Self::default();
        pod.0.labels.lock().unwrap().extend([
            ("app.kubernetes.io/name".to_string(), "svc".to_string()),
            ("app.kubernetes.io/component".to_string(), "worker".to_string()),
        ]);
        pod
    }

    fn state_label(&self) -> Option<String> {
        self.0.labels.lock().unwrap().get(DEFAULT_LABEL_KEY).cloned()
    }

    fn writes(&self) -> usize {
        self.0.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodStore for MemoryPod {
    async fn get_labels(&self) -> Result<LabelSnapshot> {
        Ok(LabelSnapshot {
            labels: self.0.labels.lock().unwrap().clone(),
            resource_version: Some(self.0.version.load(Ordering::SeqCst).to_string()),
        })
    }

    async fn set_labels(&self, snapshot: &LabelSnapshot) -> Result<()> {
        self.0.writes.fetch_add(1, Ordering::SeqCst);
        if self.0.reject_writes.load(Ordering::SeqCst) {
            return Err(SidecarError::object_write("the object has been modified"));
        }
        *self.0.labels.lock().unwrap() = snapshot.labels.clone();
        self.0.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Lease that is always (or never) granted
struct FixedLease {
    granted: bool,
    releases: Arc<AtomicUsize>,
}

#[async_trait]
impl LeaseLock for FixedLease {
    async fn try_acquire_or_renew(&self) -> Result<bool> {
        Ok(self.granted)
    }

    async fn release(&self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn start_election(
    sidecar: &Arc<SideCar<MemoryPod>>,
    granted: bool,
    releases: &Arc<AtomicUsize>,
) -> tokio::task::JoinHandle<Result<()>> {
    let sidecar = sidecar.clone();
    let releases = releases.clone();
    tokio::spawn(async move {
        sidecar
            .run_leader_election(move |descriptor, _| {
                assert_eq!(descriptor.name, "svc-worker");
                assert_eq!(descriptor.namespace, "ns1");
                assert_eq!(descriptor.holder_identity, "app-0");
                FixedLease { granted, releases }
            })
            .await
    })
}

fn config() -> SidecarConfig {
    SidecarConfig::new("ns1", "app-0", DEFAULT_LABEL_KEY).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_leader_is_labelled_and_demoted_on_shutdown() {
    let pod = MemoryPod::with_app_labels();
    let sidecar = Arc::new(SideCar::new(config(), pod.clone()));
    sidecar.build_lock().await.unwrap();

    let releases = Arc::new(AtomicUsize::new(0));
    let election = start_election(&sidecar, true, &releases);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pod.state_label().as_deref(), Some("active"));
    assert!(sidecar.is_active().await);

    sidecar.shutdown().await.unwrap();
    election.await.unwrap().unwrap();

    assert_eq!(pod.state_label(), None);
    assert!(!sidecar.is_active().await);
    assert_eq!(pod.writes(), 2);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_follower_never_touches_labels() {
    let pod = MemoryPod::with_app_labels();
    let sidecar = Arc::new(SideCar::new(config(), pod.clone()));
    sidecar.build_lock().await.unwrap();

    let releases = Arc::new(AtomicUsize::new(0));
    let election = start_election(&sidecar, false, &releases);

    tokio::time::sleep(Duration::from_secs(30)).await;
    sidecar.shutdown().await.unwrap();
    election.await.unwrap().unwrap();

    assert_eq!(pod.writes(), 0);
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    assert!(!sidecar.is_active().await);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_activation_leaves_pod_unlabelled() {
    let pod = MemoryPod::with_app_labels();
    pod.0.reject_writes.store(true, Ordering::SeqCst);
    let sidecar = Arc::new(SideCar::new(config(), pod.clone()));
    sidecar.build_lock().await.unwrap();

    let releases = Arc::new(AtomicUsize::new(0));
    let election = start_election(&sidecar, true, &releases);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(pod.state_label(), None);
    assert!(!sidecar.is_active().await);

    sidecar.shutdown().await.unwrap();
    election.await.unwrap().unwrap();

    // the demotion is skipped because activation never succeeded
    assert_eq!(pod.writes(), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}
