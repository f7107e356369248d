//! Termination signal handling
//!
//! SIGTERM and SIGINT trigger a demotion followed by cancellation of the
//! election loop. SIGKILL cannot be intercepted, so a killed sidecar leaves its
//! label in place until the lease expires and another replica takes over.

use crate::{error::Result, pod::PodStore, sidecar::SideCar};
use std::future::Future;
use std::sync::Arc;

/// Registered termination signal streams.
///
/// Registration happens up front so a failure is reported before the
/// election starts instead of inside a background task.
#[cfg(unix)]
pub struct TerminationSignals {
    terminate: tokio::signal::unix::Signal,
    interrupt: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    pub fn register() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the first termination signal and return its name
    pub async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.terminate.recv() => "SIGTERM",
            _ = self.interrupt.recv() => "SIGINT",
        }
    }
}

/// Registered termination signal streams
#[cfg(not(unix))]
pub struct TerminationSignals {
    ctrl_c: tokio::signal::windows::CtrlC,
}

#[cfg(not(unix))]
impl TerminationSignals {
    pub fn register() -> Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
        })
    }

    /// Wait for the first termination signal and return its name
    pub async fn recv(mut self) -> &'static str {
        self.ctrl_c.recv().await;
        "ctrl-c"
    }
}

/// Demote the sidecar and stop the election once `signal` resolves
pub async fn shutdown_on<S, F>(sidecar: Arc<SideCar<S>>, signal: F) -> Result<()>
where
    S: PodStore,
    F: Future<Output = &'static str>,
{
    let name = signal.await;
    tracing::info!("shutdown after {}", name);
    sidecar.shutdown().await.map(|_| ())
}

/// Register termination signals and spawn the task that reacts to them
pub fn spawn_signal_handler<S>(
    sidecar: Arc<SideCar<S>>,
) -> Result<tokio::task::JoinHandle<Result<()>>>
where
    S: PodStore + 'static,
{
    let signals = TerminationSignals::register()?;
    Ok(tokio::spawn(shutdown_on(sidecar, signals.recv())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SidecarConfig, DEFAULT_LABEL_KEY};
    use crate::pod::{LabelSnapshot, MockPodStore};
    use std::collections::BTreeMap;

    fn config() -> SidecarConfig {
        SidecarConfig::new("ns1", "app-0", "").unwrap()
    }

    #[tokio::test]
    async fn test_signal_demotes_active_sidecar() {
        let mut store = MockPodStore::new();
        let mut reads = 0;
        store.expect_get_labels().times(2).returning(move || {
            reads += 1;
            let mut labels = BTreeMap::new();
            if reads > 1 {
                labels.insert(DEFAULT_LABEL_KEY.to_string(), "active".to_string());
            }
            Ok(LabelSnapshot {
                labels,
                resource_version: Some(reads.to_string()),
            })
        });
        store.expect_set_labels().times(2).returning(|_| Ok(()));
        let sidecar = Arc::new(SideCar::new(config(), store));
        sidecar.mark_active().await.unwrap();

        let token = sidecar.shutdown_token();
        shutdown_on(sidecar.clone(), async { "SIGTERM" })
            .await
            .unwrap();

        assert!(token.is_cancelled());
        assert!(sidecar.is_shutting_down());
        assert!(!sidecar.is_active().await);
    }

    #[tokio::test]
    async fn test_signal_on_passive_sidecar_only_cancels() {
        let mut store = MockPodStore::new();
        store.expect_get_labels().never();
        store.expect_set_labels().never();
        let sidecar = Arc::new(SideCar::new(config(), store));

        shutdown_on(sidecar.clone(), async { "SIGINT" })
            .await
            .unwrap();

        assert!(sidecar.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn test_register_signals_up_front() {
        let sidecar = Arc::new(SideCar::new(config(), MockPodStore::new()));

        let handler = spawn_signal_handler(sidecar.clone()).unwrap();
        tokio::task::yield_now().await;

        assert!(!handler.is_finished());
        assert!(!sidecar.is_shutting_down());
        handler.abort();
    }

    #[tokio::test]
    async fn test_pending_signal_leaves_sidecar_running() {
        let sidecar = Arc::new(SideCar::new(config(), MockPodStore::new()));

        let handler = tokio::spawn(shutdown_on(sidecar.clone(), std::future::pending()));
        tokio::task::yield_now().await;

        assert!(!sidecar.shutdown_token().is_cancelled());
        assert!(!sidecar.is_shutting_down());
        handler.abort();
    }
}
