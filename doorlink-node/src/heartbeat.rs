//! Heartbeat monitor - periodic liveness checks with escalation
//!
//! One loop per process: [`HeartbeatMonitor::start`] cancels whatever loop
//! was running before spawning the new one. After `attempts` consecutive
//! failed checks the loop broadcasts a pairing request, reports the
//! controller as lost and exits for good.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use doorlink_proto::LIVENESS_TOKEN;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::pairing::{self, BROADCAST_ADDR};
use crate::{ConnectivityState, ControllerEndpoint, Outcome, StatusEvent, StatusSink};

pub const LOST_MESSAGE: &str = "Lost connection. Please repair with controller.";

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub probe_timeout: Duration,
    pub attempts: u32,
    pub retry_delay: Duration,
    pub interval: Duration,
    /// Where the pairing request goes; the port comes from the endpoint
    pub broadcast_address: IpAddr,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(3000),
            attempts: 3,
            retry_delay: Duration::from_millis(5000),
            interval: Duration::from_secs(60 * 60),
            broadcast_address: BROADCAST_ADDR,
        }
    }
}

/// Why a monitor loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    Lost,
    Cancelled,
}

/// Open a connection, send the liveness token, close
pub async fn probe(endpoint: &ControllerEndpoint, limit: Duration) -> std::io::Result<()> {
    let attempt = async {
        let mut stream =
            TcpStream::connect((endpoint.address.as_str(), endpoint.command_port)).await?;
        stream.write_all(LIVENESS_TOKEN).await?;
        stream.flush().await?;
        stream.shutdown().await
    };

    match timeout(limit, attempt).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "liveness probe timed out")),
    }
}

/// A single running loop
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<MonitorExit>,
}

impl MonitorHandle {
    /// Safe to call any number of times
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> MonitorExit {
        self.task.await.unwrap_or(MonitorExit::Cancelled)
    }
}

pub fn spawn(endpoint: ControllerEndpoint, config: HeartbeatConfig, status: StatusSink) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let task = tokio::spawn(run(endpoint, config, status, cancel.clone()));
    MonitorHandle { cancel, task }
}

async fn run(
    endpoint: ControllerEndpoint,
    config: HeartbeatConfig,
    status: StatusSink,
    cancel: CancellationToken,
) -> MonitorExit {
    let limit = config.probe_timeout;
    let target = SocketAddr::new(config.broadcast_address, endpoint.pairing_broadcast_port);

    run_with(
        &endpoint.address,
        &config,
        &status,
        &cancel,
        || probe(&endpoint, limit),
        || pairing::request_pairing(target),
    )
    .await
}

/// The monitor loop, with the probe and the escalation supplied by the caller
async fn run_with<P, PF, E, EF>(
    address: &str,
    config: &HeartbeatConfig,
    status: &StatusSink,
    cancel: &CancellationToken,
    probe: P,
    escalate: E,
) -> MonitorExit
where
    P: Fn() -> PF,
    PF: Future<Output = std::io::Result<()>>,
    E: FnOnce() -> EF,
    EF: Future<Output = bool>,
{
    tracing::info!(address, "heartbeat started");
    status.set_connectivity(ConnectivityState::Monitoring);

    loop {
        let mut alive = false;

        for attempt in 1..=config.attempts {
            let result = tokio::select! {
                _ = cancel.cancelled() => return MonitorExit::Cancelled,
                r = probe() => r,
            };

            match result {
                Ok(()) => {
                    tracing::debug!(attempt, "controller alive");
                    alive = true;
                    break;
                }
                Err(e) => tracing::warn!(attempt, error = %e, "liveness probe failed"),
            }

            if attempt < config.attempts {
                tokio::select! {
                    _ = cancel.cancelled() => return MonitorExit::Cancelled,
                    _ = sleep(config.retry_delay) => {}
                }
            }
        }

        if !alive {
            tracing::warn!(address, "controller lost");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return MonitorExit::Cancelled,
                _ = escalate() => {}
            }
            // A replacement loop may have started while the broadcast was in flight.
            if cancel.is_cancelled() {
                return MonitorExit::Cancelled;
            }
            status.emit(StatusEvent::HeartbeatLost(Outcome::failure(LOST_MESSAGE)));
            status.set_connectivity(ConnectivityState::Lost);
            return MonitorExit::Lost;
        }

        tokio::select! {
            _ = cancel.cancelled() => return MonitorExit::Cancelled,
            _ = sleep(config.interval) => {}
        }
    }
}

/// Owner of the single active loop
#[derive(Default)]
pub struct HeartbeatMonitor {
    current: Mutex<Option<MonitorHandle>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any running loop, then start a new one
    pub fn start(&self, endpoint: ControllerEndpoint, config: HeartbeatConfig, status: StatusSink) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = current.take() {
            old.cancel();
        }
        *current = Some(spawn(endpoint, config, status));
    }

    /// Cancel the running loop; the handle can be awaited for full shutdown
    pub fn stop(&self) -> Option<MonitorHandle> {
        let handle = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = &handle {
            handle.cancel();
        }
        handle
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn probe_sends_token() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = ControllerEndpoint::with_ports("127.0.0.1", port, 0);

        let server = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut got = Vec::new();
            stream.read_to_end(&mut got).await.unwrap();
            got
        });

        probe(&endpoint, Duration::from_secs(1)).await.unwrap();
        assert_eq!(server.await.unwrap(), b"ARE_YOU_ALIVE_BRO\n");
    }

    fn quick_config() -> HeartbeatConfig {
        HeartbeatConfig {
            probe_timeout: Duration::from_millis(100),
            attempts: 3,
            retry_delay: Duration::from_millis(10),
            interval: Duration::from_secs(3600),
            broadcast_address: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
        }
    }

    #[tokio::test]
    async fn three_failed_checks_escalate_once() {
        let checks = Arc::new(AtomicUsize::new(0));
        let broadcasts = Arc::new(AtomicUsize::new(0));
        let (status, mut rx) = StatusSink::channel();
        let cancel = CancellationToken::new();

        let exit = run_with(
            "controller",
            &quick_config(),
            &status,
            &cancel,
            || {
                checks.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)) }
            },
            || {
                broadcasts.fetch_add(1, Ordering::SeqCst);
                async { true }
            },
        )
        .await;

        assert_eq!(exit, MonitorExit::Lost);
        assert_eq!(checks.load(Ordering::SeqCst), 3);
        assert_eq!(broadcasts.load(Ordering::SeqCst), 1);

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                StatusEvent::Connectivity(ConnectivityState::Monitoring),
                StatusEvent::HeartbeatLost(Outcome::failure(LOST_MESSAGE)),
                StatusEvent::Connectivity(ConnectivityState::Lost),
            ]
        );
    }

    #[tokio::test]
    async fn restart_during_broadcast_suppresses_lost() {
        let (status, mut rx) = StatusSink::channel();
        let cancel = CancellationToken::new();

        let exit = run_with(
            "controller",
            &quick_config(),
            &status,
            &cancel,
            || async { Err::<(), _>(std::io::Error::from(std::io::ErrorKind::ConnectionRefused)) },
            || {
                let cancel = cancel.clone();
                async move {
                    cancel.cancel();
                    sleep(Duration::from_millis(20)).await;
                    true
                }
            },
        )
        .await;

        assert_eq!(exit, MonitorExit::Cancelled);
        assert_eq!(status.connectivity(), ConnectivityState::Monitoring);
        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(!events.iter().any(|e| matches!(e, StatusEvent::HeartbeatLost(_))));
    }

    #[tokio::test]
    async fn cancel_interrupts_idle_wait() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let endpoint = ControllerEndpoint::with_ports("127.0.0.1", port, 0);
        let (status, _rx) = StatusSink::channel();

        let handle = spawn(endpoint, HeartbeatConfig::default(), status);
        let _ = listener.accept().await.unwrap();
        handle.cancel();
        handle.cancel();

        let exit = timeout(Duration::from_secs(1), handle.join()).await.unwrap();
        assert_eq!(exit, MonitorExit::Cancelled);
    }
}
