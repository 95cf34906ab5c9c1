mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use common::{Script, ScriptedRadio};
use doorlink_mock::{Behavior, MockController, Stats};
use doorlink_node::{
    Command, ConnectivityState, FixedNetwork, HeartbeatConfig, Outcome, ProvisioningConfig, ProvisioningError,
    Session, Settings, StatusEvent, StatusReceiver, StatusSink,
};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn mock(behavior: Behavior) -> (u16, Arc<Stats>) {
    let mock = MockController::bind("127.0.0.1:0").await.unwrap().with_behavior(behavior);
    let port = mock.local_addr().unwrap().port();
    let stats = mock.stats();
    let _ = mock.spawn();
    (port, stats)
}

/// A port nothing listens on
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn settings(command_port: u16, pairing_port: u16) -> Settings {
    Settings {
        controller_address: "127.0.0.1".into(),
        wifi_password: "hunter2".into(),
        command_port: Some(command_port),
        pairing_broadcast_port: Some(pairing_port),
        ..Settings::default()
    }
}

fn heartbeat(interval: Duration) -> HeartbeatConfig {
    HeartbeatConfig {
        probe_timeout: Duration::from_millis(500),
        attempts: 3,
        retry_delay: Duration::from_millis(20),
        interval,
        broadcast_address: LOCALHOST,
    }
}

fn session(
    script: Script,
    settings: watch::Receiver<Settings>,
    heartbeat: HeartbeatConfig,
) -> (Session<ScriptedRadio>, StatusReceiver) {
    let (status, rx) = StatusSink::channel();
    let network = Arc::new(FixedNetwork { ssid: Some("HomeNet".into()), ip: Some("192.168.1.20".parse().unwrap()) });
    let provisioning = ProvisioningConfig { scan_timeout: Duration::from_millis(200), ..ProvisioningConfig::default() };
    let session = Session::with_config(ScriptedRadio::new(script), settings, network, status, provisioning, heartbeat);
    (session, rx)
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let result = timeout(Duration::from_secs(5), async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn door_command_reports_controller_message() {
    let (port, stats) = mock(Behavior::Normal).await;
    let (_tx, settings) = watch::channel(settings(port, 0));
    let (session, mut rx) = session(Script::default(), settings, heartbeat(Duration::from_secs(3600)));

    let outcome = session.spawn_door_command("suite", None).await.unwrap();
    assert_eq!(outcome, Outcome::success("Suite door opened successfully"));
    let reported = common::wait_for(&mut rx, |e| match e {
        StatusEvent::Command(outcome) => Some(outcome),
        _ => None,
    })
    .await;
    assert_eq!(reported, outcome);

    let rejected = session.send_command(&Command::new("RING", "suite", 0)).await;
    assert_eq!(rejected, Outcome::failure("Unknown command"));
    assert_eq!(stats.snapshot().commands, 2);
}

#[tokio::test]
async fn blank_success_message_is_synthesized() {
    let (port, _) = mock(Behavior::Reply("{\"success\":true,\"message\":\"\"}\n".into())).await;
    let (_tx, settings) = watch::channel(settings(port, 0));
    let (session, _rx) = session(Script::default(), settings, heartbeat(Duration::from_secs(3600)));

    let outcome = session.send_door_command("apartment", Some(-1)).await;
    assert_eq!(outcome, Outcome::success("apartment door opened successfully"));
}

#[tokio::test]
async fn commands_use_latest_settings() {
    let (first, first_stats) = mock(Behavior::Normal).await;
    let (second, second_stats) = mock(Behavior::Normal).await;
    let (tx, settings) = watch::channel(settings(first, 0));
    let (session, _rx) = session(Script::default(), settings, heartbeat(Duration::from_secs(3600)));

    assert!(session.send_door_command("apartment", None).await.success);
    tx.send_modify(|s| s.command_port = Some(second));
    assert!(session.send_door_command("apartment", None).await.success);

    assert_eq!(first_stats.snapshot().commands, 1);
    assert_eq!(second_stats.snapshot().commands, 1);
}

#[tokio::test]
async fn lost_controller_escalates_once() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let pairing_port = receiver.local_addr().unwrap().port();
    let (_tx, settings) = watch::channel(settings(closed_port().await, pairing_port));
    let (session, mut rx) = session(Script::default(), settings, heartbeat(Duration::from_secs(3600)));

    session.start_heartbeat();
    let lost = common::wait_for(&mut rx, |e| match e {
        StatusEvent::HeartbeatLost(outcome) => Some(outcome),
        _ => None,
    })
    .await;
    assert_eq!(lost, Outcome::failure("Lost connection. Please repair with controller."));

    let mut buf = [0u8; 64];
    let (n, _) = timeout(Duration::from_secs(1), receiver.recv_from(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], b"PAIRING_MODE_REQUEST");
    assert!(timeout(Duration::from_millis(200), receiver.recv_from(&mut buf)).await.is_err());

    wait_until("loop exit", || !session.is_monitoring()).await;
    assert_eq!(session.connectivity(), ConnectivityState::Lost);
}

#[tokio::test]
async fn restarting_heartbeat_replaces_old_loop() {
    let (first, first_stats) = mock(Behavior::Normal).await;
    let (second, second_stats) = mock(Behavior::Normal).await;
    let (tx, settings) = watch::channel(settings(first, 0));
    let (session, _rx) = session(Script::default(), settings, heartbeat(Duration::from_millis(30)));

    session.start_heartbeat();
    wait_until("first probes", || first_stats.snapshot().heartbeats >= 2).await;

    tx.send_modify(|s| s.command_port = Some(second));
    session.start_heartbeat();
    sleep(Duration::from_millis(100)).await;
    let settled = first_stats.snapshot().heartbeats;

    wait_until("second probes", || second_stats.snapshot().heartbeats >= 3).await;
    assert_eq!(first_stats.snapshot().heartbeats, settled);
    assert!(session.is_monitoring());

    session.shutdown().await;
    assert!(!session.is_monitoring());
    assert_eq!(session.connectivity(), ConnectivityState::Idle);
}

#[tokio::test]
async fn successful_provisioning_starts_heartbeat() {
    let (port, stats) = mock(Behavior::Normal).await;
    let (_tx, settings) = watch::channel(settings(port, 0));
    let (session, mut rx) = session(Script::default(), settings, heartbeat(Duration::from_secs(3600)));

    session.provision().unwrap();
    let outcome = common::wait_for(&mut rx, |e| match e {
        StatusEvent::Provisioning(outcome) => Some(outcome),
        _ => None,
    })
    .await;
    assert_eq!(outcome, Outcome::success("Credentials sent!"));

    wait_until("first probe", || stats.snapshot().heartbeats >= 1).await;
    assert_eq!(session.connectivity(), ConnectivityState::Monitoring);
    assert_eq!(session.radio().log().lock().unwrap().writes.len(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn failed_provisioning_reports_reason() {
    let (_tx, settings) = watch::channel(Settings { wifi_password: String::new(), ..settings(0, 0) });
    let (session, mut rx) = session(Script::default(), settings, heartbeat(Duration::from_secs(3600)));

    session.provision().unwrap();
    let outcome = common::wait_for(&mut rx, |e| match e {
        StatusEvent::Provisioning(outcome) => Some(outcome),
        _ => None,
    })
    .await;
    assert!(!outcome.success);
    assert!(outcome.message.contains("password not set"));
    assert!(!session.is_monitoring());
    wait_until("idle", || session.connectivity() == ConnectivityState::Idle).await;
}

#[tokio::test]
async fn second_provision_is_rejected_while_running() {
    let (_tx, settings) = watch::channel(settings(0, 0));
    let (session, mut rx) = session(Script { connect: None, ..Script::default() }, settings, heartbeat(Duration::from_secs(3600)));

    session.provision().unwrap();
    assert_eq!(session.provision(), Err(ProvisioningError::ScanInProgress));
    assert_eq!(session.connectivity(), ConnectivityState::Provisioning);

    session.cancel_provisioning();
    let outcome = common::wait_for(&mut rx, |e| match e {
        StatusEvent::Provisioning(outcome) => Some(outcome),
        _ => None,
    })
    .await;
    assert_eq!(outcome, Outcome::failure("provisioning cancelled"));
    session.shutdown().await;
}
