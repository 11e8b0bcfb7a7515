use stalkdrive::heartbeat::*;
use stalkdrive::hooks::{SafetyHost, SafetyModel};
use stalkdrive::messages::{CruiseStatus, CruiseVariant};
use std::time::Duration;
use tokio::time::sleep;

#[tokio::test]
async fn test_spawned_heartbeat_beats() {
    let heartbeat = Heartbeat::new();
    let handle = spawn_heartbeat(heartbeat.clone(), Duration::from_millis(10));

    sleep(Duration::from_millis(50)).await;
    assert!(heartbeat.take());

    handle.abort();
    let _ = handle.await;
    heartbeat.take();

    sleep(Duration::from_millis(30)).await;
    assert!(!heartbeat.peek());
}

#[tokio::test]
async fn test_watch_sees_beats_from_task() {
    let heartbeat = Heartbeat::new();
    let mut watch = HeartbeatWatch::new(heartbeat.clone(), Duration::from_millis(100));
    let handle = spawn_heartbeat(heartbeat, Duration::from_millis(10));

    assert!(watch.check(0));
    sleep(Duration::from_millis(40)).await;
    assert!(watch.check(500_000_000));
    assert_eq!(watch.last_seen_ns(), Some(500_000_000));

    handle.abort();
}

#[test]
fn test_watch_timeout_boundary() {
    let heartbeat = Heartbeat::new();
    let mut watch = HeartbeatWatch::new(heartbeat, HEARTBEAT_TIMEOUT);

    assert!(watch.check(1_000_000_000));
    assert!(watch.check(4_000_000_000));
    assert!(!watch.check(4_000_000_001));
}

#[tokio::test]
async fn test_host_keeps_controls_while_beating() {
    let heartbeat = Heartbeat::new();
    let handle = spawn_heartbeat(heartbeat.clone(), Duration::from_millis(5));

    let mut host = SafetyHost::with_heartbeat(heartbeat);
    host.set_safety_hooks(SafetyModel::StalkServo as u16, 0).unwrap();
    let engaged = CruiseStatus {
        variant: CruiseVariant::Normal,
        active: true,
        setpoint_raw: 90.0,
    }
    .to_frame(0)
    .unwrap();
    host.safety_rx_hook(&engaged);
    assert!(host.get_controls_allowed());

    host.safety_tick(0);
    sleep(Duration::from_millis(20)).await;
    host.safety_tick(2_000_000_000);
    assert!(host.get_controls_allowed());

    handle.abort();
    let _ = handle.await;
    sleep(Duration::from_millis(10)).await;

    // One stale beat may still be pending, consume it before the clock runs out
    host.safety_tick(3_000_000_000);
    host.safety_tick(10_000_000_000);
    assert!(!host.get_controls_allowed());
}
