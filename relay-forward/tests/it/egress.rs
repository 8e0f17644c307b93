use std::{sync::Arc, time::Duration};

use relay_common::{EndpointId, Unit};
use relay_egress::{install, restore, Device, NotifyUpstream, Upstream, Verdict};
use relay_forward::{PortState, Relay, RelayError, RelayOptions, Submitted};

fn relay() -> Arc<Relay<()>> {
    let _ = tracing_subscriber::fmt::try_init();
    Arc::new(Relay::new(RelayOptions::default()).unwrap())
}

#[test]
fn pump_moves_queued_units() {
    let relay = relay();
    let device = Device::new("eth0", 2, relay.clone());
    install(&device, 100, 20).unwrap();

    let id = EndpointId::new(1);
    relay.bind(id, ()).unwrap();
    for i in 0..10 {
        let _ = relay.submit(id, Unit::data(format!("{i}")), true).unwrap();
    }

    assert_eq!(relay.pump(id, &device, 1, 4).unwrap(), 4);
    assert_eq!(device.queue_len(1).unwrap(), 4);
    assert_eq!(relay.pump(id, &device, 1, usize::MAX).unwrap(), 6);
    assert_eq!(device.dequeue(1).unwrap().unwrap().payload(), "0");

    assert!(matches!(relay.pump(id, &device, 2, 1), Err(RelayError::Egress(_))));
    assert_eq!(relay.endpoint_stats(id).unwrap().sent(), 10);
}

#[test]
fn egress_drop_disables_until_resume() {
    let relay = relay();
    let device = Device::new("eth0", 1, relay.clone());
    install(&device, 100, 20).unwrap();

    let id = EndpointId::new(7);
    relay.bind(id, ()).unwrap();
    for _ in 0..101 {
        let _ = relay.submit(id, Unit::data("x"), true).unwrap();
    }

    // The 101st unit overflows the device
    assert_eq!(relay.pump(id, &device, 0, usize::MAX).unwrap(), 100);
    assert_eq!(relay.port_state(id).unwrap(), PortState::Disabled);
    assert_eq!(relay.endpoint_stats(id).unwrap().dropped(), 1);

    // While disabled nothing bypasses the queue
    assert_eq!(relay.submit(id, Unit::data("y"), false).unwrap(), Submitted::Scheduled);

    while device.queue_len(0).unwrap() > 20 {
        device.dequeue(0).unwrap();
    }
    assert_eq!(relay.port_state(id).unwrap(), PortState::Enabled);
    assert_eq!(device.queue_stats(0).unwrap().resumes, 1);

    while device.dequeue(0).unwrap().is_some() {}
    assert_eq!(device.queue_stats(0).unwrap().resumes, 5);
}

#[test]
fn restore_reenables_disabled_endpoints() {
    let relay = relay();
    let device = Device::new("eth0", 1, relay.clone());
    install(&device, 4, 1).unwrap();

    let id = EndpointId::new(8);
    relay.bind(id, ()).unwrap();
    for _ in 0..5 {
        let _ = relay.submit(id, Unit::data("x"), true).unwrap();
    }
    assert_eq!(relay.pump(id, &device, 0, usize::MAX).unwrap(), 4);
    assert_eq!(relay.port_state(id).unwrap(), PortState::Disabled);

    // Nothing drained, so only the teardown can resume the endpoint
    restore(&device);
    assert_eq!(relay.port_state(id).unwrap(), PortState::Enabled);
    assert_eq!(device.queue_len(0).unwrap(), 0);

    let res = relay.submit(id, Unit::data("y"), false).unwrap();
    assert!(matches!(res, Submitted::SendNow(_)));
}

#[test]
fn reset_reenables_disabled_endpoints() {
    let relay = relay();
    let device = Device::new("eth0", 1, relay.clone());
    install(&device, 4, 1).unwrap();

    let id = EndpointId::new(9);
    relay.bind(id, ()).unwrap();
    for _ in 0..5 {
        let _ = relay.submit(id, Unit::data("x"), true).unwrap();
    }
    assert_eq!(relay.pump(id, &device, 0, usize::MAX).unwrap(), 4);
    assert_eq!(relay.port_state(id).unwrap(), PortState::Disabled);

    device.reset(0).unwrap();
    assert_eq!(relay.port_state(id).unwrap(), PortState::Enabled);
}

#[test]
fn resume_ignores_enabled_endpoints() {
    let relay = relay();
    let id = EndpointId::new(2);
    relay.bind(id, ()).unwrap();

    relay.resume();
    assert_eq!(relay.port_state(id).unwrap(), PortState::Enabled);
}

#[tokio::test]
async fn producer_waits_for_writable() {
    let _ = tracing_subscriber::fmt::try_init();

    let upstream = Arc::new(NotifyUpstream::new());
    let device = Arc::new(Device::new("eth1", 1, upstream.clone()));
    install(&device, 4, 1).unwrap();

    for _ in 0..5 {
        let _ = device.transmit(0, Unit::data("x")).unwrap();
    }

    let producer = tokio::spawn({
        let upstream = Arc::clone(&upstream);
        let device = Arc::clone(&device);
        async move {
            let writable = upstream.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            // Full until the driver drains
            writable.await;
            device.transmit(0, Unit::data("resumed")).unwrap()
        }
    });

    tokio::task::yield_now().await;
    // Drain the way a driver would, one unit at a time
    tokio::time::timeout(Duration::from_secs(1), async {
        while !producer.is_finished() {
            if device.dequeue(0).unwrap().is_none() {
                tokio::task::yield_now().await;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    assert_eq!(producer.await.unwrap(), Verdict::Queued);
    assert!(upstream.resumes() >= 1);
}
