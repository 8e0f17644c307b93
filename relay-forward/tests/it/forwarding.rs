use relay_common::{EndpointId, Unit, UnitClass};
use relay_forward::{Relay, RelayOptions, Submitted};

fn relay() -> Relay<u32> {
    let _ = tracing_subscriber::fmt::try_init();
    Relay::new(RelayOptions::default()).unwrap()
}

#[test]
fn scheduled_units_drain_in_order() {
    let relay = relay();
    let id = EndpointId::new(3);
    relay.bind(id, 3).unwrap();

    for i in 0..5 {
        let res = relay.submit(id, Unit::data(format!("d{i}")), true).unwrap();
        assert_eq!(res, Submitted::Scheduled);
    }

    for i in 0..5 {
        let unit = relay.drain(id).unwrap();
        assert_eq!(unit.payload(), format!("d{i}").as_str());
    }
    assert!(relay.drain(id).is_none());
}

#[test]
fn management_before_data() {
    let relay = relay();
    let id = EndpointId::new(1);
    relay.bind(id, 1).unwrap();

    for unit in [Unit::data("d1"), Unit::data("d2"), Unit::management("m1")] {
        assert_eq!(relay.submit(id, unit, true).unwrap(), Submitted::Scheduled);
    }
    assert_eq!(relay.queue_depth(id, UnitClass::Management), 1);
    assert_eq!(relay.queue_depth(id, UnitClass::Data), 2);

    let order: Vec<_> = std::iter::from_fn(|| relay.drain(id)).collect();
    assert_eq!(order, [Unit::management("m1"), Unit::data("d1"), Unit::data("d2")]);
}

#[test]
fn tail_drop_at_capacity() {
    let relay = relay();
    let id = EndpointId::new(2);
    relay.bind(id, 2).unwrap();

    for _ in 0..1000 {
        assert_eq!(relay.submit(id, Unit::data("x"), true).unwrap(), Submitted::Scheduled);
    }
    assert_eq!(relay.submit(id, Unit::data("x"), true).unwrap(), Submitted::Dropped);
    assert_eq!(relay.queue_depth(id, UnitClass::Data), 1000);
    assert_eq!(relay.endpoint_stats(id).unwrap().dropped(), 1);
}

#[test]
fn marks_above_threshold() {
    let relay = relay();
    let id = EndpointId::new(4);
    relay.bind(id, 4).unwrap();

    // The 36th unit arrives with 35 queued, the 37th with 36
    for _ in 0..37 {
        let _ = relay.submit(id, Unit::data("x"), true).unwrap();
    }

    let marks: Vec<_> = std::iter::from_fn(|| relay.drain(id)).map(|u| u.is_congested()).collect();
    assert!(marks[..36].iter().all(|marked| !marked));
    assert!(marks[36]);
    assert_eq!(relay.endpoint_stats(id).unwrap().marked(), 1);
}

#[test]
fn bypass_on_idle_endpoint() {
    let relay = relay();
    let id = EndpointId::new(5);
    relay.bind(id, 5).unwrap();

    let res = relay.submit(id, Unit::data("now"), false).unwrap();
    assert_eq!(res, Submitted::SendNow(Unit::data("now")));
    assert!(relay.drain(id).is_none());

    // Management bypasses too, data and management queues are independent
    assert_eq!(relay.submit(id, Unit::data("d"), true).unwrap(), Submitted::Scheduled);
    let res = relay.submit(id, Unit::management("m"), false).unwrap();
    assert!(matches!(res, Submitted::SendNow(ref u) if u.is_management()));
}

#[test]
fn endpoints_are_isolated() {
    let relay = relay();
    let (a, b) = (EndpointId::new(10), EndpointId::new(11));
    relay.bind(a, 10).unwrap();
    relay.bind(b, 11).unwrap();

    let _ = relay.submit(a, Unit::data("a"), true).unwrap();
    assert!(relay.drain(b).is_none());
    assert_eq!(relay.drain(a).unwrap().payload(), "a");
    assert_eq!(relay.instance(b).unwrap(), 11);
}
