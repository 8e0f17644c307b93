use relay_common::{AllocContext, EndpointId, Fifo, Unit, UnitClass};
use relay_forward::{Relay, RelayError, RelayOptions, Submitted};
use relay_policy::{Enqueue, PolicyError, PolicyParam, PolicySet};

/// Queues everything in one FIFO, without capacity.
#[derive(Debug, Default)]
struct Unbounded;

impl PolicySet for Unbounded {
    type Queue = Fifo<Unit>;

    fn name(&self) -> &'static str {
        "unbounded"
    }

    fn create_queue(&self, _: EndpointId, ctx: AllocContext) -> Result<Fifo<Unit>, PolicyError> {
        Ok(Fifo::with_capacity(16, ctx)?)
    }

    fn destroy_queue(&self, _: Fifo<Unit>) {}

    fn enqueue(&self, queue: &mut Fifo<Unit>, unit: Unit, _: bool) -> Enqueue {
        queue.push(unit);
        Enqueue::Scheduled
    }

    fn dequeue(&self, queue: &mut Fifo<Unit>) -> Option<Unit> {
        queue.pop()
    }

    fn set_param(&self, _: &str, _: &str) -> Result<(), PolicyError> {
        Ok(())
    }

    fn queue_depth(&self, queue: &Fifo<Unit>, class: UnitClass) -> usize {
        queue.iter().filter(|u| u.class() == class).count()
    }

    fn threshold(&self) -> usize {
        0
    }
}

#[test]
fn migration_keeps_order() {
    let _ = tracing_subscriber::fmt::try_init();

    let relay = Relay::new(RelayOptions::default()).unwrap();
    let (a, b) = (EndpointId::new(1), EndpointId::new(2));
    relay.bind(a, ()).unwrap();
    relay.bind(b, ()).unwrap();

    for i in 0..4 {
        let _ = relay.submit(a, Unit::data(format!("a{i}")), true).unwrap();
    }
    let _ = relay.submit(a, Unit::management("m"), true).unwrap();

    relay.select_policy("dctcp", &[PolicyParam::new("q_threshold", "2")]).unwrap();
    assert_eq!(relay.policy(), "dctcp");
    assert_eq!(relay.threshold(), 2);
    assert_eq!(relay.queue_depth(a, UnitClass::Data), 4);

    // Management first, then data in arrival order. The new policy marks from the third unit on
    let units: Vec<_> = std::iter::from_fn(|| relay.drain(a)).collect();
    let payloads: Vec<_> = units.iter().map(|u| u.payload().clone()).collect();
    assert_eq!(payloads, ["m", "a0", "a1", "a2", "a3"]);
    assert_eq!(units.iter().filter(|u| u.is_congested()).count(), 3);

    // Endpoints without a queue get one lazily from the new policy
    let res = relay.submit(b, Unit::data("b"), false).unwrap();
    assert!(matches!(res, Submitted::SendNow(_)));
}

#[test]
fn migration_counts_refused_units() {
    let relay = Relay::new(RelayOptions::default()).unwrap();
    let id = EndpointId::new(1);
    relay.bind(id, ()).unwrap();

    for _ in 0..5 {
        let _ = relay.submit(id, Unit::data("x"), true).unwrap();
    }

    let params = [PolicyParam::new("q_max", "3")];
    relay.select_policy("dctcp", &params).unwrap();

    assert_eq!(relay.queue_depth(id, UnitClass::Data), 3);
    assert_eq!(relay.endpoint_stats(id).unwrap().dropped(), 2);
}

#[test]
fn select_unknown_policy_keeps_current() {
    let relay = Relay::<()>::new(RelayOptions::default()).unwrap();

    let res = relay.select_policy("wfq", &[]);
    assert!(matches!(res, Err(RelayError::Policy(PolicyError::UnknownPolicy(_)))));
    assert_eq!(relay.policy(), "default");
}

#[test]
fn published_policy_is_selectable() {
    let relay = Relay::new(RelayOptions::default()).unwrap();
    relay.publish("unbounded", || Unbounded).unwrap();
    assert!(relay.publish("unbounded", || Unbounded).is_err());

    let id = EndpointId::new(9);
    relay.bind(id, ()).unwrap();
    relay.select_policy("unbounded", &[]).unwrap();

    for _ in 0..2000 {
        assert_eq!(relay.submit(id, Unit::data("x"), false).unwrap(), Submitted::Scheduled);
    }
    assert_eq!(relay.queue_depth(id, UnitClass::Data), 2000);
    assert_eq!(relay.threshold(), 0);
}

#[test]
fn red_policy_through_relay() {
    let options = RelayOptions::default()
        .policy("red")
        .param("wlog", "0")
        .param("qth_min", "2")
        .param("qth_max", "5");
    let relay = Relay::new(options).unwrap();
    assert_eq!(relay.threshold(), 2);

    let id = EndpointId::new(4);
    relay.bind(id, ()).unwrap();

    let outcomes: Vec<_> =
        (0..6).map(|_| relay.submit(id, Unit::data("x"), true).unwrap()).collect();
    assert!(outcomes[..5].iter().all(|o| *o == Submitted::Scheduled));
    assert_eq!(outcomes[5], Submitted::Dropped);
}

#[test]
fn failed_queue_creation_destroys_unit() {
    let _ = tracing_subscriber::fmt::try_init();

    let relay = Relay::new(RelayOptions::default().param("q_max", usize::MAX.to_string())).unwrap();
    let id = EndpointId::new(3);
    relay.bind(id, ()).unwrap();

    let res = relay.submit(id, Unit::data("x"), false);
    assert!(matches!(res, Err(RelayError::Policy(PolicyError::ResourceExhausted(_)))));

    let stats = relay.endpoint_stats(id).unwrap();
    assert_eq!(stats.errors(), 1);
    assert_eq!(stats.queued(), 0);
    assert_eq!(stats.sent(), 0);
    assert_eq!(relay.queue_depth(id, UnitClass::Data), 0);
    assert!(relay.drain(id).is_none());

    // The next submit creates the queue with the lowered capacity
    relay.set_param("q_max", "10").unwrap();
    assert!(matches!(relay.submit(id, Unit::data("y"), false).unwrap(), Submitted::SendNow(_)));
    assert_eq!(relay.submit(id, Unit::data("z"), true).unwrap(), Submitted::Scheduled);
    assert_eq!(stats.errors(), 1);
}

#[test]
fn failed_migration_keeps_current_policy() {
    let relay = Relay::new(RelayOptions::default()).unwrap();
    let (a, b) = (EndpointId::new(1), EndpointId::new(2));
    relay.bind(a, ()).unwrap();
    relay.bind(b, ()).unwrap();

    for i in 0..3 {
        let _ = relay.submit(a, Unit::data(format!("a{i}")), true).unwrap();
    }
    let _ = relay.submit(b, Unit::management("m"), true).unwrap();

    let params = [PolicyParam::new("q_max", usize::MAX.to_string())];
    let res = relay.select_policy("default", &params);
    assert!(matches!(res, Err(RelayError::Policy(PolicyError::ResourceExhausted(_)))));

    assert_eq!(relay.policy(), "default");
    assert_eq!(relay.threshold(), 35);
    assert_eq!(relay.queue_depth(a, UnitClass::Data), 3);
    assert_eq!(relay.queue_depth(b, UnitClass::Management), 1);
    assert_eq!(relay.endpoint_stats(a).unwrap().dropped(), 0);

    let payloads: Vec<_> =
        std::iter::from_fn(|| relay.drain(a)).map(|u| u.into_payload()).collect();
    assert_eq!(payloads, ["a0", "a1", "a2"]);
    assert_eq!(relay.drain(b).unwrap().payload(), "m");
}
