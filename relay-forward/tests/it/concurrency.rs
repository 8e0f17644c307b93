use std::{sync::Arc, thread};

use relay_common::{EndpointId, Unit};
use relay_forward::{Relay, RelayOptions, Submitted};

const THREADS: u32 = 4;
const UNITS: usize = 250;

#[test]
fn concurrent_submits_are_accounted_once() {
    let relay = Arc::new(Relay::new(RelayOptions::default()).unwrap());
    let shared = EndpointId::new(100);
    relay.bind(shared, ()).unwrap();

    thread::scope(|s| {
        for t in 1..=THREADS {
            let relay = Arc::clone(&relay);
            s.spawn(move || {
                let own = EndpointId::new(t);
                relay.bind(own, ()).unwrap();

                for i in 0..UNITS {
                    let res = relay.submit(own, Unit::data(format!("{t}:{i}")), true).unwrap();
                    assert_eq!(res, Submitted::Scheduled);
                    let _ = relay.submit(shared, Unit::data("s"), true).unwrap();
                }
            });
        }
    });

    // Per-endpoint FIFO order holds under concurrency
    for t in 1..=THREADS {
        let own = EndpointId::new(t);
        for i in 0..UNITS {
            let unit = relay.drain(own).unwrap();
            assert_eq!(unit.payload(), format!("{t}:{i}").as_str());
        }
        assert!(relay.drain(own).is_none());
    }

    // 1000 shared submits against q_max 1000: nothing dropped, nothing duplicated
    let drained = std::iter::from_fn(|| relay.drain(shared)).count();
    let stats = relay.endpoint_stats(shared).unwrap();
    assert_eq!(drained as u64, stats.queued());
    assert_eq!(drained, THREADS as usize * UNITS);
    assert_eq!(stats.dropped(), 0);
}

#[test]
fn unbind_races_with_submit() {
    let relay = Arc::new(Relay::new(RelayOptions::default()).unwrap());
    let id = EndpointId::new(1);
    relay.bind(id, ()).unwrap();

    thread::scope(|s| {
        let submitter = Arc::clone(&relay);
        s.spawn(move || {
            for _ in 0..500 {
                // Either outcome is fine, the unit is owned exactly once
                let _ = submitter.submit(id, Unit::data("x"), true);
            }
        });

        let unbinder = Arc::clone(&relay);
        s.spawn(move || {
            let _ = unbinder.unbind(id);
        });
    });

    assert!(!relay.is_bound(id));
    assert!(relay.drain(id).is_none());
}
