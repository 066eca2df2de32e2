use std::{
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    thread,
    time::Duration,
};

use tether::{CompletionGate, Strong, Timer};

#[test]
fn self_cancelling_timer_fires_once() {
    let fired = Arc::new(AtomicU32::new(0));
    let fired_cl = Arc::clone(&fired);

    let timer = Timer::periodic(Duration::from_millis(10), move |cx| {
        fired_cl.fetch_add(1, Ordering::SeqCst);
        cx.cancel();
    });

    thread::sleep(Duration::from_millis(100));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(timer.fire_count(), 1);
    assert!(timer.is_cancelled());
}

#[test]
fn periodic_timer_fires_repeatedly() {
    let timer = Timer::periodic(Duration::from_millis(10), |_| {});
    thread::sleep(Duration::from_millis(120));
    timer.cancel();
    let fired = timer.fire_count();
    assert!(fired >= 3, "Expected several firings, got {fired}");

    thread::sleep(Duration::from_millis(50));
    assert_eq!(timer.fire_count(), fired, "No firing may start after cancel");
}

#[test]
fn one_shot_timer_fires_once() {
    let gate = Arc::new(CompletionGate::new());
    let gate_cl = Arc::clone(&gate);
    let timer = Timer::once(Duration::from_millis(10), move |cx| {
        gate_cl.signal(cx.firing()).unwrap();
    });

    assert_eq!(gate.wait_timeout(Duration::from_secs(5)).ready(), Some(1));
    thread::sleep(Duration::from_millis(50));
    assert_eq!(timer.fire_count(), 1);
    assert!(!timer.is_periodic());
}

#[test]
fn cancel_is_idempotent() {
    let timer = Timer::periodic(Duration::from_millis(10), |_| {});
    let cancellation = timer.cancellation();
    timer.cancel();
    timer.cancel();
    cancellation.cancel();
    assert!(cancellation.is_cancelled());
}

#[test]
fn cancel_before_first_firing() {
    let timer = Timer::periodic(Duration::from_millis(30), |_| {});
    timer.cancel();
    thread::sleep(Duration::from_millis(80));
    assert_eq!(timer.fire_count(), 0);
}

#[test]
fn dropping_timer_cancels_it() {
    let fired = Arc::new(AtomicU32::new(0));
    let fired_cl = Arc::clone(&fired);
    let timer = Timer::periodic(Duration::from_millis(10), move |_| {
        fired_cl.fetch_add(1, Ordering::SeqCst);
    });
    let cancellation = timer.cancellation();

    thread::sleep(Duration::from_millis(35));
    drop(timer);
    let at_drop = fired.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));

    assert!(cancellation.is_cancelled());
    assert!(fired.load(Ordering::SeqCst) <= at_drop + 1);
    assert_eq!(cancellation.fire_count(), u64::from(fired.load(Ordering::SeqCst)));
}

#[test]
fn detached_timer_keeps_running() {
    let fired = Arc::new(AtomicU32::new(0));
    let fired_cl = Arc::clone(&fired);
    let cancellation = Timer::periodic(Duration::from_millis(10), move |_| {
        fired_cl.fetch_add(1, Ordering::SeqCst);
    })
    .detach();

    thread::sleep(Duration::from_millis(60));
    cancellation.cancel();
    assert!(fired.load(Ordering::SeqCst) >= 2);
}

#[test]
fn weak_bound_timer_stops_when_target_expires() {
    struct Feed {
        polls: AtomicU32,
    }

    let feed = Strong::new(Feed {
        polls: AtomicU32::new(0),
    });
    let timer = Timer::schedule_weak(
        Duration::from_millis(10),
        &feed.make_weak(),
        |feed: &Feed, _| {
            feed.polls.fetch_add(1, Ordering::SeqCst);
        },
        true,
    );

    thread::sleep(Duration::from_millis(60));
    assert!(feed.polls.load(Ordering::SeqCst) >= 2);
    drop(feed);

    thread::sleep(Duration::from_millis(60));
    assert!(timer.is_cancelled(), "Timer should cancel itself once the target is gone");
}

#[test]
fn panicking_callback_cancels_timer() {
    let timer = Timer::periodic(Duration::from_millis(10), |_| panic!("tick failed"));
    thread::sleep(Duration::from_millis(60));
    assert!(timer.is_cancelled());
    assert_eq!(timer.fire_count(), 1);
}

#[test]
fn out_of_range_interval_cancels_timer() {
    let timer = Timer::periodic(Duration::MAX, |_| {});
    thread::sleep(Duration::from_millis(50));
    assert!(timer.is_cancelled());
    assert_eq!(timer.fire_count(), 0);
}
