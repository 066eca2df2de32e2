use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use tether::{Strong, WeakRef};

struct Recipient {
    value: Mutex<String>,
}

fn recipient(value: &str) -> Strong<Recipient> {
    Strong::new(Recipient {
        value: Mutex::new(value.to_string()),
    })
}

#[test]
fn resolve_fails_after_destruction() {
    let owner = recipient("Hello, World!");
    let weak = owner.make_weak();

    let first = weak.resolve();
    assert!(first.is_some(), "Referent should still be alive");
    drop(first);

    drop(owner);
    assert!(weak.resolve().is_none(), "Referent should have expired");
    assert!(weak.is_expired());
}

#[test]
fn resolved_handle_keeps_referent_alive() {
    let owner = recipient("kept");
    let weak = owner.make_weak();
    let resolved = weak.resolve().unwrap();

    drop(owner);
    assert!(!weak.is_expired(), "Resolved handle should keep it alive");
    assert_eq!(*resolved.value.lock().unwrap(), "kept");

    drop(resolved);
    assert!(weak.resolve().is_none());
}

#[test]
fn every_weak_handle_expires() {
    let owner = recipient("many");
    let weaks: Vec<WeakRef<Recipient>> = (0..8).map(|_| owner.make_weak()).collect();
    let cloned = weaks[0].clone();
    drop(owner);
    assert!(weaks.iter().all(|w| w.resolve().is_none()));
    assert!(cloned.resolve().is_none());
}

#[test]
fn strong_handles_share_identity() {
    let owner = recipient("id");
    let other = owner.make_strong();
    assert!(owner.ptr_eq(&other));
    assert_eq!(owner.id(), other.id());
    assert_eq!(owner.strong_count(), 2);

    let stranger = recipient("id");
    assert!(!owner.ptr_eq(&stranger));
}

#[test]
fn resolve_races_with_destruction() {
    for _ in 0..50 {
        let owner = recipient("race");
        let weak = owner.make_weak();
        let resolved = Arc::new(Mutex::new(Vec::new()));
        let resolved_cl = Arc::clone(&resolved);

        let reader = thread::spawn(move || {
            for _ in 0..100 {
                // Either a usable handle or nothing.
                if let Some(strong) = weak.resolve() {
                    resolved_cl.lock().unwrap().push(strong.value.lock().unwrap().len());
                }
            }
        });
        thread::sleep(Duration::from_micros(50));
        drop(owner);
        reader.join().unwrap();

        assert!(resolved.lock().unwrap().iter().all(|len| *len == 4));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn guarded_future_yields_value_while_alive() {
    let owner = recipient("Hellow World!");
    let weak = owner.make_weak();

    let result = weak
        .after(tokio::time::sleep(Duration::from_millis(20)), |this, ()| {
            this.value.lock().unwrap().clone()
        })
        .await;

    assert_eq!(result, Some("Hellow World!".to_string()));
}

#[tokio::test(flavor = "multi_thread")]
async fn guarded_future_yields_none_once_expired() {
    let owner = recipient("gone");
    let weak = owner.make_weak();

    let pending = tokio::spawn(weak.after(
        tokio::time::sleep(Duration::from_millis(50)),
        |this: &Recipient, ()| this.value.lock().unwrap().clone(),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    drop(owner);

    let result = pending.await.unwrap();
    assert_eq!(result, None, "Continuation should not run for an expired owner");
}
