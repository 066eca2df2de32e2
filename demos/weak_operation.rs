//! An operation captures a weak reference to the object that started it,
//! waits, then only reads the object's state if it is still alive.

use std::{thread, time::Duration};

use tether::{
    OperationHandle, Strong,
    report::{Console, Report},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

struct MyClass {
    hello: String,
}

impl MyClass {
    fn retrieve_value_async(this: &Strong<Self>, delay: Duration) -> OperationHandle<String> {
        let weak_this = this.make_weak();
        tether::operation::start(move |_| {
            thread::sleep(delay);
            Ok(weak_this
                .resolve()
                .map(|strong_this| strong_this.hello.clone())
                .unwrap_or_default())
        })
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let instance = Strong::new(MyClass {
        hello: "Hellow World!".to_string(),
    });
    let kept = MyClass::retrieve_value_async(&instance, Duration::from_millis(100));
    match kept.get() {
        Ok(value) => Console.report(&format!("While alive: {value:?}")),
        Err(e) => tracing::error!(%e, "Retrieval failed"),
    }

    let dropped = MyClass::retrieve_value_async(&instance, Duration::from_millis(100));
    // Simulate the instance going out of scope.
    drop(instance);
    match dropped.get() {
        Ok(value) => Console.report(&format!("After drop: {value:?}")),
        Err(e) => tracing::error!(%e, "Retrieval failed"),
    }
}
