//! A recipient subscribes to an event source through a weak reference and goes
//! out of scope before the event is raised. Nothing is delivered and nothing
//! crashes.

use tether::{
    EventChannel, Strong,
    report::{Console, Report},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Default)]
struct EventSource {
    event: EventChannel<i32>,
}

impl EventSource {
    fn raise_event(&self) -> usize {
        self.event.publish(&0)
    }
}

struct EventRecipient {
    value: String,
}

impl EventRecipient {
    // Lambda bound through a weak reference.
    fn register(this: &Strong<Self>, source: &EventSource) {
        let weak = this.make_weak();
        source.event.subscribe(move |_| {
            if let Some(strong) = weak.resolve() {
                Console.report(&strong.value);
            }
        });
    }

    // Member function bound through a weak reference.
    fn register_method(this: &Strong<Self>, source: &EventSource) {
        source
            .event
            .subscribe_weak(&this.make_weak(), EventRecipient::on_event);
    }

    fn on_event(&self, _args: &i32) {
        Console.report(&self.value);
    }
}

fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Console.report("WeakReferenceTest has started!");

    let event_source = EventSource::default();
    let event_recipient = Strong::new(EventRecipient {
        value: "Hello, World!".to_string(),
    });
    EventRecipient::register(&event_recipient, &event_source);
    EventRecipient::register_method(&event_recipient, &event_source);

    let delivered = event_source.raise_event();
    tracing::info!(delivered, "Raised while the recipient is alive");

    // Simulate the event recipient going out of scope.
    drop(event_recipient);

    let delivered = event_source.raise_event();
    tracing::info!(delivered, "Raised after the recipient was dropped");

    Console.report("WeakReferenceTest has finished!");
}
