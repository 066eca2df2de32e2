//! A periodic timer starts a long-running retrieval, reports its progress,
//! cancels itself once the first result is in and releases `main` through a
//! completion gate.

use std::{process::ExitCode, sync::Arc, thread, time::Duration};

use tether::{
    CompletionGate, Config, Operation, Timer, Wait, pool,
    report::{Console, Report},
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

// Bytes the simulated feed delivers in each chunk.
const CHUNK: u32 = 4096;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter)
        .init();
}

// Stands in for a network fetch: yields a title after a few chunks.
fn retrieve_first_title(reporter: Arc<dyn Report>) -> Operation<String, u32, String> {
    Operation::new(|progress| {
        let mut received = 0;
        for _ in 0..5 {
            if progress.is_cancelled() {
                return Err("retrieval cancelled".to_string());
            }
            thread::sleep(Duration::from_millis(40));
            received += CHUNK;
            progress.report(received);
        }
        Ok("Windows Blog".to_string())
    })
    .on_progress(move |bytes| reporter.report(&format!("Received {bytes} bytes")))
}

fn main() -> ExitCode {
    init_tracing();
    let config = Config::load("tether.toml")
        .unwrap_or_else(|e| {
            tracing::warn!(%e, "Falling back to default config");
            Config::default()
        })
        .with_env_overrides();
    pool::init(&config);

    let console: Arc<dyn Report> = Arc::new(Console);
    console.report("Concurrency test started!");

    let done = Arc::new(CompletionGate::new());
    let timer_done = Arc::clone(&done);
    let timer_console = Arc::clone(&console);
    let timer = Timer::periodic(Duration::from_millis(200), move |cx| {
        let title = retrieve_first_title(Arc::clone(&timer_console)).start().get();
        cx.cancel();
        timer_console.report("Timer has been cancelled!");
        if let Err(e) = timer_done.signal(title) {
            tracing::error!(%e, "Feed chain completed twice");
        }
    });
    console.report("Timer has started!");

    // Other work could happen here while the timer runs.

    let code = match done.wait_timeout(Duration::from_secs(10)) {
        Wait::Ready(Ok(title)) => {
            console.report(&format!("First title: {title}"));
            ExitCode::SUCCESS
        }
        Wait::Ready(Err(e)) => {
            tracing::error!(%e, "Retrieval failed");
            ExitCode::FAILURE
        }
        Wait::TimedOut => {
            tracing::error!("Timed out waiting for the feed");
            timer.cancel();
            ExitCode::FAILURE
        }
    };

    console.report("Concurrency test finished!");
    code
}
