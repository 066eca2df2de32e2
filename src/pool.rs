//! The shared worker pool on which asynchronous operations run.
//!
//! The pool is created once per process. It can be configured explicitly with
//! [`init`]; otherwise it is created lazily from [`Config::default`] the first
//! time an operation starts. Timers do not use the pool, they get a dedicated
//! thread each, but they share the configured thread name prefix.

use std::sync::{
    OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use futures::executor::{ThreadPool, ThreadPoolBuilder};

use crate::config::Config;

static THREAD_POOL: OnceLock<ThreadPool> = OnceLock::new();
static THREAD_NAME_PREFIX: OnceLock<String> = OnceLock::new();
static NEXT_THREAD: AtomicUsize = AtomicUsize::new(0);

/// Configures the shared pool.
///
/// Returns `false` if the pool already exists, in which case `config` is
/// ignored. Pool construction failures are logged and the pool is left
/// uninitialised, so a later call may retry.
pub fn init(config: &Config) -> bool {
    if THREAD_POOL.get().is_some() {
        return false;
    }
    let Some(pool) = build(config) else {
        return false;
    };
    if THREAD_POOL.set(pool).is_err() {
        // Lost a race with another initialiser.
        return false;
    }
    let _ = THREAD_NAME_PREFIX.set(config.thread_name_prefix.clone());
    true
}

/// Returns `true` once the shared pool exists.
pub fn is_initialized() -> bool {
    THREAD_POOL.get().is_some()
}

/// Runs `job` on the shared pool.
///
/// Hands the job back if no pool could be created so the caller can settle
/// whatever state the job was meant to complete.
pub(crate) fn spawn<J>(job: J) -> Result<(), J>
where
    J: FnOnce() + Send + 'static,
{
    if THREAD_POOL.get().is_none() {
        init(&Config::default());
    }
    let Some(pool) = THREAD_POOL.get() else {
        return Err(job);
    };
    pool.spawn_ok(async move { job() });
    Ok(())
}

/// Name for a dedicated thread such as a timer thread.
pub(crate) fn thread_name(kind: &str) -> String {
    let prefix = THREAD_NAME_PREFIX.get().map_or("tether", String::as_str);
    let n = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{kind}-{n}")
}

fn build(config: &Config) -> Option<ThreadPool> {
    match ThreadPoolBuilder::new()
        .pool_size(config.pool_size.max(1))
        .name_prefix(format!("{}-worker-", config.thread_name_prefix))
        .create()
    {
        Ok(pool) => {
            tracing::debug!(size = config.pool_size, "Worker pool started");
            Some(pool)
        }
        Err(e) => {
            tracing::error!(%e, "Worker pool creation failed");
            None
        }
    }
}
