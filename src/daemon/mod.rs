pub mod cycle;
pub mod window;

use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use log::info;
use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::config::StoreConfig;
use crate::daemon::cycle::run_cycle;
use crate::daemon::window::window_for;
use crate::mail::source::HeaderSource;

const POLL_STEP: Duration = Duration::from_millis(250);

pub struct DaemonConfig {
    /// Time span expression for the search window, re-read every cycle.
    pub since: String,
    /// Measured from the start of one cycle to the start of the next.
    pub interval: Duration,
    pub timezone: Tz,
    /// Stop after this many cycles; `None` runs until shutdown.
    pub max_cycles: Option<u64>,
}

/// Flag flipped by SIGINT or SIGTERM (ctrlc `termination` feature).
pub fn install_shutdown_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let s2 = stop.clone();
    ctrlc::set_handler(move || {
        s2.store(true, Ordering::SeqCst);
    })?;
    Ok(stop)
}

/// Run sync cycles back to back, one at a time. A failed cycle ends the loop
/// with its error.
pub fn run_daemon(
    source: &dyn HeaderSource,
    store: &StoreConfig,
    cfg: &DaemonConfig,
    shutdown: &AtomicBool,
) -> Result<()> {
    let mut cycles = 0u64;

    while !shutdown.load(Ordering::SeqCst) {
        let started = Instant::now();
        let window = window_for(Utc::now(), &cfg.since, cfg.timezone);
        run_cycle(source, store, &window, shutdown)?;
        cycles += 1;

        if cfg.max_cycles.is_some_and(|max| cycles >= max) {
            break;
        }
        if !wait_until(started + cfg.interval, shutdown) {
            break;
        }
    }

    info!("daemon stopped after {cycles} cycles");
    Ok(())
}

/// Sleep until `deadline`. Returns false if shutdown was requested first.
/// A deadline already in the past returns immediately.
pub fn wait_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(POLL_STEP));
    }
}
