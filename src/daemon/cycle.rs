use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use log::{debug, info};

use crate::config::StoreConfig;
use crate::domain::message::SearchWindow;
use crate::mail::headers::record_from_blob;
use crate::mail::source::HeaderSource;
use crate::store::repo::MessageStore;
use crate::store::sqlite::SqliteStore;

const PROGRESS_EVERY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub window: SearchWindow,
    pub fetched: usize,
    pub stored: usize,
}

/// Fetch every header in `window`, decode them and upsert the records in one
/// transaction. The store is opened for this cycle only.
pub fn run_cycle(
    source: &dyn HeaderSource,
    store_cfg: &StoreConfig,
    window: &SearchWindow,
    shutdown: &AtomicBool,
) -> Result<CycleReport> {
    info!("sync cycle starting, messages since {}", window.since);

    let blobs = source.fetch_since(window, shutdown)?;
    let total = blobs.len();

    let mut records = Vec::with_capacity(total);
    for (n, blob) in blobs.iter().enumerate() {
        if shutdown.load(Ordering::SeqCst) {
            info!("shutdown requested, keeping {n} of {total} decoded messages");
            break;
        }
        if n > 0 && n % PROGRESS_EVERY == 0 {
            debug!("decoded {n}/{total} messages");
        }
        records.push(record_from_blob(blob));
    }

    let store = SqliteStore::open_configured(store_cfg)?;
    let stored = store.upsert_all(&records)?;
    info!("sync cycle done, {stored} messages processed");

    Ok(CycleReport {
        window: *window,
        fetched: total,
        stored,
    })
}
