use std::sync::atomic::AtomicBool;

use anyhow::Result;

use crate::domain::message::{RawHeaderBlob, SearchWindow};

/// Somewhere message headers can be pulled from for one sync cycle.
pub trait HeaderSource {
    /// Headers of every message received on or after `window.since`, in
    /// ascending identifier order. Stops early, returning what it already
    /// has, once `shutdown` is set.
    fn fetch_since(&self, window: &SearchWindow, shutdown: &AtomicBool) -> Result<Vec<RawHeaderBlob>>;
}
