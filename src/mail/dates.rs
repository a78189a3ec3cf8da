use log::debug;

use crate::domain::message::UNKNOWN_DATE;

/// Epoch seconds for a `Date` header value, or [`UNKNOWN_DATE`] when the
/// value is empty or cannot be understood. A missing zone reads as UTC.
pub fn normalize_date(raw: &str) -> i64 {
    // folded values keep their line breaks; dateparse only splits on spaces
    let flat = raw.replace(['\r', '\n', '\t'], " ");
    match mailparse::dateparse(flat.trim()) {
        Ok(epoch) => epoch,
        Err(e) => {
            debug!("unparseable date {raw:?}: {e}");
            UNKNOWN_DATE
        }
    }
}
