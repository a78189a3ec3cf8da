use chrono::NaiveDate;

/// Remote identifier of a message inside the selected mailbox.
pub type MessageUid = u32;

/// Epoch value stored when a message carries no usable `Date` header.
/// Sorts before every known date.
pub const UNKNOWN_DATE: i64 = 0;

/// One stored row. `(subject, date_epoch)` is the natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub subject: String,
    pub date_epoch: i64,
    pub sender: String,
}

/// The `Subject`, `Date` and `From` header lines fetched for one message.
/// Lives only until it has been turned into a [`MessageRecord`].
#[derive(Debug, Clone)]
pub struct RawHeaderBlob {
    pub uid: MessageUid,
    pub header: Vec<u8>,
}

/// Inclusive lower bound for a server-side `SINCE` search. Day granularity only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchWindow {
    pub since: NaiveDate,
}

impl SearchWindow {
    /// Date in the `dd-Mon-yyyy` form IMAP `SEARCH SINCE` expects.
    pub fn imap_date(&self) -> String {
        self.since.format("%d-%b-%Y").to_string()
    }
}
