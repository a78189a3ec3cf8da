use anyhow::Result;

use crate::domain::message::MessageRecord;

/// Read-side query over stored records.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Every keyword must appear in the subject.
    pub keywords: Vec<String>,
    /// Order by date, newest first. Unknown dates (0) come last.
    pub newest_first: bool,
    pub offset: usize,
    /// 0 means no limit.
    pub limit: usize,
}

pub trait MessageStore {
    /// Create the message table if it does not exist yet.
    fn ensure_schema(&self) -> Result<()>;

    /// Insert, or replace the sender of the row with the same subject and date.
    fn upsert(&self, record: &MessageRecord) -> Result<()>;
    /// Upsert a whole batch and commit it as one unit.
    fn upsert_all(&self, records: &[MessageRecord]) -> Result<usize>;

    fn count(&self) -> Result<usize>;
    fn list(&self, query: &ListQuery) -> Result<Vec<MessageRecord>>;
}
