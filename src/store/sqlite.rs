use anyhow::{Context, Result};
use log::warn;
use rusqlite::{Connection, params, params_from_iter};
use std::path::Path;

use crate::config::{Engine, StoreConfig, resolve_db_path};
use crate::domain::message::{MessageRecord, UNKNOWN_DATE};
use crate::store::repo::{ListQuery, MessageStore};

pub struct SqliteStore {
    conn: Connection,
    table: String,
}

impl SqliteStore {
    /// Open the database at `path` and make sure `table` exists. `table` must
    /// be a plain identifier; the config loader checks this.
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;
        Self::from_connection(conn, table)
    }

    pub fn open_configured(cfg: &StoreConfig) -> Result<Self> {
        match cfg.engine {
            Engine::Sqlite => Self::open(&resolve_db_path(cfg)?, &cfg.table),
        }
    }

    fn from_connection(conn: Connection, table: &str) -> Result<Self> {
        let store = Self {
            conn,
            table: table.to_string(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn upsert_sql(&self) -> String {
        format!(
            r#"
            INSERT INTO "{}" (subject, date, sender)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(subject, date) DO UPDATE SET
              sender=excluded.sender
            "#,
            self.table
        )
    }

    fn columns(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(&format!(r#"PRAGMA table_info("{}")"#, self.table))?;
        let names = stmt
            .query_map([], |r| r.get::<_, String>(1))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }
}

impl MessageStore for SqliteStore {
    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{}" (
                subject TEXT NOT NULL,
                date    TEXT NOT NULL,
                sender  TEXT NOT NULL DEFAULT '',
                UNIQUE  (subject, date)
            );
            "#,
            self.table
        ))?;

        // tables created before senders were recorded only have subject and date
        if !self.columns()?.iter().any(|c| c == "sender") {
            warn!("adding sender column to table {}", self.table);
            self.conn.execute_batch(&format!(
                r#"ALTER TABLE "{}" ADD COLUMN sender TEXT NOT NULL DEFAULT ''"#,
                self.table
            ))?;
        }
        Ok(())
    }

    fn upsert(&self, record: &MessageRecord) -> Result<()> {
        self.conn.execute(
            &self.upsert_sql(),
            params![record.subject, record.date_epoch.to_string(), record.sender],
        )?;
        Ok(())
    }

    fn upsert_all(&self, records: &[MessageRecord]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&self.upsert_sql())?;
            for r in records {
                stmt.execute(params![r.subject, r.date_epoch.to_string(), r.sender])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn count(&self) -> Result<usize> {
        let n: i64 = self.conn.query_row(
            &format!(r#"SELECT COUNT(*) FROM "{}""#, self.table),
            [],
            |r| r.get(0),
        )?;
        Ok(n as usize)
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<MessageRecord>> {
        let mut sql = format!(r#"SELECT subject, date, sender FROM "{}""#, self.table);
        let patterns: Vec<String> = query
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| format!("%{}%", escape_like(k)))
            .collect();
        for i in 0..patterns.len() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!(r"subject LIKE ?{} ESCAPE '\'", i + 1));
        }
        if query.newest_first {
            sql.push_str(" ORDER BY CAST(date AS INTEGER) DESC");
        }
        let limit = if query.limit == 0 {
            -1
        } else {
            query.limit as i64
        };
        sql.push_str(&format!(" LIMIT {limit} OFFSET {}", query.offset));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(patterns.iter()))?;
        let mut out = Vec::new();
        while let Some(r) = rows.next()? {
            let date: String = r.get(1)?;
            out.push(MessageRecord {
                subject: r.get(0)?,
                date_epoch: date.trim().parse().unwrap_or(UNKNOWN_DATE),
                sender: r.get(2)?,
            });
        }
        Ok(out)
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::from_connection(Connection::open_in_memory().unwrap(), "message").unwrap()
    }

    fn rec(subject: &str, date_epoch: i64, sender: &str) -> MessageRecord {
        MessageRecord {
            subject: subject.into(),
            date_epoch,
            sender: sender.into(),
        }
    }

    #[test]
    fn ensure_schema_is_idempotent() {
        let s = store();
        s.ensure_schema().unwrap();
        s.ensure_schema().unwrap();
        assert_eq!(s.count().unwrap(), 0);
    }

    #[test]
    fn same_subject_and_date_keeps_one_row_with_latest_sender() {
        let s = store();
        s.upsert(&rec("hello", 100, "a@x")).unwrap();
        s.upsert(&rec("hello", 100, "b@x")).unwrap();
        s.upsert(&rec("hello", 101, "c@x")).unwrap();

        assert_eq!(s.count().unwrap(), 2);
        let rows = s
            .list(&ListQuery {
                newest_first: true,
                ..ListQuery::default()
            })
            .unwrap();
        assert_eq!(rows, vec![rec("hello", 101, "c@x"), rec("hello", 100, "b@x")]);
    }

    #[test]
    fn batch_upsert_is_order_independent() {
        let a = store();
        let b = store();
        let batch = vec![rec("x", 1, "s1"), rec("y", 2, "s2"), rec("z", 0, "")];
        let mut reversed = batch.clone();
        reversed.reverse();

        assert_eq!(a.upsert_all(&batch).unwrap(), 3);
        b.upsert_all(&reversed).unwrap();
        a.upsert_all(&batch).unwrap();

        let all = ListQuery {
            newest_first: true,
            ..ListQuery::default()
        };
        assert_eq!(a.list(&all).unwrap(), b.list(&all).unwrap());
        assert_eq!(a.count().unwrap(), 3);
    }

    #[test]
    fn list_filters_sorts_and_pages() {
        let s = store();
        s.upsert_all(&[
            rec("weekly report", 300, "a"),
            rec("report 50% done", 0, "b"),
            rec("lunch", 200, "c"),
            rec("Monthly REPORT", 100, "d"),
        ])
        .unwrap();

        let reports = s
            .list(&ListQuery {
                keywords: vec!["report".into()],
                newest_first: true,
                ..ListQuery::default()
            })
            .unwrap();
        let subjects: Vec<_> = reports.iter().map(|r| r.subject.as_str()).collect();
        assert_eq!(subjects, vec!["weekly report", "Monthly REPORT", "report 50% done"]);

        let literal = s
            .list(&ListQuery {
                keywords: vec!["50%".into(), " done ".into()],
                ..ListQuery::default()
            })
            .unwrap();
        assert_eq!(literal.len(), 1);

        let page = s
            .list(&ListQuery {
                newest_first: true,
                offset: 1,
                limit: 2,
                ..ListQuery::default()
            })
            .unwrap();
        assert_eq!(page, vec![rec("lunch", 200, "c"), rec("Monthly REPORT", 100, "d")]);
    }

    #[test]
    fn legacy_table_gains_sender_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE message (subject TEXT, date TEXT, UNIQUE (subject, date));
             INSERT INTO message (subject, date) VALUES ('old', '42');",
        )
        .unwrap();

        let s = SqliteStore::from_connection(conn, "message").unwrap();
        assert_eq!(s.list(&ListQuery::default()).unwrap(), vec![rec("old", 42, "")]);
        s.upsert(&rec("old", 42, "new@x")).unwrap();
        assert_eq!(s.list(&ListQuery::default()).unwrap(), vec![rec("old", 42, "new@x")]);
    }

    #[test]
    fn opens_file_backed_table_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mail.db");
        SqliteStore::open(&path, "inbox")
            .unwrap()
            .upsert(&rec("kept", 7, "s"))
            .unwrap();

        let reopened = SqliteStore::open(&path, "inbox").unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
    }
}
