//! Periodically copies message metadata (subject, date, sender) from an IMAP
//! mailbox into a local SQLite table keyed by subject and date.

pub mod auth;
pub mod config;
pub mod daemon;
pub mod domain;
pub mod mail;
pub mod store;
