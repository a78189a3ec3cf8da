use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use imap::Session;
use log::{debug, info, warn};
use native_tls::TlsConnector;

use crate::config::{ImapConfig, Security};
use crate::domain::message::{MessageUid, RawHeaderBlob, SearchWindow};
use crate::mail::source::HeaderSource;

const HEADER_QUERY: &str = "(UID BODY.PEEK[HEADER.FIELDS (SUBJECT DATE FROM)])";
const PROGRESS_EVERY: usize = 500;

pub struct ImapClient {
    pub server: String,
    pub port: u16,
    pub security: Security,
    pub user: String,
    password: String,
    pub mailbox: String,
    pub max_messages: usize,
}

impl ImapClient {
    pub fn new(cfg: &ImapConfig, password: impl Into<String>) -> Self {
        Self {
            server: cfg.host.clone(),
            port: cfg.port,
            security: cfg.security,
            user: cfg.username.clone(),
            password: password.into(),
            mailbox: cfg.mailbox.clone(),
            max_messages: cfg.max_messages,
        }
    }

    fn login<T: Read + Write>(&self, client: imap::Client<T>) -> Result<Session<T>> {
        client
            .login(&self.user, &self.password)
            .map_err(|(e, _)| anyhow!("IMAP login as {} failed: {e}", self.user))
    }

    /// Run one search-and-fetch over an authenticated session. The session is
    /// logged out whether or not the fetch succeeds.
    fn fetch_with<T: Read + Write>(
        &self,
        session: Session<T>,
        window: &SearchWindow,
        shutdown: &AtomicBool,
    ) -> Result<Vec<RawHeaderBlob>> {
        let mut mailbox = OpenMailbox::new(session);
        let blobs = self.collect_headers(&mut mailbox.session, window, shutdown)?;
        mailbox.release()?;
        Ok(blobs)
    }

    fn collect_headers<T: Read + Write>(
        &self,
        session: &mut Session<T>,
        window: &SearchWindow,
        shutdown: &AtomicBool,
    ) -> Result<Vec<RawHeaderBlob>> {
        session
            .examine(&self.mailbox)
            .with_context(|| format!("IMAP EXAMINE {} failed", self.mailbox))?;

        let query = format!("SINCE {}", window.imap_date());
        let mut uids: Vec<MessageUid> = session
            .uid_search(&query)
            .with_context(|| format!("IMAP UID SEARCH {query} failed"))?
            .into_iter()
            .collect();
        debug!("{query} matched {} messages", uids.len());
        if uids.is_empty() {
            return Ok(vec![]);
        }

        // newest first, so the cap drops the oldest matches
        uids.sort_unstable_by(|a, b| b.cmp(a));
        if uids.len() > self.max_messages {
            debug!(
                "capping batch at {} messages, skipping {} older ones",
                self.max_messages,
                uids.len() - self.max_messages
            );
            uids.truncate(self.max_messages);
        }

        let total = uids.len();
        let mut out = Vec::with_capacity(total);
        for (n, uid) in uids.into_iter().enumerate() {
            if shutdown.load(Ordering::SeqCst) {
                info!("shutdown requested, stopping after {n} of {total} messages");
                break;
            }
            if n > 0 && n % PROGRESS_EVERY == 0 {
                debug!("fetched {n}/{total} headers");
            }

            match session.uid_fetch(uid.to_string(), HEADER_QUERY) {
                Ok(fetches) => {
                    // unsolicited FETCH updates (flags) may arrive alongside ours
                    match fetches.iter().find(|f| f.uid == Some(uid)) {
                        Some(f) => {
                            let header = f
                                .header()
                                .or_else(|| f.body())
                                .map(|b| b.to_vec())
                                .unwrap_or_default();
                            out.push(RawHeaderBlob { uid, header });
                        }
                        None => warn!("UID {uid}: no FETCH response for it, skipping"),
                    }
                }
                Err(
                    e @ (imap::error::Error::Io(_)
                    | imap::error::Error::ConnectionLost
                    | imap::error::Error::Tls(_)),
                ) => {
                    return Err(anyhow!(e).context(format!("connection failed fetching UID {uid}")));
                }
                Err(e) => warn!("UID {uid}: header fetch failed, skipping: {e}"),
            }
        }

        out.sort_unstable_by_key(|b| b.uid);
        Ok(out)
    }
}

impl HeaderSource for ImapClient {
    fn fetch_since(&self, window: &SearchWindow, shutdown: &AtomicBool) -> Result<Vec<RawHeaderBlob>> {
        let addr = (self.server.as_str(), self.port);
        let ctx = || format!("connecting to {}:{}", self.server, self.port);

        match self.security {
            Security::Tls => {
                let tls = TlsConnector::builder().build()?;
                let client = imap::connect(addr, self.server.as_str(), &tls).with_context(ctx)?;
                self.fetch_with(self.login(client)?, window, shutdown)
            }
            Security::StartTls => {
                let tls = TlsConnector::builder().build()?;
                let client =
                    imap::connect_starttls(addr, self.server.as_str(), &tls).with_context(ctx)?;
                self.fetch_with(self.login(client)?, window, shutdown)
            }
            Security::Plain => {
                let stream = TcpStream::connect(addr).with_context(ctx)?;
                let mut client = imap::Client::new(stream);
                client.read_greeting().with_context(ctx)?;
                self.fetch_with(self.login(client)?, window, shutdown)
            }
        }
    }
}

/// A logged-in session that is logged out on drop unless it was released
/// normally first.
struct OpenMailbox<T: Read + Write> {
    session: Session<T>,
    released: bool,
}

impl<T: Read + Write> OpenMailbox<T> {
    fn new(session: Session<T>) -> Self {
        Self {
            session,
            released: false,
        }
    }

    fn release(mut self) -> Result<()> {
        self.released = true;
        let closed = self.session.close();
        let logged_out = self.session.logout();
        closed.context("IMAP CLOSE failed")?;
        logged_out.context("IMAP LOGOUT failed")?;
        Ok(())
    }
}

impl<T: Read + Write> Drop for OpenMailbox<T> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.session.logout()
        {
            debug!("logout after failed fetch: {e}");
        }
    }
}
