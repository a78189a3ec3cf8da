use anyhow::{Context, Result, anyhow};
use keyring::{Entry, Error as KeyringError};
use log::debug;
use std::io::{BufRead, IsTerminal, Write};

const SERVICE: &str = "rs_mail_sync";

fn entry(username: &str) -> Result<Entry> {
    Entry::new(SERVICE, username).with_context(|| format!("keyring entry for {username}"))
}

/// Store the IMAP password in the OS keyring.
pub fn save_password(username: &str, password: &str) -> Result<()> {
    entry(username)?
        .set_password(password)
        .with_context(|| format!("saving password for {username}"))
}

/// Stored IMAP password, `None` when the keyring has none for this user.
pub fn load_password(username: &str) -> Result<Option<String>> {
    match entry(username)?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e).context(format!("reading password for {username}"))),
    }
}

/// Password from the config file, else the keyring, else asked for.
pub fn resolve_password(username: &str, configured: Option<&str>) -> Result<String> {
    if let Some(p) = configured {
        return Ok(p.to_string());
    }
    match load_password(username) {
        Ok(Some(p)) => return Ok(p),
        Ok(None) => {}
        Err(e) => debug!("keyring unavailable: {e:#}"),
    }
    ask_password(username)
}

/// Prompt without echo on a terminal; read one line when stdin is piped.
pub fn ask_password(username: &str) -> Result<String> {
    let prompt = format!("IMAP password for {username}: ");
    if std::io::stdin().is_terminal() {
        return rpassword::prompt_password(prompt).context("reading password");
    }
    read_password_line(&prompt, &mut std::io::stdin().lock(), &mut std::io::stderr())
}

pub fn read_password_line(
    prompt: &str,
    input: &mut impl BufRead,
    out: &mut impl Write,
) -> Result<String> {
    write!(out, "{prompt}")?;
    out.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(anyhow!("no password given"));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_password_wins() {
        assert_eq!(resolve_password("someone", Some("hunter2")).unwrap(), "hunter2");
    }

    #[test]
    fn missing_or_unreachable_keyring_entry_names_the_user() {
        let user = "rs-mail-sync-test-nobody";
        match load_password(user) {
            Ok(stored) => assert!(stored.is_none()),
            Err(e) => assert!(format!("{e:#}").contains(user)),
        }
    }

    #[test]
    fn prompt_reads_one_line() {
        let mut input = std::io::Cursor::new(b"s3cret pass\r\nignored\n".to_vec());
        let mut shown = Vec::new();
        let p = read_password_line("pw: ", &mut input, &mut shown).unwrap();
        assert_eq!(p, "s3cret pass");
        assert_eq!(shown, b"pw: ");
    }

    #[test]
    fn prompt_fails_on_eof() {
        let mut input = std::io::Cursor::new(Vec::new());
        assert!(read_password_line("pw: ", &mut input, &mut Vec::new()).is_err());
    }
}
