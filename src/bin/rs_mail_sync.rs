use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rs_mail_sync::auth::credentials;
use rs_mail_sync::config::{Config, load_config};
use rs_mail_sync::daemon::window::parse_span;
use rs_mail_sync::daemon::{DaemonConfig, install_shutdown_handler, run_daemon};
use rs_mail_sync::mail::imap_client::ImapClient;
use rs_mail_sync::store::repo::{ListQuery, MessageStore};
use rs_mail_sync::store::sqlite::SqliteStore;

#[derive(Parser)]
#[command(name = "rs_mail_sync")]
#[command(about = "Sync IMAP message metadata into a local database", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/rs_mail_sync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch and store headers now, then again every interval
    Daemon {
        /// How far back to search, e.g. "2 days" or "1 week"
        #[arg(long)]
        since: Option<String>,

        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Print stored messages
    List {
        #[arg(long, default_value_t = 0)]
        offset: usize,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Only subjects containing this text (repeatable)
        #[arg(long)]
        keyword: Vec<String>,

        /// Newest first
        #[arg(long)]
        sorted: bool,
    },

    /// Store the IMAP password in the keyring
    SetPassword,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref()).map_err(|e| anyhow!("Configuration error: {e:#}"))?;

    match cli.cmd {
        Command::SetPassword => {
            let password = credentials::ask_password(&cfg.imap.username)?;
            credentials::save_password(&cfg.imap.username, &password)?;
            println!("Saved password for {}", cfg.imap.username);
            Ok(())
        }

        Command::List {
            offset,
            limit,
            keyword,
            sorted,
        } => {
            let store = SqliteStore::open_configured(&cfg.store)?;
            let rows = store.list(&ListQuery {
                keywords: keyword,
                newest_first: sorted,
                offset,
                limit,
            })?;
            println!("{} messages stored", store.count()?);
            for r in rows {
                println!("{}\t{}\t{}", r.date_epoch, r.sender, r.subject);
            }
            Ok(())
        }

        Command::Daemon { since, once } => run(&cfg, since, once),
    }
}

fn run(cfg: &Config, since: Option<String>, once: bool) -> Result<()> {
    let interval = parse_span(&cfg.imap.interval)
        .and_then(|d| d.to_std().ok())
        .unwrap_or_else(|| {
            log::warn!(
                "cannot read interval {:?}, using 5 minutes",
                cfg.imap.interval
            );
            std::time::Duration::from_secs(300)
        });

    let password =
        credentials::resolve_password(&cfg.imap.username, cfg.imap.password.as_deref())?;
    let imap = ImapClient::new(&cfg.imap, password);
    let shutdown = install_shutdown_handler()?;

    log::info!(
        "syncing {}@{}:{} every {}s",
        cfg.imap.username,
        cfg.imap.host,
        cfg.imap.port,
        interval.as_secs()
    );

    run_daemon(
        &imap,
        &cfg.store,
        &DaemonConfig {
            since: since.unwrap_or_else(|| cfg.sync.since.clone()),
            interval,
            timezone: cfg.sync.tz()?,
            max_cycles: once.then_some(1),
        },
        &shutdown,
    )
}
