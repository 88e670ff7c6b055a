use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use dexter_reconcile::ReconcileMode;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "dex", version, about = "Double-entry ledger: import, pair and reconcile.")]
pub struct Cli {
    /// Ledger database file.
    #[arg(long, global = true, env = "DEX_DB")]
    pub db: Option<PathBuf>,

    /// Configuration file (default: $DEX_CONFIG, ./dex.toml, then the user config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log: LogLevel,

    /// Show what would change without writing anything.
    #[arg(long, global = true)]
    pub preview: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Quiet,
    Info,
    Debug,
}

impl LogLevel {
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Quiet => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load accounts from a CSV file (fullname,category,abbrev[,comment]).
    Accounts { file: PathBuf },

    /// Import bank or card CSV exports as unpaired entries.
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Target account (default: the file stem).
        #[arg(long)]
        account: Option<String>,
        /// CSV profile name from the config (default: the account's last segment).
        #[arg(long)]
        profile: Option<String>,
        #[arg(long = "start-date")]
        start_date: Option<NaiveDate>,
        #[arg(long = "end-date")]
        end_date: Option<NaiveDate>,
    },

    /// Validate a rule file (.csv or .toml) and replace the stored rules.
    Rules { file: PathBuf },

    /// Pair every unpaired entry using the stored rules.
    Pair,

    /// Match card payments against pending purchases.
    Reconcile {
        /// Only this instrument account.
        #[arg(long)]
        card: Option<String>,
        #[arg(long, default_value = "interactive")]
        mode: ReconcileMode,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_import_with_window() {
        let cli = Cli::try_parse_from([
            "dex",
            "--db",
            "ledger.db",
            "import",
            "visa.csv",
            "chase.csv",
            "--start-date",
            "2024-01-01",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("ledger.db")));
        match cli.command {
            Command::Import { files, start_date, .. } => {
                assert_eq!(files.len(), 2);
                assert_eq!(start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn reconcile_mode_and_globals() {
        let cli = Cli::try_parse_from(["dex", "reconcile", "--mode", "auto", "--preview", "--log", "debug"]).unwrap();
        assert!(cli.preview);
        assert_eq!(cli.log, LogLevel::Debug);
        assert!(matches!(
            cli.command,
            Command::Reconcile {
                mode: ReconcileMode::Auto,
                card: None
            }
        ));
    }

    #[test]
    fn import_requires_files() {
        assert!(Cli::try_parse_from(["dex", "import"]).is_err());
    }
}
