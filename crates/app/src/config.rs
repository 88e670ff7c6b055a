use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use dexter_import::CsvImportProfile;
use dexter_reconcile::DEFAULT_BUDGET_FACTOR;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "dex.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Rows dated earlier are skipped on import.
    pub start_date: Option<NaiveDate>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("dexter.db"),
            start_date: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Search expansions allowed per pending item.
    pub expansion_factor: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            expansion_factor: DEFAULT_BUDGET_FACTOR,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub reconcile: ReconcileConfig,
    /// CSV profiles keyed by parser name.
    pub csv: BTreeMap<String, CsvImportProfile>,
}

impl Config {
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)?;
        for (name, profile) in config.csv.iter_mut() {
            profile.name = name.clone();
        }
        Ok(config)
    }

    /// Loads the first config file found, or the defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let env = std::env::var_os("DEX_CONFIG").map(PathBuf::from);
        let platform = directories::ProjectDirs::from("org", "dexter", "dex")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE));
        let Some(path) = locate(explicit, env.as_deref(), Path::new(CONFIG_FILE), platform.as_deref())? else {
            tracing::debug!("no config file; using defaults");
            return Ok((Config::default(), None));
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Config::parse(&content).with_context(|| format!("parsing config {}", path.display()))?;
        tracing::debug!(path = %path.display(), profiles = config.csv.len(), "loaded config");
        Ok((config, Some(path)))
    }

    pub fn profile(&self, name: &str) -> Option<&CsvImportProfile> {
        self.csv.get(name)
    }
}

/// Search order: explicit path, `$DEX_CONFIG`, the working directory, the
/// platform config dir. A named file that is missing is an error; the
/// implicit locations are skipped when absent.
fn locate(
    explicit: Option<&Path>,
    env: Option<&Path>,
    local: &Path,
    platform: Option<&Path>,
) -> Result<Option<PathBuf>> {
    if let Some(named) = explicit.or(env) {
        if !named.is_file() {
            bail!("config file {} does not exist", named.display());
        }
        return Ok(Some(named.to_path_buf()));
    }
    Ok([Some(local), platform]
        .into_iter()
        .flatten()
        .find(|p| p.is_file())
        .map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [database]
        path = "books.db"
        start_date = "2024-01-01"

        [reconcile]
        expansion_factor = 250

        [csv.visa]
        date = 0
        description = 2
        amount = 5
        date_format = "%m/%d/%Y"
        pending = true
        settlement = "^payment"
    "#;

    #[test]
    fn parses_sections_and_profiles() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.database.path, PathBuf::from("books.db"));
        assert_eq!(config.database.start_date, NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(config.reconcile.expansion_factor, 250);
        let visa = config.profile("visa").unwrap();
        assert_eq!(visa.name, "visa");
        assert_eq!(visa.mapping.amount, Some(5));
        assert!(visa.pending);
        assert_eq!(visa.settlement.as_deref(), Some("^payment"));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.reconcile.expansion_factor, DEFAULT_BUDGET_FACTOR);
    }

    #[test]
    fn explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("a.toml");
        let local = dir.path().join(CONFIG_FILE);
        std::fs::write(&explicit, "").unwrap();
        std::fs::write(&local, "").unwrap();
        let found = locate(Some(&explicit), None, &local, None).unwrap();
        assert_eq!(found, Some(explicit));
    }

    #[test]
    fn missing_named_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(locate(None, Some(&missing), &dir.path().join(CONFIG_FILE), None).is_err());
    }

    #[test]
    fn falls_back_to_platform_then_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join(CONFIG_FILE);
        let platform = dir.path().join("platform.toml");
        assert_eq!(locate(None, None, &local, Some(&platform)).unwrap(), None);
        std::fs::write(&platform, "").unwrap();
        assert_eq!(locate(None, None, &local, Some(&platform)).unwrap(), Some(platform));
    }
}
