// Exporter settings
// Loaded from fsexport.toml (see `Settings::load` for the lookup order)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fuelsale_pipeline::PipelineConfig;

pub const CONFIG_ENV: &str = "FSEXPORT_CONFIG";
pub const LOCAL_CONFIG_FILE: &str = "fsexport.toml";

/// Deployment stage. Selects the default database locations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    #[default]
    Dev,
    Stage,
    Test,
    #[serde(alias = "production")]
    Prod,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Stage => "stage",
            Stage::Test => "test",
            Stage::Prod => "prod",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Stage::Dev),
            "stage" => Ok(Stage::Stage),
            "test" => Ok(Stage::Test),
            "prod" | "production" => Ok(Stage::Prod),
            other => Err(format!("unknown stage '{other}' (expected dev, stage, test or prod)")),
        }
    }
}

/// Database locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSettings {
    /// Raw sales, reference data and staging. Default: `<data dir>/fsexport/<stage>/sales.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sales_db: Option<PathBuf>,

    /// Export tables and import log. Default: `<data dir>/fsexport/<stage>/export.db`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_db: Option<PathBuf>,

    /// How long a statement waits on a locked database
    pub timeout_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sales_db: None,
            export_db: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub stage: Stage,
    pub store: StoreSettings,
    pub pipeline: PipelineConfig,
}

#[derive(Debug)]
pub enum ConfigError {
    /// Named config file missing or unreadable.
    Read { path: PathBuf, message: String },
    /// TOML syntax or shape error.
    Parse { path: PathBuf, message: String },
    /// Environment override with a bad value.
    Override { var: &'static str, value: String, message: String },
    /// Parsed but semantically invalid.
    Invalid(String),
    /// Effective settings could not be rendered back to TOML.
    Render(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, message } => {
                write!(f, "cannot read config {}: {message}", path.display())
            }
            ConfigError::Parse { path, message } => {
                write!(f, "invalid config {}: {message}", path.display())
            }
            ConfigError::Override { var, value, message } => {
                write!(f, "invalid {var}='{value}': {message}")
            }
            ConfigError::Invalid(message) => write!(f, "invalid config: {message}"),
            ConfigError::Render(message) => write!(f, "cannot render settings: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Settings {
    /// Per-user settings file path
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("fsexport").join("config.toml"))
    }

    /// Load settings from the process environment.
    ///
    /// Lookup order: `explicit`, `$FSEXPORT_CONFIG`, `./fsexport.toml`, the
    /// per-user file, then built-in defaults. Environment overrides are
    /// applied on top and the result is validated. Returns the file used.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        Self::load_with(explicit, |var| std::env::var(var).ok())
    }

    pub fn load_with(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let source = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match env(CONFIG_ENV) {
                Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
                _ => [Some(PathBuf::from(LOCAL_CONFIG_FILE)), Self::user_config_path()]
                    .into_iter()
                    .flatten()
                    .find(|p| p.is_file()),
            },
        };

        let mut settings = match &source {
            Some(path) => {
                log::debug!("loading settings from {}", path.display());
                Self::from_file(path)?
            }
            None => {
                log::debug!("no settings file found, using defaults");
                Self::default()
            }
        };
        settings.apply_overrides(env)?;
        settings.validate()?;
        Ok((settings, source))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply `FSEXPORT_*` environment overrides
    pub fn apply_overrides(
        &mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = env("FSEXPORT_STAGE") {
            self.stage = value.parse().map_err(|message| ConfigError::Override {
                var: "FSEXPORT_STAGE",
                value: value.clone(),
                message,
            })?;
        }
        if let Some(value) = env("FSEXPORT_SALES_DB") {
            self.store.sales_db = Some(PathBuf::from(value));
        }
        if let Some(value) = env("FSEXPORT_EXPORT_DB") {
            self.store.export_db = Some(PathBuf::from(value));
        }
        if let Some(value) = env("FSEXPORT_STORE_TIMEOUT_SECS") {
            self.store.timeout_secs = parse_number("FSEXPORT_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = env("FSEXPORT_WORKERS") {
            self.pipeline.consolidation_workers = parse_number("FSEXPORT_WORKERS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.timeout_secs == 0 {
            return Err(ConfigError::Invalid("store.timeout_secs must be at least 1".into()));
        }
        self.pipeline
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn sales_db_path(&self) -> PathBuf {
        self.store
            .sales_db
            .clone()
            .unwrap_or_else(|| self.stage_dir().join("sales.db"))
    }

    pub fn export_db_path(&self) -> PathBuf {
        self.store
            .export_db
            .clone()
            .unwrap_or_else(|| self.stage_dir().join("export.db"))
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store.timeout_secs)
    }

    /// Effective settings as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))
    }

    fn stage_dir(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fsexport")
            .join(self.stage.as_str())
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Override {
        var,
        value: value.to_string(),
        message: e.to_string(),
    })
}
