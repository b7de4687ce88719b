//! Runtime settings and logging setup.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `installments.yaml` in the working directory, if present
//! 3. the file passed to [`Settings::load`]
//! 4. `INSTALLMENTS__*` environment variables, e.g. `INSTALLMENTS__PROOF_DIR`
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_CONFIG_FILE: &str = "installments.yaml";
pub const CONFIG_ENV_PREFIX: &str = "INSTALLMENTS";
/// Overrides the configured log filter when set
pub const LOG_ENV_VAR: &str = "INSTALLMENTS_LOG";
pub const DEFAULT_UPCOMING_WINDOW_DAYS: u64 = 30;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// sled database directory
    pub database_path: PathBuf,
    /// Where uploaded payment proofs are written
    pub proof_dir: PathBuf,
    /// How far ahead "upcoming" installments reach
    pub upcoming_window_days: u64,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/installments.db"),
            proof_dir: PathBuf::from("data/proofs"),
            upcoming_window_days: DEFAULT_UPCOMING_WINDOW_DAYS,
            log_filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        use ::config::{Config, Environment, File, FileFormat};

        let mut builder = Config::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Settings rooted in a scratch directory, for tests and demos
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            database_path: dir.join("installments.db"),
            proof_dir: dir.join("proofs"),
            ..Self::default()
        }
    }
}

/// Install the global tracing subscriber. `INSTALLMENTS_LOG` wins over the
/// configured filter. Fails if a subscriber is already installed.
pub fn init_tracing(settings: &Settings) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.log_filter))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;
    Ok(())
}
