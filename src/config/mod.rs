use crate::models::AppConfig;
use anyhow::{Context, Result, ensure};
use camino::{Utf8Path, Utf8PathBuf};
use ::config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::fs;

/// File name looked up inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "syncdeck.yaml";

/// Prefix for environment overrides, e.g. `SYNCDECK__SYNC__DEBOUNCE_MS=250`.
pub const ENV_PREFIX: &str = "SYNCDECK";

/// Configuration manager for loading and saving the YAML configuration file.
///
/// [`load`](Self::load) layers three sources, later ones winning:
/// 1. Built-in defaults ([`AppConfig::default`])
/// 2. `syncdeck.yaml` in the configuration directory, if present
/// 3. Environment variables prefixed `SYNCDECK__`, with `__` between
///    section and key
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE_NAME),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Load configuration from defaults, file and process environment.
    pub fn load(&self) -> Result<AppConfig> {
        self.load_layers(None)
    }

    /// Load configuration with `vars` standing in for the process
    /// environment. Keys use the same `SYNCDECK__SECTION__KEY` form.
    pub fn load_with_env(&self, vars: HashMap<String, String>) -> Result<AppConfig> {
        self.load_layers(Some(vars))
    }

    fn load_layers(&self, vars: Option<HashMap<String, String>>) -> Result<AppConfig> {
        let defaults =
            Config::try_from(&AppConfig::default()).context("Failed to build default configuration")?;

        if self.config_path.exists() {
            tracing::info!("Loading config from {}", self.config_path);
        } else {
            tracing::debug!("No config file at {}, using defaults", self.config_path);
        }

        let layered = Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(self.config_path.as_std_path())
                    .format(FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars.map(|v| v.into_iter().collect())),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", self.config_path))?;

        let config: AppConfig = layered
            .try_deserialize()
            .with_context(|| format!("Failed to parse configuration: {}", self.config_path))?;

        validate(&config)?;
        Ok(config)
    }

    /// Save the configuration file.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }

    /// Write the default configuration if no file exists yet.
    ///
    /// Returns true if a file was written.
    pub fn write_default_if_missing(&self) -> Result<bool> {
        if self.config_path.exists() {
            return Ok(false);
        }
        self.save(&AppConfig::default())?;
        Ok(true)
    }
}

/// Reject values that would stall timers or make every quota check fail.
pub fn validate(config: &AppConfig) -> Result<()> {
    ensure!(config.sync.debounce_ms > 0, "sync.debounce_ms must be greater than zero");
    ensure!(
        config.scheduler.tick_interval_ms > 0,
        "scheduler.tick_interval_ms must be greater than zero"
    );
    ensure!(
        config.scheduler.default_frequency_seconds > 0,
        "scheduler.default_frequency_seconds must be greater than zero"
    );
    ensure!(
        config.scheduler.history_limit > 0,
        "scheduler.history_limit must be greater than zero"
    );
    ensure!(
        config.store.ready_timeout_ms > 0,
        "store.ready_timeout_ms must be greater than zero"
    );
    ensure!(
        config.quota.plans.contains_key(&config.quota.default_plan),
        "quota.default_plan '{}' is not one of the configured plans",
        config.quota.default_plan
    );
    Ok(())
}
