use anyhow::Context as _;
use attenuator::{
    BladeDescriptor, CalculationInputs, DeviceDescriptor, DeviceFamily, FilterDescriptor,
    MotionDriverConfig,
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to read configuration file: {source}")]
    ReadError { source: std::io::Error },

    #[error("Failed to parse configuration: {source}")]
    ParseError { source: toml::de::Error },

    #[error("Failed to serialize configuration: {source}")]
    SerializeError { source: toml::ser::Error },

    #[error("Failed to write configuration file: {source}")]
    WriteError { source: std::io::Error },

    #[error("Configuration validation failed: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
    /// Daily rolling log files go here when set.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsorptionDataConfig {
    /// Holds one `<material>.toml` per material.
    pub directory: PathBuf,
}

impl Default for AbsorptionDataConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data/absorption"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    pub queue_capacity: usize,
    /// Simulated time for a blade to change position.
    pub travel_time_ms: u64,
    pub poll_interval_ms: u64,
    pub driver: MotionDriverConfig,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 16,
            travel_time_ms: 1500,
            poll_interval_ms: 100,
            driver: MotionDriverConfig::default(),
        }
    }
}

impl MotionConfig {
    pub fn travel_time(&self) -> Duration {
        Duration::from_millis(self.travel_time_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SattConfig {
    pub logging: LoggingConfig,
    pub absorption_data: AbsorptionDataConfig,
    pub inputs: CalculationInputs,
    pub motion: MotionConfig,
    pub device: DeviceDescriptor,
}

impl Default for SattConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            absorption_data: AbsorptionDataConfig::default(),
            inputs: CalculationInputs::default(),
            motion: MotionConfig::default(),
            device: default_device(),
        }
    }
}

/// Four-blade ladder: carbon and silicon on the first blade, carbon on the
/// others.
fn default_device() -> DeviceDescriptor {
    let blade = |filters: &[(&str, f64)]| BladeDescriptor {
        filters: filters
            .iter()
            .map(|(material, um)| FilterDescriptor::new(*material, *um))
            .collect(),
    };

    DeviceDescriptor {
        name: "AT1K4".to_string(),
        family: DeviceFamily::Ladder,
        blades: vec![
            blade(&[
                ("C", 25.0),
                ("C", 50.0),
                ("C", 100.0),
                ("Si", 320.0),
                ("Si", 160.0),
                ("Si", 80.0),
                ("Si", 40.0),
                ("Si", 20.0),
            ]),
            blade(&[("C", 50.0), ("C", 25.0), ("C", 12.0), ("C", 10.0)]),
            blade(&[("C", 25.0), ("C", 12.0), ("C", 6.0)]),
            blade(&[("C", 12.0), ("C", 6.0), ("C", 3.0), ("C", 3.0)]),
        ],
    }
}

impl SattConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::ValidationError { message };

        self.device
            .validate()
            .map_err(|e| invalid(e.to_string()))?;
        self.inputs.validate().map_err(|e| invalid(e.to_string()))?;

        if self.motion.queue_capacity == 0 {
            return Err(invalid("motion.queue_capacity must be at least 1".to_string()));
        }
        if self.motion.poll_interval_ms == 0 {
            return Err(invalid("motion.poll_interval_ms must be at least 1".to_string()));
        }
        if self.motion.driver.step_timeout.is_zero() {
            return Err(invalid("motion.driver.step_timeout must be positive".to_string()));
        }
        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid(format!("unknown log level '{}'", self.logging.level)));
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct ConfigOptions {
    pub config_path: PathBuf,
    pub create_if_missing: bool,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            create_if_missing: true,
        }
    }
}

impl ConfigOptions {
    pub fn default_config_path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("default_config.toml"))
    }
}

#[derive(Debug)]
pub struct ConfigManager {
    options: ConfigOptions,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            options: ConfigOptions::default(),
        }
    }

    pub fn with_options(options: ConfigOptions) -> Self {
        Self { options }
    }

    pub fn load(&self) -> anyhow::Result<SattConfig> {
        let config_path = &self.options.config_path;

        if !config_path.exists() {
            if self.options.create_if_missing {
                let default_config = SattConfig::default();
                self.save(&default_config)
                    .context("Failed to save default config")?;
                return Ok(default_config);
            }
            return Err(ConfigError::FileNotFound {
                path: config_path.clone(),
            }
            .into());
        }

        let content =
            fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError { source: e })?;

        let config: SattConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError { source: e })?;
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self, config: &SattConfig) -> anyhow::Result<()> {
        let config_path = &self.options.config_path;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError { source: e })?;
        }

        let content = toml::to_string_pretty(config)
            .map_err(|e| ConfigError::SerializeError { source: e })?;

        fs::write(config_path, content).map_err(|e| ConfigError::WriteError { source: e })?;

        Ok(())
    }
}

pub fn init_config() -> anyhow::Result<(ConfigManager, SattConfig)> {
    let manager = ConfigManager::new();
    let config = manager.load()?;
    Ok((manager, config))
}

pub fn create_default_config<P: AsRef<Path>>(path: Option<P>) -> anyhow::Result<()> {
    let config_path = path
        .map(|p| p.as_ref().to_path_buf())
        .unwrap_or_else(ConfigOptions::default_config_path);

    let manager = ConfigManager::with_options(ConfigOptions {
        config_path,
        create_if_missing: true,
    });
    manager.save(&SattConfig::default())?;

    Ok(())
}
