//! Engine configuration
//!
//! Loaded in layers: built-in defaults, then an optional file, then
//! `FLOWSIM__*` environment variables (double underscore separates nested
//! keys, e.g. `FLOWSIM__LOGGING__LEVEL=debug`).

use serde::{Deserialize, Serialize};

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base seed for the per-entity variate streams
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Stop with an error after this many events
    #[serde(default)]
    pub max_events: Option<u64>,

    /// Two simple-merge passes closer than this count as the same instant
    #[serde(default)]
    pub instant_tolerance: f64,

    /// Keep an in-memory event log
    #[serde(default = "default_true")]
    pub record_events: bool,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            max_events: None,
            instant_tolerance: 0.0,
            record_events: true,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    0x5EED
}

fn default_log_level() -> String {
    "info".to_string()
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FLOWSIM")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_max_events(mut self, max_events: u64) -> Self {
        self.max_events = Some(max_events);
        self
    }

    pub fn with_instant_tolerance(mut self, tolerance: f64) -> Self {
        self.instant_tolerance = tolerance;
        self
    }
}
