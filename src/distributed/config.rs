use std::{error::Error, fmt, fs, io, ops::Range, path::Path, time::Duration};

use serde::Deserialize;

const DEFAULT_MASTER_ADDR: &str = "127.0.0.1";
const DEFAULT_RENDEZVOUS_TIMEOUT_SECS: u64 = 300;

/// Immutable settings for a launcher instance.
///
/// Every field has a default, so an empty JSON object is a valid config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LauncherConfig {
    /// Rendezvous host used when neither `MASTER_ADDR` nor SLURM provide one.
    pub master_addr: String,
    /// Ports drawn from when `MASTER_PORT` is not set.
    pub master_port_range: Range<u16>,
    /// Upper bound for the whole rendezvous exchange.
    pub rendezvous_timeout_secs: u64,
    /// Expose exactly one device per worker through `CUDA_VISIBLE_DEVICES`.
    pub pin_visible_devices: bool,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            master_addr: DEFAULT_MASTER_ADDR.to_string(),
            master_port_range: 50_000..60_000,
            rendezvous_timeout_secs: DEFAULT_RENDEZVOUS_TIMEOUT_SECS,
            pin_visible_devices: false,
        }
    }
}

impl LauncherConfig {
    /// Loads a launcher configuration from a JSON file.
    ///
    /// # Args
    /// * `path` - The path of the JSON file.
    ///
    /// # Returns
    /// The validated configuration or a `ConfigErr`.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigErr> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigErr::Io {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json_str(&content)
    }

    /// Parses and validates a launcher configuration from a JSON string.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigErr> {
        let config: Self = serde_json::from_str(content).map_err(ConfigErr::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the rendezvous timeout as a `Duration`.
    pub fn rendezvous_timeout(&self) -> Duration {
        Duration::from_secs(self.rendezvous_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigErr> {
        if self.master_port_range.is_empty() {
            return Err(ConfigErr::Invalid(format!(
                "master_port_range {:?} is empty",
                self.master_port_range
            )));
        }
        if self.master_addr.is_empty() {
            return Err(ConfigErr::Invalid("master_addr must not be empty".into()));
        }
        if self.rendezvous_timeout_secs == 0 {
            return Err(ConfigErr::Invalid(
                "rendezvous_timeout_secs must be positive".into(),
            ));
        }

        Ok(())
    }
}

/// Launcher configuration loading failures.
#[derive(Debug)]
pub enum ConfigErr {
    Io { path: String, source: io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl fmt::Display for ConfigErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigErr::Io { path, source } => write!(f, "cannot read '{path}': {source}"),
            ConfigErr::Parse(e) => write!(f, "invalid JSON: {e}"),
            ConfigErr::Invalid(msg) => write!(f, "invalid launcher config: {msg}"),
        }
    }
}

impl Error for ConfigErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigErr::Io { source, .. } => Some(source),
            ConfigErr::Parse(e) => Some(e),
            ConfigErr::Invalid(_) => None,
        }
    }
}
