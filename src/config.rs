use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::compare::Highlight;
use crate::error::ConfigError;
use crate::generator::{MAX_MESSAGE_LEN, MessageLength};
use crate::round::RoundConfig;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub link: LinkConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub log_level: String,
    /// Directory for the file log; stdout only when unset
    pub log_dir: Option<String>,
    pub log_file: String,
    pub use_json: bool,
    /// never | hourly | daily
    pub rotation: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            log_file: "fifotest.log".to_string(),
            use_json: false,
            rotation: "never".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LinkConfig {
    /// Generator seed; 0 picks one from the clock
    pub seed: u32,
    pub max_len: u32,
    /// Every message is exactly `max_len` bytes
    pub fixed_len: bool,
    /// Rounds to run; 0 runs until failure or interrupt
    pub count: u64,
    pub start_delay_ms: u64,
    /// Baud rate applied to tty endpoints
    pub speed: Option<u32>,
    pub verbose: bool,
    /// ANSI highlighting in mismatch dumps
    pub color: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_len: 1024,
            fixed_len: false,
            count: 0,
            start_delay_ms: 100,
            speed: None,
            verbose: false,
            color: true,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_len == 0 || self.max_len as usize > MAX_MESSAGE_LEN {
            return Err(ConfigError::InvalidLength {
                got: self.max_len,
                max: MAX_MESSAGE_LEN,
            });
        }
        Ok(())
    }

    pub fn message_length(&self) -> MessageLength {
        if self.fixed_len {
            MessageLength::Fixed(self.max_len)
        } else {
            MessageLength::UpTo(self.max_len)
        }
    }

    /// Configured seed, or a clock-derived one when the seed is 0.
    pub fn effective_seed(&self) -> u32 {
        if self.seed != 0 {
            return self.seed;
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        // Fold seconds and sub-second nanos so two starts within a second differ
        let seed = (now.as_secs() as u32) ^ now.subsec_nanos().rotate_left(16);
        if seed == 0 { 1 } else { seed }
    }

    pub fn round_config(&self) -> RoundConfig {
        RoundConfig {
            length: self.message_length(),
            count: self.count,
            start_delay: Duration::from_millis(self.start_delay_ms),
            verbose: self.verbose,
            highlight: Highlight::from_color(self.color),
        }
    }
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.link.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.link.seed, 42);
        assert_eq!(config.link.max_len, 1024);
        assert_eq!(config.link.start_delay_ms, 100);
        assert!(config.link.color);
        assert_eq!(config.log.log_level, "info");
        assert!(config.log.log_dir.is_none());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
link:
  seed: 7
  max_len: 16
  fixed_len: true
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.link.seed, 7);
        assert_eq!(config.link.message_length(), MessageLength::Fixed(16));
        // Unspecified fields keep their defaults
        assert_eq!(config.link.start_delay_ms, 100);
        assert_eq!(config.log.rotation, "never");
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
log:
  log_level: debug
  log_dir: ./logs
  log_file: link.log
  use_json: true
  rotation: daily
link:
  seed: 1
  max_len: 4096
  count: 10
  start_delay_ms: 0
  speed: 115200
  verbose: true
  color: false
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.log.log_dir.as_deref(), Some("./logs"));
        assert!(config.log.use_json);
        assert_eq!(config.link.speed, Some(115200));

        let round = config.link.round_config();
        assert_eq!(round.count, 10);
        assert!(round.start_delay.is_zero());
        assert_eq!(round.highlight, Highlight::Plain);
        assert_eq!(round.length, MessageLength::UpTo(4096));
    }

    #[test]
    fn test_length_bounds() {
        for bad in ["link: { max_len: 0 }", "link: { max_len: 4097 }"] {
            let err = AppConfig::from_yaml_str(bad).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidLength { .. }));
        }
    }

    #[test]
    fn test_malformed_yaml() {
        let err = AppConfig::from_yaml_str("link: [1, 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("/nonexistent/fifotest.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_effective_seed() {
        let mut link = LinkConfig::default();
        assert_eq!(link.effective_seed(), 42);
        link.seed = 0;
        assert_ne!(link.effective_seed(), 0);
    }
}
