//! Batch configuration, loaded from RON.
//!
//! ```ron
//! (
//!     max_chunk_size: 10,
//!     endpoint: "https://graph.microsoft.com/beta/$batch",
//! )
//! ```
//!
//! Every field is optional; missing fields take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Upper bound on requests per aggregate call imposed by the endpoint.
pub const MAX_CHUNK_SIZE: usize = 20;

/// Default aggregate endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://graph.microsoft.com/v1.0/$batch";

/// Settings for a [`BatchQueue`](crate::BatchQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Requests per aggregate call.
    pub max_chunk_size: usize,
    /// Absolute URL aggregate calls are POSTed to.
    pub endpoint: String,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: MAX_CHUNK_SIZE,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }
}

impl BatchConfig {
    /// Parse and validate a RON document.
    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: BatchConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a RON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_ron(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CHUNK_SIZE).contains(&self.max_chunk_size) {
            return Err(ConfigError::Invalid(format!(
                "max_chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.max_chunk_size
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("endpoint must not be empty".into()));
        }
        Ok(())
    }

    /// Chunk size actually used for flushing: `max_chunk_size` clamped to
    /// `1..=MAX_CHUNK_SIZE`.
    pub fn chunk_size(&self) -> usize {
        self.max_chunk_size.clamp(1, MAX_CHUNK_SIZE)
    }

    pub fn with_max_chunk_size(mut self, size: usize) -> Self {
        self.max_chunk_size = size;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Error loading a [`BatchConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("invalid batch config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_chunk_size, 20);
        assert_eq!(config.endpoint, "https://graph.microsoft.com/v1.0/$batch");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_ron_fills_defaults() {
        let config = BatchConfig::from_ron("(max_chunk_size: 5)").unwrap();
        assert_eq!(config.max_chunk_size, 5);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_rejects_out_of_range_chunk_size() {
        assert!(matches!(
            BatchConfig::from_ron("(max_chunk_size: 0)"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            BatchConfig::from_ron("(max_chunk_size: 21)"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_chunk_size_clamps_to_endpoint_limit() {
        assert_eq!(BatchConfig::default().with_max_chunk_size(50).chunk_size(), MAX_CHUNK_SIZE);
        assert_eq!(BatchConfig::default().with_max_chunk_size(0).chunk_size(), 1);
        assert_eq!(BatchConfig::default().with_max_chunk_size(7).chunk_size(), 7);
    }

    #[test]
    fn test_rejects_empty_endpoint() {
        let config = BatchConfig::default().with_endpoint("  ");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_ron_is_parse_error() {
        assert!(matches!(
            BatchConfig::from_ron("(max_chunk_size: \"lots\")"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "(max_chunk_size: 3, endpoint: \"https://example.test/beta/$batch\")"
        )
        .unwrap();

        let config = BatchConfig::load(file.path()).unwrap();
        assert_eq!(config.max_chunk_size, 3);
        assert_eq!(config.endpoint, "https://example.test/beta/$batch");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            BatchConfig::load(dir.path().join("nope.ron")),
            Err(ConfigError::Io(_))
        ));
    }
}
