//! Server configuration
//!
//! Configuration is loaded from environment variables, falling back to defaults.

use std::env;

/// Main server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub host: String,
    /// Server port
    pub port: u16,

    /// Experiment configuration
    pub experiment: ExperimentConfig,

    /// Query and export configuration
    pub query: QueryConfig,

    /// Ingestion limits
    pub ingest: IngestConfig,
}

/// Experiment served by this instance
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Prefix of exported table filenames
    pub name: String,
    /// JSON plate layout registered at startup
    pub layout_file: Option<String>,
}

/// Query-related configuration
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Reference instances evaluated concurrently while streaming a table
    pub export_parallelism: usize,
}

/// Ingestion-related configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Largest raster accepted for segmentation ingestion, in pixels
    pub max_raster_pixels: usize,
    /// Largest number of rows in one value batch
    pub max_value_batch: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            experiment: ExperimentConfig::default(),
            query: QueryConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "experiment".to_string(),
            layout_file: None,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            export_parallelism: 4,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_raster_pixels: 1 << 26,
            max_value_batch: 1_000_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // Server config
        if let Ok(host) = env::var("HOST") {
            config.host = host;
        }
        if let Ok(port) = env::var("PORT")
            && let Ok(p) = port.parse()
        {
            config.port = p;
        }

        // Experiment config
        if let Ok(name) = env::var("EXPERIMENT_NAME")
            && !name.is_empty()
        {
            config.experiment.name = name;
        }
        if let Ok(path) = env::var("LAYOUT_FILE")
            && !path.is_empty()
        {
            config.experiment.layout_file = Some(path);
        }

        // Query config
        if let Ok(val) = env::var("EXPORT_PARALLELISM")
            && let Ok(n) = val.parse::<usize>()
            && n > 0
        {
            config.query.export_parallelism = n;
        }

        // Ingest config
        if let Ok(val) = env::var("MAX_RASTER_PIXELS")
            && let Ok(v) = val.parse()
        {
            config.ingest.max_raster_pixels = v;
        }
        if let Ok(val) = env::var("MAX_VALUE_BATCH")
            && let Ok(v) = val.parse()
        {
            config.ingest.max_value_batch = v;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.query.export_parallelism, 4);
        assert_eq!(config.ingest.max_raster_pixels, 67_108_864);
        assert!(config.experiment.layout_file.is_none());
    }

    #[test]
    fn test_config_from_env() {
        // This test doesn't set env vars, so it should return defaults
        let config = Config::from_env();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.ingest.max_value_batch, 1_000_000);
    }
}
