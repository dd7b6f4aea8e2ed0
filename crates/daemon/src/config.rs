//! File-backed daemon configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// TCP port of the HTTP/WebSocket server
    pub port: u16,
    /// Ring-buffer size requested from the board when a stream starts
    pub stream_buffer_size: usize,
    /// Pause between acquisition cycles, in milliseconds
    pub cycle_interval_ms: u64,
    /// File name under the system temp dir for experiment-file handoffs
    pub experiment_file: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            stream_buffer_size: 45_000,
            cycle_interval_ms: 1_000,
            experiment_file: "experiment_data.csv".to_string(),
        }
    }
}

impl DaemonConfig {
    pub fn cycle_interval(&self) -> Duration {
        Duration::from_millis(self.cycle_interval_ms)
    }
}

/// Load configuration from `path`, falling back to defaults (written out for
/// future runs) when the file is missing or unparseable.
pub fn load_config(path: &Path) -> DaemonConfig {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(config) => {
                info!("loaded configuration from {}", path.display());
                config
            }
            Err(e) => {
                warn!("could not parse {}: {e}; using defaults", path.display());
                write_defaults(path)
            }
        },
        Err(_) => {
            info!("no configuration at {}; using defaults", path.display());
            write_defaults(path)
        }
    }
}

fn write_defaults(path: &Path) -> DaemonConfig {
    let config = DaemonConfig::default();
    match serde_json::to_string_pretty(&config) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, json) {
                warn!("could not write default configuration to {}: {e}", path.display());
            }
        }
        Err(e) => warn!("could not serialize default configuration: {e}"),
    }
    config
}
