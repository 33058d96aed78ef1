//! Configuration options for the fleetd host binary and services.
//!
//! Loaded from a TOML file; every option has a default so an empty file is
//! a valid configuration.

use fleetd_error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Options of the inspection engine and its worker thread.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InspectionConfig {
    /// Upper bound on how long the worker parks when idle.
    pub idle_time_ms: u64,
    /// Cadence of condition evaluation, in input time and wall-clock time.
    pub evaluate_interval_ms: u64,
    /// Number of consumed inputs that forces an evaluation regardless of
    /// elapsed input time.
    pub input_batch_trigger_count: u32,
    /// When true, the probability-to-send draw is skipped and every trigger
    /// emits.
    pub data_reduction_probability_disabled: bool,
    /// Hard cap on any single signal history ring buffer.
    pub ring_buffer_ceiling_samples: usize,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        InspectionConfig {
            idle_time_ms: 1_000,
            evaluate_interval_ms: 50,
            input_batch_trigger_count: 256,
            data_reduction_probability_disabled: false,
            ring_buffer_ceiling_samples: 10_240,
        }
    }
}

/// Options of the scheme manager.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchemeManagerConfig {
    /// Cadence of the checkin summary sent upstream.
    pub checkin_interval_ms: u64,
    /// Expression trees deeper than this are rejected at compile time.
    pub max_expression_depth: u32,
}

impl Default for SchemeManagerConfig {
    fn default() -> Self {
        SchemeManagerConfig {
            checkin_interval_ms: 120_000,
            max_expression_depth: 10,
        }
    }
}

/// Capacities of the bounded queues between the bus decoders, the
/// inspection worker, and the transport sender.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    pub signal_capacity: usize,
    pub can_capacity: usize,
    pub dtc_capacity: usize,
    pub output_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            signal_capacity: 4_096,
            can_capacity: 1_024,
            dtc_capacity: 16,
            output_capacity: 256,
        }
    }
}

/// Where accepted scheme lists and manifests are cached across restarts.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Directory for the blob store; an in-memory store is used when unset.
    pub path: Option<PathBuf>,
}

/// Root configuration of the host binary.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub inspection: InspectionConfig,
    pub scheme_manager: SchemeManagerConfig,
    pub queues: QueueConfig,
    pub persistence: PersistenceConfig,
}

impl AppConfig {
    /// Parses a configuration from TOML bytes.
    pub fn load_from_slice(slice: &[u8]) -> Result<Self> {
        let content = std::str::from_utf8(slice).map_err(Error::invalid_schema)?;
        toml::from_str(content).map_err(Error::invalid_schema)
    }

    /// Reads and parses the configuration file at `path`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::load_from_slice(&bytes)
    }
}
