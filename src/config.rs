//! Runtime configuration
//!
//! A JSON file selects the effect and its parameters, plus the clock used by
//! the offline and live runners. Every field has a default, so `{}` is a
//! valid config:
//!
//! ```json
//! {
//!   "effect": { "type": "repeater", "pulse": "1/16", "duration_percent": 50 },
//!   "transport": { "bpm": 120.0, "block_beats": 0.125, "block_ms": 5 }
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::fx::echo::{EchoSettings, RandomEchoSettings};
use crate::fx::repeater::RepeaterSettings;

/// Which effect runs, with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EffectConfig {
    Repeater(RepeaterSettings),
    Echo(EchoSettings),
    RandomEcho(RandomEchoSettings),
    Monophony,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self::Repeater(RepeaterSettings::default())
    }
}

impl EffectConfig {
    /// Same config with every parameter clamped into range
    pub fn sanitized(self) -> Self {
        match self {
            Self::Repeater(settings) => Self::Repeater(settings.sanitized()),
            Self::Echo(settings) => Self::Echo(settings.sanitized()),
            Self::RandomEcho(settings) => Self::RandomEcho(settings.sanitized()),
            Self::Monophony => Self::Monophony,
        }
    }
}

/// Clock settings for the runners
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Tempo for live mode; replay uses the file's own tempo
    pub bpm: f64,
    /// Block size for offline replay, in beats
    pub block_beats: f64,
    /// Block period for live mode, in milliseconds
    pub block_ms: u64,
    /// Capacity of the live input queue
    pub queue_capacity: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            block_beats: 0.125,
            block_ms: 5,
            queue_capacity: 1024,
        }
    }
}

impl TransportSettings {
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        Self {
            bpm: if self.bpm.is_finite() {
                self.bpm.clamp(20.0, 400.0)
            } else {
                defaults.bpm
            },
            block_beats: if self.block_beats.is_finite() && self.block_beats > 0.0 {
                self.block_beats.min(4.0)
            } else {
                defaults.block_beats
            },
            block_ms: self.block_ms.clamp(1, 100),
            queue_capacity: self.queue_capacity.max(16),
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub effect: EffectConfig,
    pub transport: TransportSettings,
}

impl Config {
    /// Parse a config from JSON text
    pub fn from_json(text: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| format!("Failed to parse config: {}", e))?;
        Ok(config.sanitized())
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config {}: {}", path.display(), e))?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn sanitized(self) -> Self {
        Self {
            effect: self.effect.sanitized(),
            transport: self.transport.sanitized(),
        }
    }
}
