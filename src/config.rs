//! Substrate configuration.
//!
//! Sizes for prefetch buffers and queue segments. Values can be set with the
//! builder methods or read once from the environment.

use std::sync::OnceLock;

use tracing::warn;

/// Smallest accepted prefetch buffer size.
pub const MIN_BUFFER_SIZE: usize = 16;

const BUFFER_SIZE_VAR: &str = "FLUXWELD_BUFFER_SIZE";
const ISLAND_SIZE_VAR: &str = "FLUXWELD_ISLAND_SIZE";
const MAX_SPIN_VAR: &str = "FLUXWELD_MAX_SPIN";

static GLOBAL: OnceLock<Config> = OnceLock::new();

/// Configuration for buffering stages and queues
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    /// Number of items a buffering stage prefetches from upstream
    pub buffer_size: usize,
    /// Slot count of each segment in an island queue
    pub island_size: usize,
    /// First segment capacity of a growable queue
    pub queue_initial_capacity: usize,
    /// Spin iterations an MPSC consumer spends on an unlinked node before it
    /// starts yielding its thread
    pub max_spin: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: 128,
            island_size: 128,
            queue_initial_capacity: 16,
            max_spin: 1 << 16,
        }
    }
}

impl Config {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the prefetch buffer size (clamped to [`MIN_BUFFER_SIZE`])
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(MIN_BUFFER_SIZE);
        self
    }

    /// Set the island segment size
    pub fn island_size(mut self, size: usize) -> Self {
        self.island_size = size.max(2);
        self
    }

    /// Set the first segment capacity of growable queues
    pub fn queue_initial_capacity(mut self, capacity: usize) -> Self {
        self.queue_initial_capacity = capacity.max(2);
        self
    }

    /// Set the MPSC consumer spin budget (at least one)
    pub fn max_spin(mut self, spins: u32) -> Self {
        self.max_spin = spins.max(1);
        self
    }

    /// Demand replenishment threshold for a given prefetch: three quarters of it.
    pub fn replenish_limit(&self) -> usize {
        limit_for(self.buffer_size)
    }

    /// Read overrides from `FLUXWELD_BUFFER_SIZE`, `FLUXWELD_ISLAND_SIZE` and
    /// `FLUXWELD_MAX_SPIN`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(size) = parse_var(&lookup, BUFFER_SIZE_VAR) {
            config = config.buffer_size(size);
        }
        if let Some(size) = parse_var(&lookup, ISLAND_SIZE_VAR) {
            config = config.island_size(size);
        }
        if let Some(spins) = parse_var(&lookup, MAX_SPIN_VAR) {
            config = config.max_spin(u32::try_from(spins).unwrap_or(u32::MAX));
        }

        config
    }

    /// The process-wide configuration, read from the environment on first use.
    pub fn global() -> &'static Config {
        GLOBAL.get_or_init(Config::from_env)
    }
}

/// Demand replenishment threshold for a prefetch amount.
pub fn limit_for(prefetch: usize) -> usize {
    prefetch - (prefetch >> 2)
}

fn parse_var<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(var = key, value = %raw, error = %e, "ignoring invalid configuration value");
            None
        }
    }
}
