//! Engine tunables.

use alloc::vec::Vec;

use crate::error::{ErrorKind, ImportanceResult};
use crate::process::ServiceName;
use crate::tier::{CACHED_APP_IMPORTANCE_LEVELS, CACHED_APP_MAX_ADJ, CACHED_APP_MIN_ADJ};

/// Milliseconds
pub type Millis = u64;

/// Configuration for the importance engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportanceConfig {
    /// A started service idle longer than this no longer keeps its process
    /// out of the cached band
    pub max_service_inactivity_ms: Millis,

    /// How long a process that just left top keeps the recent-foreground
    /// band when it runs a foreground service
    pub top_to_fgs_grace_ms: Millis,

    /// How long a process that recently published a provider stays at the
    /// previous-app tier
    pub content_provider_retain_ms: Millis,

    /// Fraction (1/n) of service processes kept on the A list
    pub service_b_divisor: u32,

    /// Upper bound on cached processes (activity and empty combined)
    pub max_cached_processes: u32,

    /// Upper bound on empty cached processes
    pub max_empty_processes: u32,

    /// Services pinned to the best cached slot for the current user
    pub keep_warm_services: Vec<ServiceName>,
}

impl Default for ImportanceConfig {
    fn default() -> Self {
        Self {
            max_service_inactivity_ms: 30 * 60 * 1000, // 30 min
            top_to_fgs_grace_ms: 15 * 1000,
            content_provider_retain_ms: 20 * 1000,
            service_b_divisor: 3,
            max_cached_processes: 32,
            max_empty_processes: 16,
            keep_warm_services: Vec::new(),
        }
    }
}

impl ImportanceConfig {
    /// Small-memory preset: fewer cached processes, quicker service decay
    pub fn low_memory() -> Self {
        Self {
            max_service_inactivity_ms: 5 * 60 * 1000,
            max_cached_processes: 16,
            max_empty_processes: 8,
            ..Default::default()
        }
    }

    /// Replace the keep-warm list
    pub fn with_keep_warm(mut self, services: Vec<ServiceName>) -> Self {
        self.keep_warm_services = services;
        self
    }

    /// Number of distinct cached slots per band
    pub const fn cached_slots(&self) -> u32 {
        ((CACHED_APP_MAX_ADJ - CACHED_APP_MIN_ADJ + 1) / 2 / CACHED_APP_IMPORTANCE_LEVELS) as u32
    }

    /// Check that the tunables are usable
    pub fn validate(&self) -> ImportanceResult<()> {
        importance_ensure!(
            self.service_b_divisor > 0,
            ErrorKind::InvalidConfig,
            "service_b_divisor must be non-zero"
        );
        importance_ensure!(
            self.max_cached_processes > 0,
            ErrorKind::InvalidConfig,
            "max_cached_processes must be non-zero"
        );
        importance_ensure!(
            self.max_empty_processes <= self.max_cached_processes,
            ErrorKind::InvalidConfig,
            "Cached process limits inconsistent",
            "max_empty_processes {} exceeds max_cached_processes {}",
            self.max_empty_processes,
            self.max_cached_processes
        );
        Ok(())
    }
}
