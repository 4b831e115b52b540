// ── Runtime view-model configuration ──
//
// Tuning knobs for a view model. Built by the host (directly or through
// `sprint-config`) and handed in; core never reads config files.

use std::time::Duration;

/// Default throttle window used while a view model is inactive.
pub const DEFAULT_THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of errors buffered per error-bus observer.
pub const DEFAULT_ERROR_CAPACITY: usize = 64;

/// Configuration for a single [`ViewModel`](crate::ViewModel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewModelConfig {
    /// Window used by [`ViewModel::throttle_while_inactive`](crate::ViewModel::throttle_while_inactive).
    pub throttle_interval: Duration,
    /// Errors buffered for a slow observer before it starts skipping.
    pub error_capacity: usize,
}

impl Default for ViewModelConfig {
    fn default() -> Self {
        Self {
            throttle_interval: DEFAULT_THROTTLE_INTERVAL,
            error_capacity: DEFAULT_ERROR_CAPACITY,
        }
    }
}
