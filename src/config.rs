//! Configuration types.

use crate::engine::retry::RetryPolicy;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Items scoring at or above this draft replies (0–10).
    pub importance_threshold: u8,
    /// Retry budget for each logical capability call.
    pub retry: RetryPolicy,
    /// How long a pending suggestion stays approvable.
    pub suggestion_retention: chrono::Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            importance_threshold: 7,
            retry: RetryPolicy::default(),
            suggestion_retention: chrono::Duration::days(7),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_threshold_is_seven() {
        let config = EngineConfig::default();
        assert_eq!(config.importance_threshold, 7);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.suggestion_retention, chrono::Duration::days(7));
    }
}
