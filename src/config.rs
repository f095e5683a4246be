//! Engine configuration.

use std::time::Duration;

use crate::business_clock::BusinessCalendar;

/// Configuration for the evaluation scheduler and the evaluator itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Interval between evaluation passes.
    pub evaluation_interval: Duration,

    /// Maximum number of cases evaluated concurrently within one pass.
    pub max_concurrent_evaluations: usize,

    /// Calendar applied when a matching rule carries no calendar of its own.
    pub default_calendar: BusinessCalendar,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(300),
            max_concurrent_evaluations: 16,
            default_calendar: BusinessCalendar::default(),
        }
    }
}
