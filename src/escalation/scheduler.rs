//! Periodic evaluation trigger.
//!
//! Any number of scheduler instances may run against the same store; the
//! duplicate-suppression claim makes overlapping passes idempotent, so no
//! mutual exclusion between cycles is needed.

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::escalation::evaluator::EscalationEvaluator;

pub struct EvaluationScheduler {
    evaluator: EscalationEvaluator,
    config: EngineConfig,
}

impl EvaluationScheduler {
    pub fn new(evaluator: EscalationEvaluator, config: EngineConfig) -> Self {
        Self { evaluator, config }
    }

    /// Spawn the evaluation loop. Each tick runs one full pass; a failed
    /// pass is logged and simply repeated next cycle.
    pub fn start(self) -> JoinHandle<()> {
        let evaluator = self.evaluator;
        let period = self.config.evaluation_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            info!(interval_secs = period.as_secs(), "escalation scheduler started");

            loop {
                ticker.tick().await;
                let now = chrono::Utc::now();
                match evaluator.evaluate_all(now).await {
                    Ok(summary) => {
                        if summary.escalations > 0 || summary.warnings > 0 || summary.failures > 0 {
                            info!(
                                evaluated = summary.evaluated,
                                escalations = summary.escalations,
                                warnings = summary.warnings,
                                failures = summary.failures,
                                "evaluation pass completed"
                            );
                        }
                    }
                    Err(err) => {
                        error!(error = %err, "evaluation pass aborted");
                    }
                }
            }
        })
    }
}
