use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::Stage;

/// One progress update sent from the worker to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub stage: Stage,
    /// Overall completion, 0 to 100, never decreasing within a run.
    pub percent: f32,
    pub message: String,
}

/// Maps per-stage fractions onto fixed overall ranges and sends them without
/// ever blocking the worker.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: Option<UnboundedSender<Progress>>,
    last: f32,
}

impl ProgressReporter {
    pub fn new(tx: Option<UnboundedSender<Progress>>) -> Self {
        Self { tx, last: 0.0 }
    }

    /// Report `fraction` (clamped to 0..=1) of the way through `stage`.
    pub fn report(&mut self, stage: Stage, fraction: f64, message: impl Into<String>) {
        let (lo, hi) = stage.progress_range();
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0) as f32
        } else {
            0.0
        };
        let percent = (lo + (hi - lo) * fraction).max(self.last);
        self.last = percent;

        if let Some(tx) = &self.tx {
            // A caller that stopped listening must not stall the run.
            let _ = tx.send(Progress {
                stage,
                percent,
                message: message.into(),
            });
        }
    }

    pub fn finish(&mut self, message: impl Into<String>) {
        self.last = 100.0;
        if let Some(tx) = &self.tx {
            let _ = tx.send(Progress {
                stage: Stage::Exporting,
                percent: 100.0,
                message: message.into(),
            });
        }
    }

    pub fn last_percent(&self) -> f32 {
        self.last
    }
}
