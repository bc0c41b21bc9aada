//! Aggregate progress from per-stage fractions.

use indexmap::IndexMap;

/// Weighted average over the configured stages
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    weights: IndexMap<String, f64>,
}

impl ProgressTracker {
    pub fn new<I, S>(weights: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            weights: weights
                .into_iter()
                .map(|(name, weight)| (name.into(), weight.max(0.0)))
                .collect(),
        }
    }

    /// Every stage weighs the same
    pub fn equal<I, S>(stages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(stages.into_iter().map(|s| (s, 1.0)))
    }

    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.weights.keys().map(String::as_str)
    }

    /// Aggregate in `[0, 1]`. Missing stages count as 0, unknown ones are ignored.
    pub fn aggregate(&self, stage_progress: &IndexMap<String, f64>) -> f64 {
        let total: f64 = self.weights.values().sum();
        if total <= 0.0 {
            return 0.0;
        }
        let done: f64 = self
            .weights
            .iter()
            .map(|(name, weight)| weight * stage_progress.get(name).copied().unwrap_or(0.0).clamp(0.0, 1.0))
            .sum();
        (done / total).clamp(0.0, 1.0)
    }
}
