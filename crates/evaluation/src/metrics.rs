use serde::{ser::SerializeMap, Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

/// Metrics collected across an evaluation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrackedMetric {
    Loss,
}

impl TrackedMetric {
    /// Classifies a batch tensor by name. Any name containing `loss` feeds the
    /// loss list, e.g. `loss`, `lm_loss`, `loss_0`.
    pub fn from_tensor_name(name: &str) -> Option<Self> {
        if name.contains("loss") {
            Some(TrackedMetric::Loss)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedMetric::Loss => "loss",
        }
    }
}

/// Caller-owned accumulation state for one evaluation epoch.
///
/// A metric with no entry has never been seen this epoch. An entry with an
/// empty list means tensors for the metric were seen but carried no values.
#[derive(Debug, Default, Clone)]
pub struct EvalState {
    values: BTreeMap<TrackedMetric, Vec<f64>>,
}

impl EvalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, metric: TrackedMetric, value: f64) {
        self.track(metric).push(value);
    }

    /// Ensures a list exists for `metric` and returns it.
    pub fn track(&mut self, metric: TrackedMetric) -> &mut Vec<f64> {
        self.values.entry(metric).or_default()
    }

    pub fn values(&self, metric: TrackedMetric) -> Option<&[f64]> {
        self.values.get(&metric).map(Vec::as_slice)
    }

    pub fn contains(&self, metric: TrackedMetric) -> bool {
        self.values.contains_key(&metric)
    }

    /// Removes the values for `metric`, returning them.
    pub fn reset(&mut self, metric: TrackedMetric) -> Option<Vec<f64>> {
        self.values.remove(&metric)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossSummary {
    pub mean_loss: f64,
    pub perplexity: f64,
    pub samples: usize,
}

impl LossSummary {
    /// Returns `None` for an empty slice.
    pub fn from_losses(losses: &[f64]) -> Option<Self> {
        if losses.is_empty() {
            return None;
        }
        let mean_loss = losses.iter().sum::<f64>() / losses.len() as f64;
        Some(Self {
            mean_loss,
            perplexity: mean_loss.exp(),
            samples: losses.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultKey {
    DevLoss,
    DevPerplexity,
}

impl ResultKey {
    pub fn label(&self) -> &'static str {
        match self {
            ResultKey::DevLoss => "Dev loss",
            ResultKey::DevPerplexity => "Dev perplexity",
        }
    }
}

impl fmt::Display for ResultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Values returned to the training loop at the end of an evaluation epoch.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EvaluationResults {
    values: BTreeMap<ResultKey, f64>,
}

impl EvaluationResults {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ResultKey) -> Option<f64> {
        self.values.get(&key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResultKey, f64)> + '_ {
        self.values.iter().map(|(key, value)| (*key, *value))
    }
}

impl From<LossSummary> for EvaluationResults {
    fn from(summary: LossSummary) -> Self {
        let mut values = BTreeMap::new();
        values.insert(ResultKey::DevLoss, summary.mean_loss);
        values.insert(ResultKey::DevPerplexity, summary.perplexity);
        Self { values }
    }
}

impl Serialize for EvaluationResults {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (key, value) in &self.values {
            map.serialize_entry(key.label(), value)?;
        }
        map.end()
    }
}
