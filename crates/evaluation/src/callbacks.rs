use candle_core::{DType, Tensor};

use crate::{
    config::{EmptyLossPolicy, EvaluationConfig},
    logging::Logger,
    metrics::{EvalState, EvaluationResults, LossSummary, TrackedMetric},
    EvaluationError, Result,
};

/// Named per-replica tensors produced by one evaluation step, kept in the
/// order the step reported them.
#[derive(Debug, Default, Clone)]
pub struct BatchOutputs {
    entries: Vec<(String, Vec<Tensor>)>,
}

impl BatchOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the tensors reported under `name`. A replaced entry
    /// keeps its original position.
    pub fn insert(&mut self, name: impl Into<String>, tensors: Vec<Tensor>) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = tensors,
            None => self.entries.push((name, tensors)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, tensors: Vec<Tensor>) -> Self {
        self.insert(name, tensors);
        self
    }

    pub fn get(&self, name: &str) -> Option<&[Tensor]> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, tensors)| tensors.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Tensor])> {
        self.entries
            .iter()
            .map(|(name, tensors)| (name.as_str(), tensors.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-batch hook: appends every replica value of each loss tensor to the
/// epoch state, in order.
pub fn eval_iter(outputs: &BatchOutputs, state: &mut EvalState) -> Result<()> {
    for (name, tensors) in outputs.iter() {
        let Some(metric) = TrackedMetric::from_tensor_name(name) else {
            continue;
        };
        state.track(metric);
        for tensor in tensors {
            state.add(metric, scalar_value(name, tensor)?);
        }
    }
    Ok(())
}

/// Epoch-end hook: reduces the accumulated losses to mean loss and
/// perplexity, logs both and clears the loss list.
pub fn eval_epoch_done(
    state: &mut EvalState,
    logger: &mut Logger,
    empty_loss: EmptyLossPolicy,
) -> Result<EvaluationResults> {
    let Some(losses) = state.reset(TrackedMetric::Loss) else {
        return Ok(EvaluationResults::empty());
    };

    match LossSummary::from_losses(&losses) {
        Some(summary) => {
            logger.log_evaluation(&summary);
            Ok(EvaluationResults::from(summary))
        }
        None => match empty_loss {
            EmptyLossPolicy::Error => Err(EvaluationError::EmptyLoss),
            EmptyLossPolicy::Skip => {
                log::debug!("evaluation epoch produced no loss values; skipping report");
                Ok(EvaluationResults::empty())
            }
        },
    }
}

fn scalar_value(name: &str, tensor: &Tensor) -> Result<f64> {
    let elements = tensor.elem_count();
    if elements != 1 {
        return Err(EvaluationError::NonScalarTensor {
            name: name.to_string(),
            elements,
        });
    }
    let value = tensor
        .reshape(())?
        .to_dtype(DType::F64)?
        .to_scalar::<f64>()?;
    Ok(value)
}

/// Evaluation hooks invoked by a training loop.
pub trait EvaluationCallback {
    fn on_eval_batch(&mut self, outputs: &BatchOutputs) -> Result<()>;

    fn on_eval_epoch_end(&mut self) -> Result<EvaluationResults>;
}

/// Loss and perplexity reporting for language-model evaluation.
pub struct LanguageModelEvaluation {
    state: EvalState,
    logger: Logger,
    empty_loss: EmptyLossPolicy,
}

impl LanguageModelEvaluation {
    pub fn new(config: &EvaluationConfig) -> Result<Self> {
        config.validate()?;
        let logger = Logger::new(config.log_precision, &config.logging)?;
        Ok(Self::with_logger(logger, config.empty_loss))
    }

    pub fn with_logger(logger: Logger, empty_loss: EmptyLossPolicy) -> Self {
        Self {
            state: EvalState::new(),
            logger,
            empty_loss,
        }
    }

    pub fn state(&self) -> &EvalState {
        &self.state
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn logger_mut(&mut self) -> &mut Logger {
        &mut self.logger
    }
}

impl EvaluationCallback for LanguageModelEvaluation {
    fn on_eval_batch(&mut self, outputs: &BatchOutputs) -> Result<()> {
        eval_iter(outputs, &mut self.state)
    }

    fn on_eval_epoch_end(&mut self) -> Result<EvaluationResults> {
        let results = eval_epoch_done(&mut self.state, &mut self.logger, self.empty_loss)?;
        self.logger.flush();
        Ok(results)
    }
}

/// Runs one evaluation epoch over `batches` and returns the epoch results.
pub fn run_evaluation<C, I>(callback: &mut C, batches: I) -> Result<EvaluationResults>
where
    C: EvaluationCallback + ?Sized,
    I: IntoIterator<Item = BatchOutputs>,
{
    for batch in batches {
        callback.on_eval_batch(&batch)?;
    }
    callback.on_eval_epoch_end()
}
