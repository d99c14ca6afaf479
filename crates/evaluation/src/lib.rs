//! Evaluation-epoch hooks for language-model training: per-batch loss
//! accumulation and end-of-epoch loss/perplexity reporting.

pub mod callbacks;
pub mod config;
pub mod errors;
pub mod logging;
pub mod metrics;

pub use callbacks::{
    eval_epoch_done, eval_iter, run_evaluation, BatchOutputs, EvaluationCallback,
    LanguageModelEvaluation,
};
pub use config::{EmptyLossPolicy, EvaluationConfig, LoggingConfig};
pub use errors::{EvaluationError, Result};
pub use logging::Logger;
pub use metrics::{EvalState, EvaluationResults, LossSummary, ResultKey, TrackedMetric};
