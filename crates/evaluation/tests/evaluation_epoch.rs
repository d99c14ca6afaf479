use std::fs;

use candle_core::{Device, Tensor};
use evaluation::{
    eval_epoch_done, eval_iter, run_evaluation, BatchOutputs, EmptyLossPolicy, EvalState,
    EvaluationCallback, EvaluationConfig, EvaluationError, LanguageModelEvaluation, Logger,
    ResultKey, TrackedMetric,
};
use tempfile::tempdir;

fn replicas(values: &[f32]) -> Vec<Tensor> {
    values
        .iter()
        .map(|value| Tensor::new(*value, &Device::Cpu).unwrap())
        .collect()
}

#[test]
fn accumulator_appends_every_replica_in_order() {
    let mut state = EvalState::new();
    let batch = BatchOutputs::new()
        .with("loss", replicas(&[0.5, 1.5, 2.5]))
        .with("logits", replicas(&[42.0]));

    eval_iter(&batch, &mut state).unwrap();
    assert_eq!(
        state.values(TrackedMetric::Loss),
        Some(&[0.5, 1.5, 2.5][..])
    );
}

#[test]
fn accumulator_concatenates_across_batches_and_loss_tensors() {
    let mut state = EvalState::new();
    let first = BatchOutputs::new().with("loss", replicas(&[1.0, 1.0]));
    let second = BatchOutputs::new()
        .with("lm_loss", replicas(&[3.0]))
        .with("aux_loss", replicas(&[1.0]));

    eval_iter(&first, &mut state).unwrap();
    eval_iter(&second, &mut state).unwrap();

    assert_eq!(
        state.values(TrackedMetric::Loss),
        Some(&[1.0, 1.0, 3.0, 1.0][..])
    );
}

#[test]
fn reducer_reports_mean_and_perplexity_then_resets() {
    let mut state = EvalState::new();
    for value in [1.0, 2.0, 3.0] {
        state.add(TrackedMetric::Loss, value);
    }
    let mut logger = Logger::stdout(3);

    let results = eval_epoch_done(&mut state, &mut logger, EmptyLossPolicy::Error).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results.get(ResultKey::DevLoss), Some(2.0));
    assert_eq!(results.get(ResultKey::DevPerplexity), Some(2.0f64.exp()));
    assert!(state.values(TrackedMetric::Loss).is_none());
    assert_eq!(logger.evaluations_logged(), 1);
}

#[test]
fn reducer_returns_unrounded_values() {
    let mut state = EvalState::new();
    state.add(TrackedMetric::Loss, 1.23456);
    let mut logger = Logger::stdout(3);

    let results = eval_epoch_done(&mut state, &mut logger, EmptyLossPolicy::Error).unwrap();
    assert_eq!(results.get(ResultKey::DevLoss), Some(1.23456));
    assert_eq!(results.get(ResultKey::DevPerplexity), Some(1.23456f64.exp()));
}

#[test]
fn reducer_without_losses_is_silent_and_idempotent() {
    let mut state = EvalState::new();
    let mut logger = Logger::stdout(3);

    let results = eval_epoch_done(&mut state, &mut logger, EmptyLossPolicy::Error).unwrap();
    assert!(results.is_empty());
    assert_eq!(logger.evaluations_logged(), 0);

    state.add(TrackedMetric::Loss, 0.7);
    let first = eval_epoch_done(&mut state, &mut logger, EmptyLossPolicy::Error).unwrap();
    let second = eval_epoch_done(&mut state, &mut logger, EmptyLossPolicy::Error).unwrap();
    assert!(!first.is_empty());
    assert!(second.is_empty());
    assert_eq!(logger.evaluations_logged(), 1);
}

#[test]
fn callback_runs_consecutive_epochs_independently() {
    let mut evaluation = LanguageModelEvaluation::new(&EvaluationConfig::default()).unwrap();

    let epoch_one = vec![
        BatchOutputs::new().with("loss", replicas(&[2.0])),
        BatchOutputs::new().with("loss", replicas(&[4.0])),
    ];
    let results = run_evaluation(&mut evaluation, epoch_one).unwrap();
    assert_eq!(results.get(ResultKey::DevLoss), Some(3.0));

    let epoch_two = vec![BatchOutputs::new().with("loss", replicas(&[0.0]))];
    let results = run_evaluation(&mut evaluation, epoch_two).unwrap();
    assert_eq!(results.get(ResultKey::DevLoss), Some(0.0));
    assert_eq!(results.get(ResultKey::DevPerplexity), Some(1.0));

    let results = evaluation.on_eval_epoch_end().unwrap();
    assert!(results.is_empty());
    assert_eq!(evaluation.logger().evaluations_logged(), 2);
}

#[test]
fn non_scalar_loss_tensor_is_an_error() {
    let mut evaluation = LanguageModelEvaluation::new(&EvaluationConfig::default()).unwrap();
    let batch = BatchOutputs::new().with(
        "loss",
        vec![Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu).unwrap()],
    );

    let err = evaluation.on_eval_batch(&batch).unwrap_err();
    assert!(matches!(
        err,
        EvaluationError::NonScalarTensor { elements: 3, .. }
    ));
}

#[test]
fn config_loads_toml_and_resolves_tensorboard_dir() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("eval.toml");
    fs::write(
        &path,
        "log_precision = 4\nempty_loss = \"skip\"\n\n[logging]\ntensorboard_dir = \"runs\"\n",
    )
    .unwrap();

    let config = EvaluationConfig::from_path(&path).unwrap();
    assert_eq!(config.log_precision, 4);
    assert_eq!(config.empty_loss, EmptyLossPolicy::Skip);
    assert_eq!(
        config.logging.tensorboard_dir.as_deref(),
        Some(tmp.path().join("runs").as_path())
    );
}

#[test]
fn config_loads_json_and_rejects_unknown_extensions() {
    let tmp = tempdir().expect("tempdir");
    let json = tmp.path().join("eval.json");
    fs::write(&json, r#"{"log_precision": 2}"#).unwrap();
    assert_eq!(EvaluationConfig::from_path(&json).unwrap().log_precision, 2);

    let yaml = tmp.path().join("eval.yaml");
    fs::write(&yaml, "log_precision: 2").unwrap();
    assert!(matches!(
        EvaluationConfig::from_path(&yaml),
        Err(EvaluationError::ConfigFormat(_))
    ));
}

#[test]
fn tensorboard_events_are_written_for_reported_epochs() {
    let tmp = tempdir().expect("tempdir");
    let mut config = EvaluationConfig::default();
    config.logging.tensorboard_dir = Some(tmp.path().join("tb"));

    let mut evaluation = LanguageModelEvaluation::new(&config).unwrap();
    let path = evaluation
        .logger()
        .tensorboard_path()
        .expect("tensorboard enabled")
        .to_path_buf();
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);

    let epoch = vec![BatchOutputs::new().with("loss", replicas(&[1.0, 3.0]))];
    run_evaluation(&mut evaluation, epoch).unwrap();

    let bytes = fs::read(&path).unwrap();
    assert!(!bytes.is_empty());
    let first_len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    // Two records: loss and perplexity.
    let first_record = 8 + 4 + first_len + 4;
    assert!(bytes.len() > first_record);
    let second_len =
        u64::from_le_bytes(bytes[first_record..first_record + 8].try_into().unwrap()) as usize;
    assert_eq!(bytes.len(), first_record + 8 + 4 + second_len + 4);
}
