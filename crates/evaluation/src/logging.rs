use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::BytesMut;
use crc32fast::Hasher as Crc32;
use prost::Message;

use crate::{config::LoggingConfig, metrics::LossSummary, EvaluationError, Result};

pub const LOSS_TAG: &str = "dev/loss";
pub const PERPLEXITY_TAG: &str = "dev/perplexity";

/// Emits end-of-epoch evaluation metrics to the `log` facade and, when
/// configured, to a TensorBoard event file.
pub struct Logger {
    precision: usize,
    evaluations: usize,
    tensorboard: Option<TensorBoardWriter>,
}

impl Logger {
    pub fn new(precision: usize, config: &LoggingConfig) -> Result<Self> {
        let tensorboard = match config.tensorboard_dir.as_ref() {
            Some(dir) => Some(TensorBoardWriter::create(
                dir,
                config.tensorboard_flush_every_n,
            )?),
            None => None,
        };
        Ok(Self {
            precision,
            evaluations: 0,
            tensorboard,
        })
    }

    /// Log-only logger without TensorBoard output.
    pub fn stdout(precision: usize) -> Self {
        Self {
            precision,
            evaluations: 0,
            tensorboard: None,
        }
    }

    pub fn log_evaluation(&mut self, summary: &LossSummary) {
        for line in format_summary(summary, self.precision) {
            log::info!("{}", line);
        }

        if let Some(writer) = self.tensorboard.as_mut() {
            let step = self.evaluations as i64;
            let written = writer
                .write_scalar(LOSS_TAG, step, summary.mean_loss)
                .and_then(|_| writer.write_scalar(PERPLEXITY_TAG, step, summary.perplexity));
            if let Err(err) = written {
                log::warn!("dropping tensorboard scalars for evaluation {}: {}", step, err);
            }
        }

        self.evaluations += 1;
    }

    /// Number of evaluation summaries logged so far.
    pub fn evaluations_logged(&self) -> usize {
        self.evaluations
    }

    pub fn tensorboard_path(&self) -> Option<&Path> {
        self.tensorboard.as_ref().map(|writer| writer.path.as_path())
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.tensorboard.as_mut() {
            if let Err(err) = writer.flush() {
                log::warn!("{}", err);
            }
        }
    }
}

/// Renders the two dev lines with values rounded to `precision` places.
pub fn format_summary(summary: &LossSummary, precision: usize) -> [String; 2] {
    [
        format!("Dev loss: {:.*}", precision, summary.mean_loss),
        format!("Dev perplexity: {:.*}", precision, summary.perplexity),
    ]
}

struct TensorBoardWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl TensorBoardWriter {
    fn create(dir: &Path, flush_every: usize) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|err| {
            EvaluationError::logging(format!(
                "failed to create tensorboard directory {}: {err}",
                dir.display()
            ))
        })?;

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let host = ["HOSTNAME", "COMPUTERNAME"]
            .into_iter()
            .find_map(|key| std::env::var(key).ok())
            .unwrap_or_else(|| "localhost".to_string());
        let path = dir.join(format!("events.out.tfevents.{created_at}.{host}"));

        let file = File::create(&path).map_err(|err| {
            EvaluationError::logging(format!(
                "failed to create tensorboard file {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    fn write_scalar(&mut self, tag: &str, step: i64, value: f64) -> Result<()> {
        let event = EventRecord {
            wall_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0.0, |elapsed| elapsed.as_secs_f64()),
            step,
            summary: Some(ScalarSummary {
                value: vec![ScalarValue {
                    tag: tag.to_string(),
                    simple_value: Some(value as f32),
                }],
            }),
        };

        let mut payload = BytesMut::with_capacity(event.encoded_len());
        event.encode(&mut payload).map_err(|err| {
            EvaluationError::logging(format!("failed to encode {tag} event: {err}"))
        })?;
        self.append_record(&payload)?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    // u64 length, masked crc of the length, payload, masked crc of the payload.
    fn append_record(&mut self, payload: &[u8]) -> Result<()> {
        let len_bytes = (payload.len() as u64).to_le_bytes();
        let mut record = Vec::with_capacity(payload.len() + 16);
        record.extend_from_slice(&len_bytes);
        record.extend_from_slice(&Self::masked_crc(&len_bytes).to_le_bytes());
        record.extend_from_slice(payload);
        record.extend_from_slice(&Self::masked_crc(payload).to_le_bytes());

        self.writer.write_all(&record).map_err(|err| {
            EvaluationError::logging(format!(
                "failed to write tensorboard event to {}: {err}",
                self.path.display()
            ))
        })
    }

    fn masked_crc(bytes: &[u8]) -> u32 {
        let mut hasher = Crc32::new();
        hasher.update(bytes);
        hasher.finalize().rotate_right(15).wrapping_add(0xa282_ead8)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|err| {
            EvaluationError::logging(format!(
                "failed to flush tensorboard file {}: {err}",
                self.path.display()
            ))
        })?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for TensorBoardWriter {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            log::warn!("{}", err);
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct EventRecord {
    #[prost(double, tag = "1")]
    wall_time: f64,
    #[prost(int64, tag = "2")]
    step: i64,
    #[prost(message, optional, tag = "5")]
    summary: Option<ScalarSummary>,
}

#[derive(Clone, PartialEq, Message)]
struct ScalarSummary {
    #[prost(message, repeated, tag = "1")]
    value: Vec<ScalarValue>,
}

#[derive(Clone, PartialEq, Message)]
struct ScalarValue {
    #[prost(string, tag = "1")]
    tag: String,
    #[prost(float, optional, tag = "2")]
    simple_value: Option<f32>,
}
