use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{EvaluationError, Result};

const MAX_LOG_PRECISION: usize = 12;

#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_log_precision")]
    pub log_precision: usize,
    #[serde(default)]
    pub empty_loss: EmptyLossPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            log_precision: default_log_precision(),
            empty_loss: EmptyLossPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EvaluationConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: EvaluationConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(EvaluationError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.log_precision > MAX_LOG_PRECISION {
            errors.push(format!(
                "log_precision must be at most {}",
                MAX_LOG_PRECISION
            ));
        }

        if self.logging.tensorboard_flush_every_n == 0 {
            errors.push("logging.tensorboard_flush_every_n must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(EvaluationError::Validation(errors))
        }
    }

    fn apply_base_path(&mut self, base: &Path) {
        if let Some(dir) = self.logging.tensorboard_dir.as_mut() {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
    }
}

/// What the reducer does when the loss list exists but holds no values.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmptyLossPolicy {
    #[default]
    Error,
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub tensorboard_dir: Option<PathBuf>,
    #[serde(default = "default_flush_every")]
    pub tensorboard_flush_every_n: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            tensorboard_dir: None,
            tensorboard_flush_every_n: default_flush_every(),
        }
    }
}

fn default_log_precision() -> usize {
    3
}

fn default_flush_every() -> usize {
    1
}
