use thiserror::Error;

#[derive(Error, Debug)]
pub enum GsvmError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input {path}: {message}")]
    Input { path: String, message: String },

    #[error("Invalid hyperparameters '{flags}': {message}")]
    Hyperparams { flags: String, message: String },

    #[error("Checkpoint {path}, line {line}: {message}")]
    Checkpoint {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Best F-Measure of turn {turn} ({current}) worse than of previous turn ({previous})")]
    Regression {
        turn: usize,
        current: f64,
        previous: f64,
    },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GsvmError {
    pub(crate) fn input(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        GsvmError::Input {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GsvmError>;
