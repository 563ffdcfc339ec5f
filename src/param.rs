use crate::error::{GsvmError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::thread;

pub const MODE_GA: &str = "ga";
pub const MODE_EVALUATE: &str = "evaluate";

// Field definitions and associated default values

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Param {
    #[serde(default)]
    pub general: General,
    #[serde(default)]
    pub data: Data,
    #[serde(default)]
    pub ga: GA,
    #[serde(default)]
    pub classifier: Classifier,
    #[serde(default)]
    pub evaluation: Evaluation,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct General {
    #[serde(default = "seed_default")]
    pub seed: u64,
    /// `ga` runs the search, `evaluate` scores the best genome of `data.resume`
    #[serde(default = "mode_default")]
    pub mode: String,
    /// Worker slots, each running at most one classifier at a time
    #[serde(default = "thread_number_default")]
    pub thread_number: usize,
    #[serde(default = "empty_string")]
    pub log_base: String,
    #[serde(default = "log_suffix_default")]
    pub log_suffix: String,
    #[serde(default = "log_level_default")]
    pub log_level: String,
    #[serde(default = "true_default")]
    pub display_colorful: bool,
    /// JSON summary of the best individual, skipped when empty
    #[serde(default = "empty_string")]
    pub save_best: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Data {
    /// Hyperparameter grid, one flag line per entry
    #[serde(default = "empty_string")]
    pub parameters: String,
    /// One integer label per row
    #[serde(default = "empty_string")]
    pub index: String,
    /// Whitespace-separated values, one row per line
    #[serde(default = "empty_string")]
    pub matrix: String,
    /// Optional `0`/`1` column restriction
    #[serde(default = "empty_string")]
    pub features: String,
    /// Optional report of a previous run
    #[serde(default = "empty_string")]
    pub resume: String,
    #[serde(default = "report_default")]
    pub report: String,
    #[serde(default = "tmp_dir_default")]
    pub tmp_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GA {
    #[serde(default = "population_size_default")]
    pub population_size: usize,
    #[serde(default = "turns_default")]
    pub turns: usize,
    #[serde(default = "permutation_rate_default")]
    pub permutation_rate: f64,
    /// Seconds an evaluation may run, 0 for no limit
    #[serde(default = "zero_default")]
    pub timeout: u64,
    #[serde(default = "poll_interval_ms_default")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Classifier {
    #[serde(default = "learn_default")]
    pub learn: String,
    #[serde(default = "classify_default")]
    pub classify: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Evaluation {
    #[serde(default = "evaluation_output_default")]
    pub output: String,
}

// Default section definitions

impl Default for General {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Data {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for GA {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Classifier {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Evaluation {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Default for Param {
    fn default() -> Self {
        serde_json::from_value(serde_json::json!({})).unwrap()
    }
}

impl Param {
    pub fn new() -> Self {
        Self::default()
    }
}

pub fn get(param_file: &str) -> Result<Param> {
    let param_file_reader =
        File::open(param_file).map_err(|e| GsvmError::input(param_file, e.to_string()))?;
    let param_reader = BufReader::new(param_file_reader);

    let mut config: Param = serde_yaml::from_reader(param_reader)?;

    validate(&mut config)?;

    Ok(config)
}

pub fn validate(param: &mut Param) -> Result<()> {
    if !param.general.log_base.is_empty() {
        param.general.display_colorful = false;
    }

    let invalid = |message: String| Err(GsvmError::Configuration(message));

    if param.general.mode != MODE_GA && param.general.mode != MODE_EVALUATE {
        return invalid(format!(
            "unknown mode '{}' (expected '{}' or '{}')",
            param.general.mode, MODE_GA, MODE_EVALUATE
        ));
    }
    if param.general.mode == MODE_EVALUATE && param.data.resume.is_empty() {
        return invalid("evaluate mode needs data.resume".to_string());
    }

    if param.general.thread_number == 0 {
        return invalid("general.thread_number must be at least 1".to_string());
    }

    if param.ga.population_size < 3 {
        return invalid(format!(
            "ga.population_size must be at least 3 (got {})",
            param.ga.population_size
        ));
    }
    if param.ga.turns == 0 {
        return invalid("ga.turns must be at least 1".to_string());
    }
    if !(0.0..=1.0).contains(&param.ga.permutation_rate) {
        return invalid(format!(
            "ga.permutation_rate must lie in [0,1] (got {})",
            param.ga.permutation_rate
        ));
    }
    if param.ga.poll_interval_ms == 0 {
        return invalid("ga.poll_interval_ms must be at least 1".to_string());
    }
    if param.data.tmp_dir.is_empty() {
        return invalid("data.tmp_dir must not be empty".to_string());
    }
    if param.classifier.learn.trim().is_empty() || param.classifier.classify.trim().is_empty() {
        return invalid("classifier commands must not be empty".to_string());
    }

    Ok(())
}

/// Checks the input paths once a checkpoint had the chance to fill them
pub fn validate_inputs(param: &Param) -> Result<()> {
    let search = param.general.mode == MODE_GA;
    for (name, value, required) in [
        ("data.parameters", &param.data.parameters, search),
        ("data.index", &param.data.index, true),
        ("data.matrix", &param.data.matrix, true),
        ("data.report", &param.data.report, search),
    ] {
        if required && value.is_empty() {
            return Err(GsvmError::Configuration(format!("{} is required", name)));
        }
    }
    Ok(())
}

pub fn available_cpus() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// Default value definitions

fn seed_default() -> u64 {
    4815162342
}
fn empty_string() -> String {
    "".to_string()
}
fn mode_default() -> String {
    MODE_GA.to_string()
}
fn thread_number_default() -> usize {
    available_cpus()
}
fn log_suffix_default() -> String {
    "log".to_string()
}
fn log_level_default() -> String {
    "info".to_string()
}
fn true_default() -> bool {
    true
}
fn report_default() -> String {
    "gsvm_report.txt".to_string()
}
fn tmp_dir_default() -> String {
    "tmp".to_string()
}
fn population_size_default() -> usize {
    10
}
fn turns_default() -> usize {
    10
}
fn permutation_rate_default() -> f64 {
    0.1
}
fn zero_default() -> u64 {
    0
}
fn poll_interval_ms_default() -> u64 {
    500
}
fn learn_default() -> String {
    if cfg!(windows) {
        "svm_learn.exe".to_string()
    } else {
        "svm_learn".to_string()
    }
}
fn classify_default() -> String {
    if cfg!(windows) {
        "svm_classify.exe".to_string()
    } else {
        "svm_classify".to_string()
    }
}
fn evaluation_output_default() -> String {
    "evaluation_results.txt".to_string()
}
