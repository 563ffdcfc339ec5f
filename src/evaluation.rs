use crate::classifier::Classifier;
use crate::data::Data;
use crate::error::{GsvmError, Result};
use crate::fitness::{training_line, write_training_file};
use crate::hyperparams::HyperParams;
use crate::individual::{FeatureMask, Individual};
use crate::pool::WorkerPool;
use crate::workspace::{Workspace, EVALUATE_MODEL_FILE, EVALUATE_PREDICT_FILE, EVALUATE_RESULT_FILE, EVALUATE_TRAIN_FILE};
use log::{debug, error, info};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

pub const RESULTS_HEADER: &str = "Row-Index\tLabelIndex\tClassifyLabel\tExpected\tClassified\tSuccess";

/// One (row, label) pair to classify with the label's hyperparameters
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationTask {
    pub row: usize,
    pub label: i32,
    pub params: HyperParams,
}

/// Outcome of classifying one row against one label
#[derive(Debug, Clone, PartialEq)]
pub struct RowClassification {
    pub row: usize,
    /// Actual label of the row
    pub row_label: i32,
    /// Label the classifier was trained for
    pub label: i32,
    pub expected: bool,
    pub classified: bool,
}

impl RowClassification {
    pub fn success(&self) -> bool {
        self.expected == self.classified
    }
}

/// Every (row, label) pair for which the individual holds hyperparameters, row-major
pub fn tasks(individual: &Individual, data: &Data) -> Vec<EvaluationTask> {
    let mut tasks = Vec::new();
    for row in 0..data.sample_len {
        for result in individual.results.iter().flatten() {
            if let Some(params) = result.params {
                tasks.push(EvaluationTask {
                    row,
                    label: result.label,
                    params,
                });
            }
        }
    }
    tasks
}

/// Leave-one-out classification of every row with the genome of `individual`.
/// Pipelines that fail are logged and left out.
pub fn evaluate(individual: &Individual, data: &Data, classifier: &Classifier, pool: &WorkerPool) -> Vec<RowClassification> {
    let tasks = tasks(individual, data);
    info!(
        "Evaluating {} with {} row/label pairs on {} slots...",
        individual.mask,
        tasks.len(),
        pool.slots()
    );

    pool.map_slots(&tasks, |slot, task| {
        match classify_row(task, &individual.mask, data, classifier, pool.workspace(), slot) {
            Ok(classification) => Some(classification),
            Err(e) => {
                error!("Pipeline failed for row {} and label {}: {}", task.row, task.label, e);
                None
            }
        }
    })
    .into_iter()
    .flatten()
    .collect()
}

fn classify_row(
    task: &EvaluationTask,
    mask: &FeatureMask,
    data: &Data,
    classifier: &Classifier,
    workspace: &Workspace,
    slot: usize,
) -> Result<RowClassification> {
    debug!("Processing {} - {}", task.row, task.label);
    let train = workspace.file(slot, EVALUATE_TRAIN_FILE);
    let model = workspace.file(slot, EVALUATE_MODEL_FILE);
    let predict = workspace.file(slot, EVALUATE_PREDICT_FILE);
    let result = workspace.file(slot, EVALUATE_RESULT_FILE);

    write_training_file(&train, data, mask, task.label, Some(task.row))?;
    fs::write(&predict, format!("{}\n", training_line("0", data.selected_values(task.row, mask))))?;
    // a stale result must not be read as this pair's answer
    let _ = fs::remove_file(&result);

    let status = classifier.train(&task.params, &train, &model)?;
    if !status.success() {
        return Err(GsvmError::Evaluation(format!("training exited with {}", status)));
    }
    let status = classifier.classify(&predict, &model, &result)?;
    if !status.success() {
        return Err(GsvmError::Evaluation(format!("classification exited with {}", status)));
    }

    let decision = read_decision(&result)?;
    Ok(RowClassification {
        row: task.row,
        row_label: data.y[task.row],
        label: task.label,
        expected: data.y[task.row] == task.label,
        classified: decision > 0.0,
    })
}

/// Decision value on the first line of a classifier result file
fn read_decision(path: &Path) -> Result<f64> {
    let text = fs::read_to_string(path).map_err(|e| GsvmError::input(path, e.to_string()))?;
    let first = text.lines().next().unwrap_or("").trim();
    first
        .parse()
        .map_err(|_| GsvmError::input(path, format!("'{}' is not a decision value", first)))
}

/// Percentage of successful classifications, 0 when there are none
pub fn accuracy(classifications: &[RowClassification]) -> f64 {
    if classifications.is_empty() {
        return 0.0;
    }
    let successes = classifications.iter().filter(|c| c.success()).count();
    successes as f64 * 100.0 / classifications.len() as f64
}

pub fn write_results<P: AsRef<Path>>(path: P, classifications: &[RowClassification]) -> Result<()> {
    let flag = |value: bool| if value { "1" } else { "0" };
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    writeln!(writer, "{}", RESULTS_HEADER)?;
    for c in classifications {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            c.row,
            c.row_label,
            c.label,
            flag(c.expected),
            flag(c.classified),
            flag(c.success())
        )?;
    }
    writer.flush()?;
    Ok(())
}
