use crate::classifier::{Classifier, Trial};
use crate::data::Data;
use crate::hyperparams::{f_measure, HyperParams, LabelResult};
use crate::individual::FeatureMask;
use crate::pool::CancelToken;
use crate::utils::fmt_float;
use crate::workspace::{MODEL_FILE, TRAIN_FILE};
use log::{debug, error};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Target written for rows of the label being learned, and for the others
pub fn class_target(y: i32, label: i32) -> &'static str {
    if y == label {
        "+1"
    } else {
        "-1"
    }
}

/// One example in SVMlight format, features renumbered `1..k` in the given order
pub fn training_line<I: IntoIterator<Item = f64>>(target: &str, values: I) -> String {
    let mut line = String::from(target);
    for (i, value) in values.into_iter().enumerate() {
        line.push_str(&format!(" {}:{}", i + 1, fmt_float(value)));
    }
    line
}

/// Writes the one-vs-rest training file of `label` over the selected features,
/// leaving out `excluded` when given
pub fn write_training_file(
    path: &Path,
    data: &Data,
    mask: &FeatureMask,
    label: i32,
    excluded: Option<usize>,
) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in 0..data.sample_len {
        if Some(row) == excluded {
            continue;
        }
        let line = training_line(class_target(data.y[row], label), data.selected_values(row, mask));
        writeln!(writer, "{}", line)?;
    }
    writer.flush()
}

/// Scores a genome: for each label, the best leave-one-out trial over the grid
pub struct FitnessEvaluator<'a> {
    data: &'a Data,
    grid: &'a [HyperParams],
    classifier: &'a Classifier,
}

impl<'a> FitnessEvaluator<'a> {
    pub fn new(data: &'a Data, grid: &'a [HyperParams], classifier: &'a Classifier) -> FitnessEvaluator<'a> {
        FitnessEvaluator { data, grid, classifier }
    }

    /// One result per label in label order, or `None` when `token` fired first.
    /// `slot_dir` is private to the caller for the duration of the call.
    pub fn evaluate(&self, mask: &FeatureMask, slot_dir: &Path, token: &CancelToken) -> Option<Vec<LabelResult>> {
        let train = slot_dir.join(TRAIN_FILE);
        let model = slot_dir.join(MODEL_FILE);

        let mut results = Vec::with_capacity(self.data.labels.len());
        for &label in &self.data.labels {
            if token.is_cancelled() {
                return None;
            }
            let mut best = LabelResult::unmeasured(label);

            if let Err(e) = write_training_file(&train, self.data, mask, label, None) {
                error!("Writing {} failed: {}", train.display(), e);
                results.push(best);
                continue;
            }

            for params in self.grid {
                if token.is_cancelled() {
                    return None;
                }
                match self.classifier.leave_one_out(params, &train, &model, token) {
                    Ok(Trial::Cancelled) => return None,
                    Ok(Trial::Completed { success: false, .. }) => {
                        debug!("Label {}: classifier failed with {}", label, params);
                    }
                    Ok(Trial::Completed {
                        precision, recall, ..
                    }) => {
                        if precision < 0.0 || recall < 0.0 || precision + recall <= 0.0 {
                            continue;
                        }
                        if f_measure(precision, recall) > best.f_measure() || best.params.is_none() {
                            best = LabelResult::new(label, Some(*params), precision, recall);
                        }
                    }
                    Err(e) => error!("Running classifier with {} failed: {}", params, e),
                }
            }
            results.push(best);
        }
        Some(results)
    }
}
