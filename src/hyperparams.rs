use crate::error::{GsvmError, Result};
use crate::utils::fmt_float;
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

/// Marker used in reports for a label that never obtained hyperparameters
pub const NO_HYPERPARAMS: &str = "null";

/// Kernel of the external SVM, numbered as its `-t` flag expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KernelKind {
    Linear,
    Polynomial,
    Rbf,
    Sigmoid,
}

impl KernelKind {
    pub fn code(&self) -> u8 {
        match self {
            KernelKind::Linear => 0,
            KernelKind::Polynomial => 1,
            KernelKind::Rbf => 2,
            KernelKind::Sigmoid => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<KernelKind> {
        match code {
            0 => Some(KernelKind::Linear),
            1 => Some(KernelKind::Polynomial),
            2 => Some(KernelKind::Rbf),
            3 => Some(KernelKind::Sigmoid),
            _ => None,
        }
    }
}

/// One point of the hyperparameter grid.
///
/// Fields the kernel does not use are zeroed on construction, so that a value
/// and its flag string always describe each other exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HyperParams {
    pub kernel: KernelKind,
    /// Trade-off between training error and margin (`-c`)
    pub cost: f64,
    /// Polynomial degree (`-d`)
    pub degree: i32,
    /// RBF gamma (`-g`)
    pub gamma: f64,
}

impl HyperParams {
    pub fn new(kernel: KernelKind, cost: f64, degree: i32, gamma: f64) -> HyperParams {
        let degree = if kernel == KernelKind::Polynomial { degree } else { 0 };
        let gamma = if kernel == KernelKind::Rbf { gamma } else { 0.0 };
        HyperParams {
            kernel,
            cost,
            degree,
            gamma,
        }
    }

    pub fn linear(cost: f64) -> HyperParams {
        HyperParams::new(KernelKind::Linear, cost, 0, 0.0)
    }

    /// Canonical flag form, e.g. `-t 2 -c 100.0 -g 0.01`
    pub fn to_flags(&self) -> String {
        let mut flags = format!("-t {} -c {}", self.kernel.code(), fmt_float(self.cost));
        match self.kernel {
            KernelKind::Polynomial => flags.push_str(&format!(" -d {}", self.degree)),
            KernelKind::Rbf => flags.push_str(&format!(" -g {}", fmt_float(self.gamma))),
            KernelKind::Linear | KernelKind::Sigmoid => {}
        }
        flags
    }

    /// Flags as separate process arguments
    pub fn args(&self) -> Vec<String> {
        self.to_flags().split(' ').map(String::from).collect()
    }

    /// Parses a flag string. Unknown flags are ignored and missing ones default to 0.
    pub fn from_flags(flags: &str) -> Result<HyperParams> {
        let error = |message: String| GsvmError::Hyperparams {
            flags: flags.to_string(),
            message,
        };

        let mut kernel_code: u8 = 0;
        let mut cost = 0.0;
        let mut degree = 0;
        let mut gamma = 0.0;

        let fields: Vec<&str> = flags.split_whitespace().collect();
        let mut i = 0;
        while i < fields.len() {
            let flag = fields[i];
            if matches!(flag, "-t" | "-c" | "-d" | "-g") {
                let value = fields
                    .get(i + 1)
                    .ok_or_else(|| error(format!("missing value after {}", flag)))?;
                let invalid = || error(format!("invalid value '{}' for {}", value, flag));
                match flag {
                    "-t" => kernel_code = value.parse().map_err(|_| invalid())?,
                    "-c" => cost = value.parse().map_err(|_| invalid())?,
                    "-d" => degree = value.parse().map_err(|_| invalid())?,
                    _ => gamma = value.parse().map_err(|_| invalid())?,
                }
                i += 2;
            } else {
                i += 1;
            }
        }

        let kernel = KernelKind::from_code(kernel_code)
            .ok_or_else(|| error(format!("unknown kernel {}", kernel_code)))?;
        Ok(HyperParams::new(kernel, cost, degree, gamma))
    }

    /// Like [`HyperParams::from_flags`], with the report's `null` marker mapped to `None`
    pub fn from_report(text: &str) -> Result<Option<HyperParams>> {
        if text.trim() == NO_HYPERPARAMS {
            Ok(None)
        } else {
            HyperParams::from_flags(text).map(Some)
        }
    }
}

impl fmt::Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_flags())
    }
}

impl FromStr for HyperParams {
    type Err = GsvmError;

    fn from_str(s: &str) -> Result<Self> {
        HyperParams::from_flags(s)
    }
}

/// Best known classifier quality of a genome for one label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelResult {
    pub label: i32,
    pub params: Option<HyperParams>,
    /// Percentage in [0,100], or -1 when unavailable
    pub precision: f64,
    /// Percentage in [0,100], or -1 when unavailable
    pub recall: f64,
}

impl LabelResult {
    pub fn new(label: i32, params: Option<HyperParams>, precision: f64, recall: f64) -> LabelResult {
        LabelResult {
            label,
            params,
            precision,
            recall,
        }
    }

    /// Result of a label for which nothing has been measured yet
    pub fn unmeasured(label: i32) -> LabelResult {
        LabelResult::new(label, None, -1.0, -1.0)
    }

    pub fn f_measure(&self) -> f64 {
        f_measure(self.precision, self.recall)
    }
}

/// Harmonic mean of precision and recall; 0 when either is unavailable (negative)
pub fn f_measure(precision: f64, recall: f64) -> f64 {
    if precision < 0.0 || recall < 0.0 || precision + recall == 0.0 {
        0.0
    } else {
        (2.0 * precision * recall) / (precision + recall)
    }
}

/// Loads the hyperparameter grid: one flag line per entry, blank and `#` lines skipped
pub fn load_grid<P: AsRef<Path>>(path: P) -> Result<Vec<HyperParams>> {
    let path = path.as_ref();
    info!("Loading hyperparameter grid {}...", path.display());
    let reader = BufReader::new(File::open(path).map_err(|e| GsvmError::input(path, e.to_string()))?);

    let mut grid = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        grid.push(HyperParams::from_flags(line)?);
    }
    Ok(grid)
}
