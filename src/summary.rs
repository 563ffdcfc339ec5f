use crate::error::Result;
use crate::individual::Individual;
use crate::population::Population;
use crate::utils::version;
use chrono::Local;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of a study, saved as JSON next to the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudySummary {
    pub gsvm_version: String,
    pub timestamp: String,
    pub turns: usize,
    pub feature_len: usize,
    pub average_fit: f64,
    pub best: Option<Individual>,
    /// Column indices selected by the best individual
    pub selected_features: Vec<usize>,
    pub execution_time: f64,
}

impl StudySummary {
    pub fn new(ranked: &Population, turns: usize, feature_len: usize, execution_time: f64) -> StudySummary {
        let best = ranked.evaluated().next().cloned();
        StudySummary {
            gsvm_version: version(),
            timestamp: Local::now().format("%Y-%m-%d_%H-%M-%S").to_string(),
            turns,
            feature_len,
            average_fit: ranked.average_fit(),
            selected_features: best.as_ref().map(|b| b.mask.selected()).unwrap_or_default(),
            best,
            execution_time,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("Study summary saved to {}", path.display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<StudySummary> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::{HyperParams, LabelResult};

    #[test]
    fn test_summary_of_the_best_individual() {
        let mut best = Individual::new("0110".parse().unwrap());
        best.results = Some(vec![LabelResult::new(1, Some(HyperParams::linear(1.0)), 80.0, 80.0)]);
        let pop = Population::from(vec![best, Individual::new("1111".parse().unwrap())]);

        let summary = StudySummary::new(&pop, 3, 4, 1.5);
        assert_eq!(summary.selected_features, vec![1, 2]);
        assert_eq!(summary.average_fit, 80.0);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("best.json");
        summary.save(&path).unwrap();
        let loaded = StudySummary::load(&path).unwrap();
        assert_eq!(loaded.turns, 3);
        assert_eq!(loaded.best.unwrap().mask.to_string(), "0110");
    }

    #[test]
    fn test_summary_without_evaluated_individual() {
        let pop = Population::from(vec![Individual::new("11".parse().unwrap())]);
        let summary = StudySummary::new(&pop, 1, 2, 0.0);
        assert!(summary.best.is_none());
        assert!(summary.selected_features.is_empty());
    }
}
