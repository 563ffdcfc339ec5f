use crate::error::{GsvmError, Result};
use crate::hyperparams::LabelResult;
use crate::utils::selected_pct;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Lowest per-bit selection probability of a random genome
pub const MIN_COMPLETENESS: f64 = 0.001;
/// Mutation draws before an empty offspring gets one random bit forced on
pub const MAX_MUTATION_DRAWS: usize = 100;

/// Boolean selection over the columns of the data matrix, written as a `0`/`1` string
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct FeatureMask {
    bits: Vec<bool>,
}

impl FeatureMask {
    pub fn new(bits: Vec<bool>) -> FeatureMask {
        FeatureMask { bits }
    }

    /// All features selected
    pub fn full(len: usize) -> FeatureMask {
        FeatureMask::new(vec![true; len])
    }

    /// Each bit set with probability `completeness`, redrawn until at least one bit is set
    pub fn random(len: usize, completeness: f64, rng: &mut ChaCha8Rng) -> FeatureMask {
        loop {
            let bits: Vec<bool> = (0..len).map(|_| rng.gen::<f64>() < completeness).collect();
            if bits.iter().any(|b| *b) || len == 0 {
                return FeatureMask::new(bits);
            }
        }
    }

    /// Flips each bit with probability `rate`, redrawn until at least one bit is set.
    /// After `MAX_MUTATION_DRAWS` empty draws one random bit of the last draw is set.
    pub fn mutate(&self, rate: f64, rng: &mut ChaCha8Rng) -> FeatureMask {
        let mut bits = Vec::new();
        for _ in 0..MAX_MUTATION_DRAWS {
            bits = self
                .bits
                .iter()
                .map(|bit| if rng.gen::<f64>() < rate { !bit } else { *bit })
                .collect();
            if bits.iter().any(|b| *b) || bits.is_empty() {
                return FeatureMask::new(bits);
            }
        }
        if !bits.is_empty() {
            let forced = rng.gen_range(0..bits.len());
            bits[forced] = true;
        }
        FeatureMask::new(bits)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_selected(&self, feature: usize) -> bool {
        self.bits.get(feature).copied().unwrap_or(false)
    }

    pub fn selected_count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Column indices of the selected features, ascending
    pub fn selected(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter(|(_, b)| **b)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn has_selection(&self) -> bool {
        self.bits.iter().any(|b| *b)
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }
}

impl fmt::Display for FeatureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self.bits.iter().map(|b| if *b { '1' } else { '0' }).collect();
        write!(f, "{}", text)
    }
}

impl fmt::Debug for FeatureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureMask({})", self)
    }
}

/// Keeps the `0`/`1` characters and ignores everything else
impl FromStr for FeatureMask {
    type Err = GsvmError;

    fn from_str(s: &str) -> Result<Self> {
        let bits: Vec<bool> = s
            .chars()
            .filter(|c| *c == '0' || *c == '1')
            .map(|c| c == '1')
            .collect();
        if bits.is_empty() {
            return Err(GsvmError::Configuration(format!(
                "'{}' contains no feature bits",
                s
            )));
        }
        Ok(FeatureMask::new(bits))
    }
}

impl From<FeatureMask> for String {
    fn from(mask: FeatureMask) -> String {
        mask.to_string()
    }
}

impl TryFrom<String> for FeatureMask {
    type Error = GsvmError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Outcome of one individual's evaluation within a generation
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The evaluation completed
    Fresh(Vec<LabelResult>),
    /// The evaluation timed out and the previous, non-zero results are kept
    Retained(Vec<LabelResult>),
    /// The evaluation timed out without usable previous results
    Discarded,
}

impl Evaluation {
    /// Turns the evaluator's answer into an outcome; `None` means the evaluation was cancelled
    pub fn settle(previous: &Individual, results: Option<Vec<LabelResult>>) -> Evaluation {
        match results {
            Some(results) => Evaluation::Fresh(results),
            None => match &previous.results {
                Some(old) if previous.fit() > 0.0 => Evaluation::Retained(old.clone()),
                _ => Evaluation::Discarded,
            },
        }
    }

    pub fn is_timeout(&self) -> bool {
        !matches!(self, Evaluation::Fresh(_))
    }
}

/// Candidate feature subset and its best known per-label results
#[derive(Clone, Serialize, Deserialize)]
pub struct Individual {
    /// Selected features
    pub mask: FeatureMask,
    /// Best result per label, absent until evaluated
    pub results: Option<Vec<LabelResult>>,
    /// Results were kept from a previous turn after a timeout; exempt from mutation
    #[serde(default)]
    pub retained: bool,
    /// Turn in which the genome appeared
    #[serde(default)]
    pub epoch: usize,
}

impl Individual {
    pub fn new(mask: FeatureMask) -> Individual {
        Individual {
            mask,
            results: None,
            retained: false,
            epoch: 0,
        }
    }

    /// Random genome with a selection probability drawn per individual
    pub fn random(feature_len: usize, rng: &mut ChaCha8Rng) -> Individual {
        let completeness = rng.gen::<f64>() + MIN_COMPLETENESS;
        Individual::new(FeatureMask::random(feature_len, completeness, rng))
    }

    pub fn child(&self, permutation_rate: f64, epoch: usize, rng: &mut ChaCha8Rng) -> Individual {
        let mut child = Individual::new(self.mask.mutate(permutation_rate, rng));
        child.epoch = epoch;
        child
    }

    /// Mean F-measure over the labels, 0 without results
    pub fn fit(&self) -> f64 {
        match &self.results {
            Some(results) if !results.is_empty() => {
                let fit = results.iter().map(|r| r.f_measure()).sum::<f64>() / results.len() as f64;
                if fit.is_finite() {
                    fit
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn k(&self) -> usize {
        self.mask.selected_count()
    }

    pub fn selected_pct(&self) -> f64 {
        selected_pct(self.k(), self.mask.len())
    }

    pub fn settle(mut self, evaluation: Evaluation) -> Individual {
        match evaluation {
            Evaluation::Fresh(results) => {
                self.results = Some(results);
                self.retained = false;
            }
            Evaluation::Retained(results) => {
                self.results = Some(results);
                self.retained = true;
            }
            Evaluation::Discarded => {
                self.results = None;
                self.retained = false;
            }
        }
        self
    }
}

impl PartialEq for Individual {
    fn eq(&self, other: &Self) -> bool {
        self.mask == other.mask
    }
}

impl Eq for Individual {}

impl Hash for Individual {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.mask.hash(state);
    }
}

impl fmt::Debug for Individual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Individual {{ mask: {}, fit: {:.4}, k: {}, retained: {} }}",
            self.mask,
            self.fit(),
            self.k(),
            self.retained
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyperparams::HyperParams;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn evaluated(mask: &str, scores: &[(f64, f64)]) -> Individual {
        let mut individual = Individual::new(mask.parse().unwrap());
        individual.results = Some(
            scores
                .iter()
                .enumerate()
                .map(|(i, (p, r))| LabelResult::new(i as i32, Some(HyperParams::linear(1.0)), *p, *r))
                .collect(),
        );
        individual
    }

    #[test]
    fn test_mask_text_form() {
        let mask: FeatureMask = "1011".parse().unwrap();
        assert_eq!(mask.to_string(), "1011");
        assert_eq!(mask.selected(), vec![0, 2, 3]);
        assert_eq!(mask.selected_count(), 3);
        assert!(!mask.is_selected(1));
        assert!(!mask.is_selected(10));
    }

    #[test]
    fn test_mask_parse_ignores_noise() {
        let mask: FeatureMask = " 10 x1\t".parse().unwrap();
        assert_eq!(mask.to_string(), "101");
        assert!("abc".parse::<FeatureMask>().is_err());
    }

    #[test]
    fn test_random_masks_always_select_a_feature() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..500 {
            let mask = FeatureMask::random(5, MIN_COMPLETENESS, &mut rng);
            assert_eq!(mask.len(), 5);
            assert!(mask.has_selection());
        }
        for _ in 0..200 {
            assert!(Individual::random(3, &mut rng).mask.has_selection());
        }
    }

    #[test]
    fn test_mutation_always_selects_a_feature() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let parent: FeatureMask = "1000".parse().unwrap();
        for _ in 0..500 {
            let child = parent.mutate(1.0, &mut rng);
            assert_eq!(child.to_string(), "0111");
            let child = parent.mutate(0.5, &mut rng);
            assert!(child.has_selection());
        }
    }

    #[test]
    fn test_full_mask_at_rate_one_keeps_a_single_feature() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let parent = FeatureMask::full(4);
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let child = parent.mutate(1.0, &mut rng);
            assert_eq!(child.len(), 4);
            assert_eq!(child.selected_count(), 1);
            seen.insert(child.to_string());
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_mutation_rate_zero_keeps_genome() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let parent = Individual::new("0110".parse().unwrap());
        let child = parent.child(0.0, 4, &mut rng);
        assert_eq!(child, parent);
        assert_eq!(child.epoch, 4);
        assert!(child.results.is_none());
    }

    #[test]
    fn test_identity_is_the_genome() {
        let a = evaluated("101", &[(50.0, 50.0)]);
        let b = Individual::new("101".parse().unwrap());
        let c = Individual::new("100".parse().unwrap());
        assert_eq!(a, b);
        assert_ne!(a, c);
        let set: HashSet<Individual> = vec![a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_fit_is_mean_f_measure() {
        let individual = evaluated("11", &[(50.0, 50.0), (-1.0, 90.0)]);
        assert_eq!(individual.fit(), 25.0);
        assert_eq!(Individual::new("11".parse().unwrap()).fit(), 0.0);
        let mut empty = Individual::new("11".parse().unwrap());
        empty.results = Some(vec![]);
        assert_eq!(empty.fit(), 0.0);
    }

    #[test]
    fn test_settle_retains_previous_results_on_timeout() {
        let previous = evaluated("11", &[(80.0, 80.0)]);
        let evaluation = Evaluation::settle(&previous, None);
        assert_eq!(evaluation, Evaluation::Retained(previous.results.clone().unwrap()));
        let settled = previous.clone().settle(evaluation);
        assert!(settled.retained);
        assert_eq!(settled.results, previous.results);
    }

    #[test]
    fn test_settle_discards_without_previous_fitness() {
        let never = Individual::new("11".parse().unwrap());
        assert_eq!(Evaluation::settle(&never, None), Evaluation::Discarded);

        let zero = evaluated("11", &[(0.0, 0.0)]);
        let evaluation = Evaluation::settle(&zero, None);
        assert_eq!(evaluation, Evaluation::Discarded);
        let settled = zero.settle(evaluation);
        assert!(settled.results.is_none());
        assert!(!settled.retained);
    }

    #[test]
    fn test_settle_fresh_clears_retain_flag() {
        let mut previous = evaluated("11", &[(80.0, 80.0)]);
        previous.retained = true;
        let fresh = vec![LabelResult::new(0, Some(HyperParams::linear(2.0)), 10.0, 10.0)];
        let evaluation = Evaluation::settle(&previous, Some(fresh.clone()));
        assert!(!evaluation.is_timeout());
        let settled = previous.settle(evaluation);
        assert!(!settled.retained);
        assert_eq!(settled.results, Some(fresh));
    }

    #[test]
    fn test_mask_serializes_as_string() {
        let individual = evaluated("0110", &[(50.0, 50.0)]);
        let json = serde_json::to_string(&individual).unwrap();
        assert!(json.contains("\"mask\":\"0110\""));
        let back: Individual = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mask, individual.mask);
        assert_eq!(back.results, individual.results);
    }
}
