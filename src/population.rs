use crate::individual::{Evaluation, FeatureMask, Individual};
use crate::utils::mean_and_std;
use log::warn;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Bound on redraws when looking for a genome absent from a population
pub const MAX_ATTEMPTS: usize = 1000;

/// Individuals in insertion (or rank) order, unique by genome
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Population {
    pub individuals: Vec<Individual>,
}

impl Population {
    pub fn new() -> Population {
        Population {
            individuals: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn contains(&self, mask: &FeatureMask) -> bool {
        self.individuals.iter().any(|i| &i.mask == mask)
    }

    /// Adds the individual unless its genome is already present
    pub fn insert(&mut self, individual: Individual) -> bool {
        if self.contains(&individual.mask) {
            false
        } else {
            self.individuals.push(individual);
            true
        }
    }

    /// Initial population: the full feature set plus random genomes up to `size`
    pub fn generate(size: usize, feature_len: usize, rng: &mut ChaCha8Rng) -> Population {
        let mut pop = Population::new();
        pop.insert(Individual::new(FeatureMask::full(feature_len)));
        pop.fill_random(size, feature_len, 0, rng);
        pop
    }

    /// Adds fresh random genomes until `size` is reached or the genome space looks exhausted.
    /// Returns the number of individuals added.
    pub fn fill_random(&mut self, size: usize, feature_len: usize, epoch: usize, rng: &mut ChaCha8Rng) -> usize {
        let mut added = 0;
        let mut attempts = 0;
        while self.len() < size {
            let mut individual = Individual::random(feature_len, rng);
            individual.epoch = epoch;
            if self.insert(individual) {
                added += 1;
                attempts = 0;
            } else {
                attempts += 1;
                if attempts >= MAX_ATTEMPTS {
                    warn!(
                        "Could not find a new genome after {} attempts: population kept at {} individuals",
                        MAX_ATTEMPTS,
                        self.len()
                    );
                    break;
                }
            }
        }
        added
    }

    /// Removes later duplicates of a genome, returns how many were removed
    pub fn remove_clone(&mut self) -> usize {
        let before = self.individuals.len();
        let mut seen: HashSet<FeatureMask> = HashSet::new();
        self.individuals.retain(|i| seen.insert(i.mask.clone()));
        before - self.individuals.len()
    }

    /// Applies one outcome per individual, in order
    pub fn settle(self, evaluations: Vec<Evaluation>) -> Population {
        Population {
            individuals: self
                .individuals
                .into_iter()
                .zip(evaluations)
                .map(|(individual, evaluation)| individual.settle(evaluation))
                .collect(),
        }
    }

    /// Stable sort by decreasing fitness: ties keep their current order
    pub fn sort(mut self) -> Population {
        self.individuals
            .sort_by(|a, b| b.fit().partial_cmp(&a.fit()).unwrap_or(Ordering::Equal));
        self
    }

    /// Individuals that hold results
    pub fn evaluated(&self) -> impl Iterator<Item = &Individual> {
        self.individuals.iter().filter(|i| i.results.is_some())
    }

    /// Best fitness among evaluated individuals, 0 when none
    pub fn best_fit(&self) -> f64 {
        self.evaluated().map(|i| i.fit()).fold(0.0, f64::max)
    }

    /// Mean fitness over evaluated individuals, 0 when none
    pub fn average_fit(&self) -> f64 {
        let fits: Vec<f64> = self.evaluated().map(|i| i.fit()).collect();
        if fits.is_empty() {
            0.0
        } else {
            fits.iter().sum::<f64>() / fits.len() as f64
        }
    }

    /// (mean, std) of the evaluated fitnesses, for display
    pub fn fit_stats(&self) -> (f64, f64) {
        let fits: Vec<f64> = self.evaluated().map(|i| i.fit()).collect();
        mean_and_std(&fits)
    }

    /// Keeps the first `size` individuals
    pub fn truncate(&mut self, size: usize) {
        self.individuals.truncate(size);
    }
}

impl From<Vec<Individual>> for Population {
    fn from(individuals: Vec<Individual>) -> Population {
        Population { individuals }
    }
}

impl fmt::Debug for Population {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Population")
            .field("individuals", &self.individuals)
            .finish()
    }
}
