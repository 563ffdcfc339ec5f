use crate::cinfo;
use crate::error::{GsvmError, Result};
use crate::fitness::FitnessEvaluator;
use crate::individual::Individual;
use crate::param::Param;
use crate::pool::WorkerPool;
use crate::population::{Population, MAX_ATTEMPTS};
use crate::report::{format_individual, ReportWriter};
use crate::utils::fmt_float;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Number of top-ranked individuals carried over unchanged
pub const ELITE_SIZE: usize = 3;

/// Final ranked population and the number of turns actually run
#[derive(Debug)]
pub struct GaOutcome {
    pub population: Population,
    pub turns: usize,
}

//-----------------------------------------------------------------------------
// Genetic Algorithm core functions
//-----------------------------------------------------------------------------

/// Main function to run the genetic algorithm
///
/// # Arguments
///
/// * `preset` - Optional population resumed from a checkpoint, bypassing random initialization.
/// * `feature_len` - Length of every genome.
/// * `pool` - Worker pool evaluating each generation.
/// * `evaluator` - Fitness evaluator bound to the dataset, the grid and the classifier.
/// * `report` - Report receiving one block per turn.
/// * `param` - Parameters for the genetic algorithm.
/// * `running` - Cleared by a stop signal: the loop ends after the turn in progress.
///
/// # Errors
///
/// Fails on a report write error, or when the best fitness of a turn is lower than the
/// previous turn's (the report already holds the offending turn).
pub fn ga(
    preset: Option<Population>,
    feature_len: usize,
    pool: &WorkerPool,
    evaluator: &FitnessEvaluator,
    report: &mut ReportWriter,
    param: &Param,
    running: Arc<AtomicBool>,
) -> Result<GaOutcome> {
    let time = Instant::now();
    let mut rng = ChaCha8Rng::seed_from_u64(param.general.seed);
    let size = param.ga.population_size;

    let mut pop = match preset {
        Some(mut pop) => {
            let clones = pop.remove_clone();
            if clones > 0 {
                warn!("{} duplicated genomes removed from the resumed population", clones);
            }
            if pop.len() > size {
                warn!("Resumed population larger than requested population size: truncating based on their fit...");
                pop.truncate(size);
            } else if pop.len() < size {
                warn!("Resumed population smaller than requested population size: first generation will be smaller.");
            }
            pop
        }
        None => Population::generate(size, feature_len, &mut rng),
    };

    info!(
        "Population size: {}, k_min {}, k_max {}",
        pop.len(),
        pop.individuals.iter().map(|i| i.k()).min().unwrap_or(0),
        pop.individuals.iter().map(|i| i.k()).max().unwrap_or(0)
    );

    let mut last_best = 0.0;
    let mut turns = 0;
    for turn in 1..=param.ga.turns {
        info!("Computing Turn: {}/{}", turn, param.ga.turns);
        turns = turn;

        let evaluations = pool.evaluate(&pop.individuals, evaluator);
        pop = pop.settle(evaluations).sort();

        report.write_turn(turn, &pop)?;
        last_best = check_progress(turn, &pop, last_best)?;

        cinfo!(param.general.display_colorful, "{}", display_turn(turn, &pop));

        if turn == param.ga.turns {
            break;
        }
        if !running.load(Ordering::Relaxed) {
            info!("Signal received");
            break;
        }

        pop = evolve(&pop, turn, param.ga.permutation_rate, size, feature_len, &mut rng);
    }

    info!("Genetic algorithm computed {} turns in {:.2?}", turns, time.elapsed());
    Ok(GaOutcome { population: pop, turns })
}

/// Best fitness of the ranked population, which may not fall below `previous`
pub fn check_progress(turn: usize, ranked: &Population, previous: f64) -> Result<f64> {
    let best = ranked.best_fit();
    if best < previous {
        return Err(GsvmError::Regression {
            turn,
            current: best,
            previous,
        });
    }
    Ok(best)
}

/// Builds the next generation from a ranked one
///
/// # Arguments
///
/// * `ranked` - The evaluated population, sorted by decreasing fitness.
/// * `epoch` - Turn that produced `ranked`; recorded into newborns.
/// * `permutation_rate` - Per-bit flip probability of a mutation.
/// * `size` - Target population size.
/// * `feature_len` - Length of every genome.
/// * `rng` - Random number generator.
///
/// # Returns
///
/// The `ELITE_SIZE` best and every retained individual unchanged, a mutated offspring in
/// place of every other individual, then fresh random genomes up to `size`. Genomes are unique.
pub fn evolve(
    ranked: &Population,
    epoch: usize,
    permutation_rate: f64,
    size: usize,
    feature_len: usize,
    rng: &mut ChaCha8Rng,
) -> Population {
    let mut next = Population::new();

    let (kept, replaced): (Vec<(usize, &Individual)>, Vec<(usize, &Individual)>) = ranked
        .individuals
        .iter()
        .enumerate()
        .partition(|(rank, individual)| *rank < ELITE_SIZE || individual.retained);

    for (_, individual) in kept {
        next.insert(individual.clone());
    }

    for (rank, parent) in replaced {
        if next.len() >= size {
            break;
        }
        let placed = (0..MAX_ATTEMPTS).any(|_| next.insert(parent.child(permutation_rate, epoch, rng)));
        if !placed {
            debug!("No new offspring found for rank {} after {} attempts", rank, MAX_ATTEMPTS);
        }
    }

    let backfill = next.fill_random(size, feature_len, epoch, rng);
    if backfill > 0 {
        debug!("{} random individuals added", backfill);
    }
    next
}

/// Best individual's report line and the average F-measure of a ranked population
pub fn display_turn(turn: usize, ranked: &Population) -> String {
    let best = match ranked.individuals.first() {
        Some(best) if best.results.is_some() => format_individual(best),
        _ => "no individual evaluated".to_string(),
    };
    let (_, std) = ranked.fit_stats();
    format!(
        "\x1b[1;96mTurn {}\x1b[0m | best: \x1b[92m{}\x1b[0m\n  Average F-Measure of turn: \x1b[1m{}\x1b[0m (std {:.3})",
        turn,
        best,
        fmt_float(ranked.average_fit()),
        std
    )
}
