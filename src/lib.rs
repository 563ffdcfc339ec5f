#![allow(non_snake_case)]

pub mod classifier;
pub mod data;
pub mod error;
pub mod evaluation;
pub mod fitness;
pub mod ga;
pub mod hyperparams;
pub mod individual;
pub mod param;
pub mod pool;
pub mod population;
pub mod report;
pub mod summary;
pub mod utils;
pub mod workspace;

use classifier::Classifier;
use data::{load_feature_restriction, Data};
use error::{GsvmError, Result};
use fitness::FitnessEvaluator;
use hyperparams::load_grid;
use param::{Param, MODE_EVALUATE};
use pool::WorkerPool;
use population::Population;
use report::{load_checkpoint, Checkpoint, ReportHeader, ReportWriter};
use summary::StudySummary;
use crate::ga::ga;

use log::{info, warn};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

/// Runs the study described by `param`: a genetic search, or the evaluation of the best
/// individual of `data.resume`. `running` set to false stops a search after its current turn.
pub fn run(param: &Param, running: Arc<AtomicBool>) -> Result<()> {
    let start = Instant::now();
    cinfo!(param.general.display_colorful, "\x1b[1;96mgsvm {}\x1b[0m", utils::version());

    let mut param = param.clone();
    let checkpoint = if param.data.resume.is_empty() {
        None
    } else {
        let checkpoint = load_checkpoint(&param.data.resume)?;
        fill_from_checkpoint(&mut param, &checkpoint);
        Some(checkpoint)
    };
    param::validate_inputs(&param)?;

    // Load data
    let restriction = if param.data.features.is_empty() {
        None
    } else {
        Some(load_feature_restriction(&param.data.features)?)
    };
    let mut data = Data::new();
    data.load_data(&param.data.index, &param.data.matrix, restriction.as_ref())?;
    cinfo!(param.general.display_colorful, "\x1b[2;97m{:?}\x1b[0m", data);

    let classifier = Classifier::from_param(&param)?;
    let pool = WorkerPool::from_param(&param)?;

    if param.general.mode == MODE_EVALUATE {
        let checkpoint = checkpoint
            .ok_or_else(|| GsvmError::Configuration("evaluate mode needs data.resume".to_string()))?;
        run_evaluation(&param, &checkpoint, &data, &classifier, &pool)?;
    } else {
        run_search(&param, checkpoint, &data, &classifier, &pool, running)?;
    }

    info!("Study completed in {:.2?}", start.elapsed());
    Ok(())
}

/// Input paths recorded by a previous report fill the ones left empty
fn fill_from_checkpoint(param: &mut Param, checkpoint: &Checkpoint) {
    let header = &checkpoint.header;
    let fields = [
        ("data.parameters", &mut param.data.parameters, &header.parameter_file),
        ("data.index", &mut param.data.index, &header.index_file),
        ("data.matrix", &mut param.data.matrix, &header.data_file),
        ("data.features", &mut param.data.features, &header.feature_file),
    ];
    for (name, field, recorded) in fields {
        if let Some(recorded) = recorded {
            if field.is_empty() {
                info!("{} taken from checkpoint: {}", name, recorded);
                *field = recorded.clone();
            }
        }
    }
}

fn check_compatibility(population: &Population, data: &Data, source: &str) -> Result<()> {
    match population.individuals.iter().find(|i| i.mask.len() != data.feature_len) {
        Some(individual) => Err(GsvmError::input(
            source,
            format!(
                "genome {} has {} features but the data has {}",
                individual.mask,
                individual.mask.len(),
                data.feature_len
            ),
        )),
        None => Ok(()),
    }
}

fn run_search(
    param: &Param,
    checkpoint: Option<Checkpoint>,
    data: &Data,
    classifier: &Classifier,
    pool: &WorkerPool,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let start = Instant::now();
    let grid = load_grid(&param.data.parameters)?;
    if grid.is_empty() {
        return Err(GsvmError::input(&param.data.parameters, "no hyperparameters"));
    }
    info!("{} hyperparameter sets, {} worker slots", grid.len(), pool.slots());

    let preset = match checkpoint.as_ref().map(|c| c.population()) {
        Some(Some(pop)) => {
            check_compatibility(&pop, data, &param.data.resume)?;
            info!("Resuming from {} individuals", pop.len());
            Some(pop)
        }
        Some(None) => {
            warn!("Checkpoint {} holds no individual: starting from a random population", param.data.resume);
            None
        }
        None => None,
    };

    let features = if param.data.features.is_empty() {
        None
    } else {
        Some(param.data.features.as_str())
    };
    let header = ReportHeader::new(&param.data.parameters, &param.data.index, &param.data.matrix, features);
    let mut report = ReportWriter::create(&param.data.report, &header)?;

    cinfo!(param.general.display_colorful, "Training using Genetic Algorithm\n-----------------------------------------------------");
    let evaluator = FitnessEvaluator::new(data, &grid, classifier);
    let outcome = ga(preset, data.feature_len, pool, &evaluator, &mut report, param, running)?;

    if !param.general.save_best.is_empty() {
        StudySummary::new(&outcome.population, outcome.turns, data.feature_len, start.elapsed().as_secs_f64())
            .save(&param.general.save_best)?;
    }
    Ok(())
}

fn run_evaluation(param: &Param, checkpoint: &Checkpoint, data: &Data, classifier: &Classifier, pool: &WorkerPool) -> Result<()> {
    let best = checkpoint
        .best()
        .ok_or_else(|| GsvmError::Evaluation(format!("{} holds no individual", param.data.resume)))?;
    check_compatibility(&Population::from(vec![best.clone()]), data, &param.data.resume)?;

    cinfo!(param.general.display_colorful, "Evaluating best individual\n-----------------------------------------------------");
    let classifications = evaluation::evaluate(best, data, classifier, pool);
    evaluation::write_results(&param.evaluation.output, &classifications)?;

    cinfo!(
        param.general.display_colorful,
        "\x1b[1;92mAccuracy: {:.2}%\x1b[0m over {} classifications, written to {}",
        evaluation::accuracy(&classifications),
        classifications.len(),
        param.evaluation.output
    );
    Ok(())
}
