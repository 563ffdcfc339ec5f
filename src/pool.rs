use crate::cinfo;
use crate::error::Result;
use crate::fitness::FitnessEvaluator;
use crate::hyperparams::LabelResult;
use crate::individual::{Evaluation, Individual};
use crate::param::{available_cpus, Param};
use crate::utils::fmt_float;
use crate::workspace::Workspace;
use log::{debug, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between the supervisor and one task
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Event {
    Started { index: usize, at: Instant },
    Finished { index: usize, results: Option<Vec<LabelResult>> },
}

/// Fixed set of worker threads, each bound to its own workspace slot
pub struct WorkerPool {
    thread_pool: ThreadPool,
    workspace: Workspace,
    /// None disables preemption
    timeout: Option<Duration>,
    poll_interval: Duration,
    display_colorful: bool,
}

impl WorkerPool {
    pub fn new(workspace: Workspace, timeout: Option<Duration>, poll_interval: Duration) -> Result<WorkerPool> {
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(workspace.slots())
            .thread_name(|i| format!("slot-{}", i))
            .build()?;
        workspace.prepare()?;
        Ok(WorkerPool {
            thread_pool,
            workspace,
            timeout,
            poll_interval,
            display_colorful: false,
        })
    }

    pub fn from_param(param: &Param) -> Result<WorkerPool> {
        let cpus = available_cpus();
        if param.general.thread_number > cpus {
            warn!(
                "{} worker slots requested but only {} CPUs available",
                param.general.thread_number, cpus
            );
        }
        let workspace = Workspace::new(&param.data.tmp_dir, param.general.thread_number);
        let timeout = if param.ga.timeout > 0 {
            Some(Duration::from_secs(param.ga.timeout))
        } else {
            None
        };
        let mut pool = WorkerPool::new(workspace, timeout, Duration::from_millis(param.ga.poll_interval_ms))?;
        pool.display_colorful = param.general.display_colorful;
        Ok(pool)
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn slots(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    /// Evaluates a whole generation and returns one outcome per individual, in order.
    /// Returns only once every task has reported back.
    pub fn evaluate(&self, individuals: &[Individual], evaluator: &FitnessEvaluator) -> Vec<Evaluation> {
        let n = individuals.len();
        let tokens: Vec<CancelToken> = (0..n).map(|_| CancelToken::new()).collect();
        let mut outcomes: Vec<Option<Evaluation>> = vec![None; n];
        let (tx, rx) = mpsc::channel::<Event>();

        self.thread_pool.in_place_scope(|scope| {
            for (index, individual) in individuals.iter().enumerate() {
                let tx = tx.clone();
                let token = tokens[index].clone();
                let workspace = &self.workspace;
                scope.spawn(move |_| {
                    let slot = rayon::current_thread_index().unwrap_or(0);
                    let _ = tx.send(Event::Started {
                        index,
                        at: Instant::now(),
                    });
                    let results = if token.is_cancelled() {
                        None
                    } else {
                        evaluator.evaluate(&individual.mask, &workspace.slot_dir(slot), &token)
                    };
                    let _ = tx.send(Event::Finished { index, results });
                });
            }
            drop(tx);

            let mut started: Vec<Option<Instant>> = vec![None; n];
            let mut finished = 0;
            while finished < n {
                match rx.recv_timeout(self.poll_interval) {
                    Ok(Event::Started { index, at }) => started[index] = Some(at),
                    Ok(Event::Finished { index, results }) => {
                        started[index] = None;
                        finished += 1;
                        let evaluation = Evaluation::settle(&individuals[index], results);
                        self.display_progress(finished, n, &individuals[index], &evaluation);
                        outcomes[index] = Some(evaluation);
                    }
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }

                if let Some(timeout) = self.timeout {
                    for (index, at) in started.iter().enumerate() {
                        if let Some(at) = at {
                            if at.elapsed() > timeout && !tokens[index].is_cancelled() {
                                debug!("Individual {} exceeded {:?}: cancelling", index, timeout);
                                tokens[index].cancel();
                            }
                        }
                    }
                }
            }
        });

        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| {
                    warn!("Individual {} never reported back", index);
                    Evaluation::settle(&individuals[index], None)
                })
            })
            .collect()
    }

    fn display_progress(&self, done: usize, n: usize, individual: &Individual, evaluation: &Evaluation) {
        let settled = individual.clone().settle(evaluation.clone());
        let line = format!("  {}/{} {} {}%", done, n, fmt_float(settled.fit()), fmt_float(settled.selected_pct()));
        match evaluation {
            Evaluation::Fresh(_) => cinfo!(self.display_colorful, "{}", line),
            Evaluation::Retained(_) => cinfo!(
                self.display_colorful,
                "{} \x1b[33m[Aborted because of timeout. Keeping]\x1b[0m",
                line
            ),
            Evaluation::Discarded => cinfo!(
                self.display_colorful,
                "{} \x1b[31m[Aborted because of timeout. not Keeping]\x1b[0m",
                line
            ),
        }
    }

    /// Runs `f(slot, item)` over every item on the pool threads, preserving item order
    pub fn map_slots<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> R + Sync + Send,
    {
        self.thread_pool.install(|| {
            items
                .par_iter()
                .map(|item| f(rayon::current_thread_index().unwrap_or(0), item))
                .collect()
        })
    }
}
