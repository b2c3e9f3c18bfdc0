//! Epoch loop with gradient accumulation, periodic validation, best-model
//! checkpointing and early stopping.

use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data::loader::DataLoader;
use crate::error::{Error, Result};
use crate::layers::dense::LayerGradient;
use crate::layout::RunLayout;
use crate::loss::loss_type::{argmax, LossType, Target};
use crate::network::metadata::ModelMetadata;
use crate::network::network::Network;
use crate::optim::optimizer::Optimizer;
use crate::train::checkpoint::{Checkpoint, Selection};
use crate::train::evaluate::test;
use crate::train::history::{HistoryLog, HistoryRow};

/// How training-set performance is measured at each epoch end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TrainingEvaluation {
    /// A full forward pass over the training set.
    #[value(name = "whole_set")]
    WholeSet,
    /// Running figures of the batches seen during the epoch.
    #[value(name = "n_batches")]
    NBatches,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    pub epochs: usize,
    /// Minibatches whose gradients are summed before one optimizer step.
    pub accumulation_steps: usize,
    /// Minibatches between two mid-epoch validations; 0 or 1 validates at
    /// epoch ends only.
    pub evaluation_steps: usize,
    /// Consecutive non-improving validations tolerated; 0 disables early
    /// stopping.
    pub patience: usize,
    pub tolerance: f64,
    pub training_evaluation: TrainingEvaluation,
}

impl TrainOptions {
    /// Rejects inconsistent step settings before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.accumulation_steps == 0 {
            return Err(Error::Config("accumulation_steps must be at least 1".into()));
        }
        if self.evaluation_steps != 1 && self.evaluation_steps % self.accumulation_steps != 0 {
            return Err(Error::EvaluationSteps {
                evaluation_steps: self.evaluation_steps,
                accumulation_steps: self.accumulation_steps,
            });
        }
        Ok(())
    }

    fn evaluates_mid_epoch(&self) -> bool {
        self.evaluation_steps > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    EarlyStopped,
    Completed,
}

/// Stops after `patience` consecutive checks that fail to beat the best loss
/// by more than `tolerance`.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    tolerance: f64,
    best: f64,
    bad_checks: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, tolerance: f64) -> EarlyStopping {
        EarlyStopping { patience, tolerance, best: f64::INFINITY, bad_checks: 0 }
    }

    /// Records one validation loss; true means training must halt now. A NaN
    /// loss halts even when patience is 0.
    pub fn step(&mut self, loss: f64) -> bool {
        if loss.is_nan() {
            return true;
        }
        if self.patience == 0 {
            return false;
        }
        if loss < self.best - self.tolerance {
            self.best = loss;
            self.bad_checks = 0;
        } else {
            self.bad_checks += 1;
        }
        self.bad_checks >= self.patience
    }

    pub fn bad_checks(&self) -> usize {
        self.bad_checks
    }
}

/// Which selections improved at a validation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Improvements {
    pub loss: bool,
    pub accuracy: bool,
}

/// Best validation loss and accuracy seen so far, tracked independently.
#[derive(Debug, Clone)]
pub struct BestTracker {
    pub loss: f64,
    pub accuracy: f64,
}

impl Default for BestTracker {
    fn default() -> Self {
        BestTracker { loss: f64::INFINITY, accuracy: f64::NEG_INFINITY }
    }
}

impl BestTracker {
    /// Strict improvements only: equal values keep the older checkpoint.
    pub fn update(&mut self, loss: f64, accuracy: f64) -> Improvements {
        let improvements = Improvements { loss: loss < self.loss, accuracy: accuracy > self.accuracy };
        if improvements.loss {
            self.loss = loss;
        }
        if improvements.accuracy {
            self.accuracy = accuracy;
        }
        improvements
    }
}

/// State machine over validation points.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    early: EarlyStopping,
    best: BestTracker,
    state: RunState,
}

impl Orchestrator {
    pub fn new(options: &TrainOptions) -> Orchestrator {
        Orchestrator {
            early: EarlyStopping::new(options.patience, options.tolerance),
            best: BestTracker::default(),
            state: RunState::Running,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn best(&self) -> &BestTracker {
        &self.best
    }

    pub fn observe(&mut self, loss: f64, accuracy: f64) -> Improvements {
        let improvements = self.best.update(loss, accuracy);
        if self.state == RunState::Running && self.early.step(loss) {
            self.state = RunState::EarlyStopped;
        }
        improvements
    }

    pub fn finish(&mut self) {
        if self.state == RunState::Running {
            self.state = RunState::Completed;
        }
    }
}

/// Receives the weights of every improving validation point.
pub trait CheckpointSink {
    fn save(&mut self, selection: Selection, epoch: usize, value: f64, network: &Network) -> Result<()>;
}

/// Writes checkpoints under a run's `best_model_dir`.
pub struct DirectorySink {
    layout: RunLayout,
    metadata: ModelMetadata,
}

impl DirectorySink {
    pub fn new(layout: RunLayout, metadata: ModelMetadata) -> DirectorySink {
        DirectorySink { layout, metadata }
    }
}

impl CheckpointSink for DirectorySink {
    fn save(&mut self, selection: Selection, epoch: usize, value: f64, network: &Network) -> Result<()> {
        let checkpoint = Checkpoint {
            epoch,
            selection: Some(selection),
            value,
            metadata: self.metadata.clone(),
            network: network.clone(),
        };
        let path = checkpoint.save(self.layout.best_model_dir(selection))?;
        debug!("saved {} checkpoint to {}", selection.as_str(), path.display());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub state: RunState,
    pub epochs_run: usize,
    pub best_loss: f64,
    pub best_loss_epoch: Option<usize>,
    pub best_accuracy: f64,
    pub best_accuracy_epoch: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Running {
    loss: f64,
    correct: usize,
    seen: usize,
}

impl Running {
    fn loss(&self) -> f64 {
        if self.seen == 0 { 0.0 } else { self.loss / self.seen as f64 }
    }

    fn accuracy(&self) -> f64 {
        if self.seen == 0 { 0.0 } else { self.correct as f64 / self.seen as f64 }
    }
}

/// Drives one classifier through its epochs.
pub struct Trainer<'a> {
    options: &'a TrainOptions,
    sink: &'a mut dyn CheckpointSink,
    history: Option<HistoryLog>,
    best_loss_epoch: Option<usize>,
    best_accuracy_epoch: Option<usize>,
}

impl<'a> Trainer<'a> {
    pub fn new(options: &'a TrainOptions, sink: &'a mut dyn CheckpointSink) -> Trainer<'a> {
        Trainer { options, sink, history: None, best_loss_epoch: None, best_accuracy_epoch: None }
    }

    pub fn with_history(mut self, history: HistoryLog) -> Trainer<'a> {
        self.history = Some(history);
        self
    }

    pub fn run<R: Rng + ?Sized>(
        &mut self,
        network: &mut Network,
        optimizer: &mut Optimizer,
        train_loader: &DataLoader<'_>,
        valid_loader: &DataLoader<'_>,
        rng: &mut R,
    ) -> Result<TrainOutcome> {
        self.options.validate()?;
        let mut orchestrator = Orchestrator::new(self.options);
        let mut iteration = 0;
        let mut epochs_run = 0;

        'epochs: for epoch in 0..self.options.epochs {
            let plan = train_loader.epoch_plan(rng);
            if plan.is_empty() {
                return Err(Error::Config(format!(
                    "the training set holds fewer samples than one batch of {}",
                    train_loader.batch_size()
                )));
            }
            epochs_run = epoch + 1;

            let mut accumulated = network.zero_gradients();
            let mut accumulated_samples = 0;
            let mut accumulated_batches = 0;
            let mut running = Running::default();
            let mut validated_last_batch = false;

            for (i, indices) in plan.iter().enumerate() {
                let batch = train_loader.load(indices)?;
                for sample in &batch {
                    let output = network.forward(sample.input.clone());
                    let target = Target::Class(sample.label);
                    running.loss += LossType::CrossEntropy.loss(&output, target);
                    running.correct += (argmax(&output) == sample.label) as usize;
                    running.seen += 1;
                    let grads = network.backward(LossType::CrossEntropy.derivative(&output, target));
                    for (acc, grad) in accumulated.iter_mut().zip(&grads) {
                        acc.add_assign(grad);
                    }
                }
                accumulated_samples += batch.len();
                accumulated_batches += 1;
                iteration += 1;

                if accumulated_batches == self.options.accumulation_steps {
                    apply_accumulated(network, optimizer, &mut accumulated, accumulated_samples);
                    accumulated_samples = 0;
                    accumulated_batches = 0;
                }

                if self.options.evaluates_mid_epoch() && (i + 1) % self.options.evaluation_steps == 0 {
                    self.validation_point(
                        &mut orchestrator,
                        network,
                        valid_loader,
                        epoch,
                        iteration,
                        (running.loss(), running.accuracy()),
                    )?;
                    validated_last_batch = i + 1 == plan.len();
                    if orchestrator.state() == RunState::EarlyStopped {
                        break 'epochs;
                    }
                }
            }

            if accumulated_batches > 0 {
                apply_accumulated(network, optimizer, &mut accumulated, accumulated_samples);
            }

            if !validated_last_batch {
                let train_metrics = match self.options.training_evaluation {
                    TrainingEvaluation::WholeSet => {
                        let report = test(network, train_loader)?;
                        (report.loss, report.accuracy)
                    }
                    TrainingEvaluation::NBatches => (running.loss(), running.accuracy()),
                };
                self.validation_point(&mut orchestrator, network, valid_loader, epoch, iteration, train_metrics)?;
                if orchestrator.state() == RunState::EarlyStopped {
                    break 'epochs;
                }
            }
        }

        orchestrator.finish();
        if orchestrator.state() == RunState::EarlyStopped {
            info!(
                "early stopping after epoch {}: no improvement larger than {} for {} validations",
                epochs_run, self.options.tolerance, self.options.patience
            );
        }

        Ok(TrainOutcome {
            state: orchestrator.state(),
            epochs_run,
            best_loss: orchestrator.best().loss,
            best_loss_epoch: self.best_loss_epoch,
            best_accuracy: orchestrator.best().accuracy,
            best_accuracy_epoch: self.best_accuracy_epoch,
        })
    }

    fn validation_point(
        &mut self,
        orchestrator: &mut Orchestrator,
        network: &Network,
        valid_loader: &DataLoader<'_>,
        epoch: usize,
        iteration: usize,
        (train_loss, train_accuracy): (f64, f64),
    ) -> Result<()> {
        let valid = test(network, valid_loader)?;
        info!(
            "epoch {} iteration {}: train loss {:.4} acc {:.2}% | valid loss {:.4} acc {:.2}% balanced {:.2}%",
            epoch,
            iteration,
            train_loss,
            train_accuracy * 100.0,
            valid.loss,
            valid.accuracy * 100.0,
            valid.balanced_accuracy * 100.0
        );

        if let Some(history) = self.history.as_mut() {
            history.append(&HistoryRow {
                epoch,
                iteration,
                train_loss,
                train_accuracy,
                valid_loss: valid.loss,
                valid_accuracy: valid.accuracy,
                valid_balanced_accuracy: valid.balanced_accuracy,
            })?;
        }

        let improvements = orchestrator.observe(valid.loss, valid.balanced_accuracy);
        if improvements.loss {
            self.sink.save(Selection::BestLoss, epoch, valid.loss, network)?;
            self.best_loss_epoch = Some(epoch);
        }
        if improvements.accuracy {
            self.sink.save(Selection::BestAcc, epoch, valid.balanced_accuracy, network)?;
            self.best_accuracy_epoch = Some(epoch);
        }
        Ok(())
    }
}

/// One optimizer step with the accumulator averaged over its samples, then
/// a reset.
pub(crate) fn apply_accumulated(
    network: &mut Network,
    optimizer: &mut Optimizer,
    accumulated: &mut Vec<LayerGradient>,
    samples: usize,
) {
    let scale = 1.0 / samples.max(1) as f64;
    let averaged: Vec<LayerGradient> = accumulated.iter().map(|g| g.scale(scale)).collect();
    optimizer.step(network, &averaged);
    *accumulated = network.zero_gradients();
}
