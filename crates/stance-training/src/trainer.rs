//! Training orchestrator
//!
//! A run unifies the configured corpora, featurises the examples, fits the
//! fusion head with AdamW on a blocking worker, and publishes a checkpoint on
//! every validation improvement. The best parameters are optionally
//! temperature-calibrated, written as the final model artifact, and evaluated
//! in-domain and on every held-out corpus.
//!
//! Given the same seed, data and hyperparameters a run reproduces the same
//! parameters: the split, the initial weights and every epoch's shuffle are
//! drawn from separate ChaCha streams derived from the seed.

use crate::config::{InitMode, TrainingConfig};
use crate::data::{partition, FeaturizedExample, FeaturizedSet, Featurizer};
use crate::evaluation::{evaluate_model, EpochRecord, TrainingReport};
use crate::lock::ArtifactLock;
use candle_core::{Device, Tensor, Var};
use candle_nn::{loss, AdamW, Optimizer, ParamsAdamW};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use stance_classifiers::fusion::{init_parameters, jitter, lexicon_prior_parameters};
use stance_classifiers::{
    FusionHead, FusionSpec, Lexicon, Model, ModelArtifact, ParameterTensor, Parameters, Provenance,
};
use stance_core::{ClassDistribution, Error, Result, StanceLabel};
use stance_telemetry::AuditLog;
use stance_unify::LabelUnifier;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};
use uuid::Uuid;

const INIT_STREAM: u64 = 0x1;
const SHUFFLE_STREAM: u64 = 0x2;

/// Gate bias for a lexicon-prior warm start; open enough for gradients to
/// reach the embedding path
const WARM_START_GATE_BIAS: f32 = -4.0;

/// Candidate temperatures for calibration, 0.25 to 5.0 in steps of 0.05
fn temperature_grid() -> impl Iterator<Item = f64> {
    (5..=100).map(|i| f64::from(i) * 0.05)
}

fn tensor_err(context: &'static str) -> impl FnOnce(candle_core::Error) -> Error {
    move |e| Error::model(format!("{context}: {e}"))
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub artifact: ModelArtifact,
    pub report: TrainingReport,
}

/// Runs training jobs described by a [`TrainingConfig`]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Run the whole job. Holds the model path's lock until it returns.
    pub async fn run(&self) -> Result<TrainingOutcome> {
        let config = &self.config;
        let _lock = ArtifactLock::acquire(&config.output.model)?;
        let run_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        info!(run_id = %run_id, run = %config.run_name, "Starting training run");

        let table = Arc::new(config.load_mapping()?);
        let unified = LabelUnifier::new(table).unify_corpora(&config.corpora)?;
        if let Some(path) = &config.output.audit_log {
            unified.write_audit(&AuditLog::new(path), &run_id)?;
        }

        let lexicon = Arc::new(match &config.lexicon {
            Some(path) => Lexicon::load(path)?,
            None => Lexicon::builtin()?,
        });
        let device = config.device.create()?;
        let featurizer = Featurizer::new(
            config.parser.build()?,
            lexicon.clone(),
            config.embedding.build(&device)?,
            config.workers,
        );
        let embedding_dim = featurizer.embedding_dim();

        let split = partition(
            unified.trainable().cloned(),
            &config.held_out,
            config.validation_ratio,
            config.seed,
        );
        let train = Arc::new(featurizer.featurize(split.train).await);
        let validation = Arc::new(featurizer.featurize(split.validation).await);
        let held_out = featurizer.featurize(split.held_out).await;
        if train.is_empty() {
            return Err(Error::config("no trainable examples left after featurisation"));
        }
        info!(
            train = train.len(),
            validation = validation.len(),
            held_out = held_out.len(),
            "Prepared datasets"
        );

        let provenance = Provenance {
            run_id: run_id.clone(),
            corpora: config
                .corpora
                .iter()
                .map(|c| c.id.clone())
                .filter(|id| !config.is_held_out(id))
                .collect(),
            held_out_corpora: config.held_out.clone(),
            mapping_version: unified.mapping_version.clone(),
            mapping_fingerprint: unified.mapping_fingerprint.clone(),
            lexicon_version: lexicon.version().to_string(),
            lexicon_fingerprint: lexicon.fingerprint().to_string(),
            seed: config.seed,
            epochs_run: 0,
            best_val_loss: None,
            created_at: unix_now(),
        };

        let job = FitJob {
            settings: FitSettings::from_config(config),
            fusion: config.fusion,
            embedding_dim,
            initial: self.initial_parameters(embedding_dim)?,
            train: train.clone(),
            validation: validation.clone(),
            device: device.clone(),
            checkpoint: CheckpointWriter {
                path: config.output.checkpoint.clone(),
                model_version: config.model_version.clone(),
                provenance: provenance.clone(),
            },
        };
        let fit = tokio::task::spawn_blocking(move || job.run())
            .await
            .map_err(|e| Error::internal(format!("training task failed: {e}")))??;

        let temperature = if config.calibrate_temperature {
            let calibration = if validation.is_empty() { &train } else { &validation };
            let temperature = calibrate(
                &config.fusion,
                embedding_dim,
                &fit.parameters,
                &calibration.examples,
                &device,
            )?;
            info!(temperature, "Calibrated temperature");
            temperature
        } else {
            1.0
        };

        let monitored_validation = !validation.is_empty();
        let mut final_provenance = provenance;
        final_provenance.epochs_run = fit.history.len();
        final_provenance.best_val_loss = monitored_validation.then_some(fit.best_loss);
        final_provenance.created_at = unix_now();

        let artifact = ModelArtifact::new(
            &config.model_version,
            embedding_dim,
            config.fusion,
            fit.parameters.clone(),
            final_provenance,
        )?
        .with_temperature(temperature)?;
        artifact.save(&config.output.model)?;

        let model = Model::from_artifact(artifact.clone(), &device)?;
        let mut in_domain = BTreeMap::new();
        let mut cross_domain = BTreeMap::new();
        for corpus in &config.corpora {
            let id = corpus.id.as_str();
            let (source, target) = if config.is_held_out(id) {
                (&held_out, &mut cross_domain)
            } else {
                (validation.as_ref(), &mut in_domain)
            };
            if source.from_corpus(id).next().is_none() {
                continue;
            }
            let metrics = evaluate_model(&model, source.from_corpus(id))?;
            info!(
                corpus = id,
                held_out = config.is_held_out(id),
                accuracy = metrics.accuracy,
                macro_f1 = metrics.macro_f1,
                "Evaluated corpus"
            );
            target.insert(id.to_string(), metrics);
        }
        let in_domain_overall = if validation.is_empty() {
            None
        } else {
            Some(evaluate_model(&model, &validation.examples)?)
        };

        let report = TrainingReport {
            run_id,
            run_name: config.run_name.clone(),
            model_version: config.model_version.clone(),
            mapping_version: unified.mapping_version.clone(),
            mapping_fingerprint: unified.mapping_fingerprint.clone(),
            lexicon_version: lexicon.version().to_string(),
            fusion: config.fusion,
            seed: config.seed,
            train_examples: train.len(),
            validation_examples: validation.len(),
            held_out_examples: held_out.len(),
            skipped_examples: train.skipped + validation.skipped + held_out.skipped,
            epochs_run: fit.history.len(),
            best_epoch: fit.best_epoch,
            monitored_loss: if monitored_validation { "validation" } else { "training" }
                .to_string(),
            best_loss: fit.best_loss,
            stopped_early: fit.stopped_early,
            temperature,
            history: fit.history,
            in_domain,
            in_domain_overall,
            cross_domain,
            unification: unified.stats.clone(),
        };
        report.save(&config.output.report)?;

        info!(
            run_id = %report.run_id,
            epochs = report.epochs_run,
            best_epoch = report.best_epoch,
            best_loss = report.best_loss,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Training run complete"
        );
        Ok(TrainingOutcome { artifact, report })
    }

    fn initial_parameters(&self, embedding_dim: usize) -> Result<Parameters> {
        let config = &self.config;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(INIT_STREAM));
        match config.init {
            InitMode::Random => Ok(init_parameters(&config.fusion, embedding_dim, &mut rng)),
            InitMode::LexiconPrior => {
                let mut params =
                    lexicon_prior_parameters(&config.fusion, embedding_dim, WARM_START_GATE_BIAS)?;
                jitter(&mut params, config.init_jitter, &mut rng);
                Ok(params)
            }
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy)]
struct FitSettings {
    learning_rate: f64,
    weight_decay: f64,
    epochs: usize,
    batch_size: usize,
    patience: usize,
    min_delta: f64,
    seed: u64,
}

impl FitSettings {
    fn from_config(config: &TrainingConfig) -> Self {
        Self {
            learning_rate: config.learning_rate,
            weight_decay: config.weight_decay,
            epochs: config.epochs,
            batch_size: config.batch_size,
            patience: config.patience,
            min_delta: config.min_delta,
            seed: config.seed,
        }
    }
}

/// Publishes best-so-far parameters as a loadable artifact
struct CheckpointWriter {
    path: PathBuf,
    model_version: String,
    provenance: Provenance,
}

impl CheckpointWriter {
    fn write(
        &self,
        fusion: FusionSpec,
        embedding_dim: usize,
        parameters: &Parameters,
        epoch: usize,
        loss: f64,
    ) -> Result<()> {
        let mut provenance = self.provenance.clone();
        provenance.epochs_run = epoch;
        provenance.best_val_loss = Some(loss);
        provenance.created_at = unix_now();
        ModelArtifact::new(
            &self.model_version,
            embedding_dim,
            fusion,
            parameters.clone(),
            provenance,
        )?
        .save(&self.path)
    }
}

struct FitJob {
    settings: FitSettings,
    fusion: FusionSpec,
    embedding_dim: usize,
    initial: Parameters,
    train: Arc<FeaturizedSet>,
    validation: Arc<FeaturizedSet>,
    device: Device,
    checkpoint: CheckpointWriter,
}

struct Fit {
    parameters: Parameters,
    history: Vec<EpochRecord>,
    best_epoch: usize,
    best_loss: f64,
    stopped_early: bool,
}

impl FitJob {
    /// The optimisation loop. Blocking.
    fn run(self) -> Result<Fit> {
        let settings = self.settings;
        let mut vars = BTreeMap::new();
        for (name, param) in &self.initial {
            let var = Var::from_tensor(&param.to_tensor(&self.device)?)
                .map_err(tensor_err("failed to create trainable variable"))?;
            vars.insert(name.clone(), var);
        }
        let tensors: BTreeMap<String, Tensor> = vars
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        let head = FusionHead::from_tensors(&self.fusion, self.embedding_dim, &tensors)?;

        let mut optimizer = AdamW::new(
            vars.values().cloned().collect(),
            ParamsAdamW {
                lr: settings.learning_rate,
                weight_decay: settings.weight_decay,
                ..Default::default()
            },
        )
        .map_err(tensor_err("failed to create optimiser"))?;

        let validation: Vec<&FeaturizedExample> = self.validation.examples.iter().collect();
        let validation_batch = if validation.is_empty() {
            None
        } else {
            Some(batch_tensors(&validation, self.embedding_dim, &self.device)?)
        };

        let mut order: Vec<usize> = (0..self.train.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(settings.seed.wrapping_add(SHUFFLE_STREAM));
        let mut history = Vec::new();
        let mut best = self.initial.clone();
        let mut best_loss = f64::INFINITY;
        let mut best_epoch = 0;
        let mut stale = 0;
        let mut stopped_early = false;

        for epoch in 1..=settings.epochs {
            order.shuffle(&mut rng);

            let mut total = 0.0;
            for chunk in order.chunks(settings.batch_size) {
                let rows: Vec<&FeaturizedExample> =
                    chunk.iter().map(|&i| &self.train.examples[i]).collect();
                let batch = batch_tensors(&rows, self.embedding_dim, &self.device)?;
                let batch_loss = batch_loss(&head, &batch)?;
                let value = scalar(&batch_loss)?;
                if !value.is_finite() {
                    warn!(epoch, loss = value, "Training loss diverged");
                    return Err(Error::TrainingDivergence { epoch, loss: value });
                }
                optimizer
                    .backward_step(&batch_loss)
                    .map_err(tensor_err("optimiser step failed"))?;
                total += value * rows.len() as f64;
            }
            let train_loss = total / self.train.len() as f64;

            let validation_loss = match &validation_batch {
                Some(batch) => {
                    let value = scalar(&batch_loss(&head, batch)?)?;
                    if !value.is_finite() {
                        warn!(epoch, loss = value, "Validation loss diverged");
                        return Err(Error::TrainingDivergence { epoch, loss: value });
                    }
                    Some(value)
                }
                None => None,
            };

            let monitored = validation_loss.unwrap_or(train_loss);
            let improved = monitored < best_loss - settings.min_delta;
            if improved {
                best_loss = monitored;
                best_epoch = epoch;
                stale = 0;
                best = snapshot(&vars)?;
                self.checkpoint
                    .write(self.fusion, self.embedding_dim, &best, epoch, best_loss)?;
            } else {
                stale += 1;
            }

            info!(epoch, train_loss, validation_loss = ?validation_loss, improved, "Epoch complete");
            history.push(EpochRecord {
                epoch,
                train_loss,
                validation_loss,
                improved,
            });

            if stale >= settings.patience {
                info!(epoch, patience = settings.patience, "Early stopping");
                stopped_early = true;
                break;
            }
        }

        Ok(Fit {
            parameters: best,
            history,
            best_epoch,
            best_loss,
            stopped_early,
        })
    }
}

struct Batch {
    embeddings: Tensor,
    features: Tensor,
    targets: Tensor,
}

fn batch_tensors(rows: &[&FeaturizedExample], embedding_dim: usize, device: &Device) -> Result<Batch> {
    let n = rows.len();
    let feature_dim = rows.first().map(|r| r.features.len()).unwrap_or(0);
    let mut embeddings = Vec::with_capacity(n * embedding_dim);
    let mut features = Vec::with_capacity(n * feature_dim);
    let mut targets = Vec::with_capacity(n);
    for row in rows {
        embeddings.extend_from_slice(row.embedding.as_slice());
        features.extend_from_slice(row.features.as_slice());
        targets.push(row.label.index() as u32);
    }

    Ok(Batch {
        embeddings: Tensor::from_vec(embeddings, (n, embedding_dim), device)
            .map_err(tensor_err("failed to build embedding batch"))?,
        features: Tensor::from_vec(features, (n, feature_dim), device)
            .map_err(tensor_err("failed to build feature batch"))?,
        targets: Tensor::from_vec(targets, n, device)
            .map_err(tensor_err("failed to build target batch"))?,
    })
}

/// Mean cross-entropy of the head's logits against the batch targets
fn batch_loss(head: &FusionHead, batch: &Batch) -> Result<Tensor> {
    head.forward(&batch.embeddings, &batch.features)
        .and_then(|logits| loss::cross_entropy(&logits, &batch.targets))
        .map_err(tensor_err("loss computation failed"))
}

fn scalar(tensor: &Tensor) -> Result<f64> {
    tensor
        .to_scalar::<f32>()
        .map(f64::from)
        .map_err(tensor_err("failed to read loss"))
}

fn snapshot(vars: &BTreeMap<String, Var>) -> Result<Parameters> {
    vars.iter()
        .map(|(name, var)| -> Result<(String, ParameterTensor)> {
            Ok((name.clone(), ParameterTensor::from_tensor(var.as_tensor())?))
        })
        .collect()
}

/// Temperature minimising mean NLL of `examples` under `parameters`
fn calibrate(
    fusion: &FusionSpec,
    embedding_dim: usize,
    parameters: &Parameters,
    examples: &[FeaturizedExample],
    device: &Device,
) -> Result<f64> {
    if examples.is_empty() {
        return Ok(1.0);
    }
    let head = FusionHead::from_parameters(fusion, embedding_dim, parameters, device)?;
    let rows: Vec<&FeaturizedExample> = examples.iter().collect();
    let batch = batch_tensors(&rows, embedding_dim, device)?;
    let logits = head
        .forward(&batch.embeddings, &batch.features)
        .and_then(|t| t.to_vec2::<f32>())
        .map_err(tensor_err("calibration forward pass failed"))?;

    let logits: Vec<[f64; 4]> = logits
        .iter()
        .map(|row| {
            let mut out = [0.0; 4];
            for (o, l) in out.iter_mut().zip(row) {
                *o = f64::from(*l);
            }
            out
        })
        .collect();
    let labels: Vec<StanceLabel> = examples.iter().map(|e| e.label).collect();
    fit_temperature(&logits, &labels)
}

/// Grid search for the temperature with the lowest mean NLL; ties keep the
/// smaller temperature
pub fn fit_temperature(logits: &[[f64; 4]], labels: &[StanceLabel]) -> Result<f64> {
    if logits.len() != labels.len() {
        return Err(Error::internal("logit and label counts differ"));
    }
    if logits.is_empty() {
        return Ok(1.0);
    }

    let mut best = (1.0, f64::INFINITY);
    for temperature in temperature_grid() {
        let mut nll = 0.0;
        for (row, label) in logits.iter().zip(labels) {
            nll += ClassDistribution::from_logits(row, temperature)?.nll(*label);
        }
        let nll = nll / logits.len() as f64;
        if nll < best.1 {
            best = (temperature, nll);
        }
    }
    Ok(best.0)
}
