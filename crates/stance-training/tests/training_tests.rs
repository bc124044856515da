//! End-to-end training runs over small corpora written to a tempdir

use serde_json::json;
use stance_classifiers::{
    DeviceSpec, EmbeddingSpec, FusionArchitecture, FusionSpec, ModelArtifact, ParserSpec,
};
use stance_core::{Error, StanceLabel};
use stance_training::prelude::*;
use stance_training::{lock_path, OutputPaths};
use stance_unify::CorpusSpec;
use std::fs;
use std::path::Path;

const MAPPING: &str = r#"
version: news-map-1
trust_ranking: [wire, opeds, blogs]
corpora:
  wire:
    labels:
      fact: claim
      report: neutral
      hedged: speculative
  opeds:
    labels:
      subjective: opinion
      hedged: speculative
  blogs:
    labels:
      fact: claim
      subjective: opinion
"#;

fn write_corpus(path: &Path, records: &[(String, &str)]) {
    let lines: Vec<String> = records
        .iter()
        .map(|(text, label)| json!({ "text": text, "label": label }).to_string())
        .collect();
    fs::write(path, lines.join("\n")).unwrap();
}

fn claim(i: usize) -> String {
    format!("The index rose by {i}% in March.")
}

fn neutral(i: usize) -> String {
    format!("The committee met on day {i} of the session.")
}

fn opinion(i: usize) -> String {
    format!("Plan {i} is a terrible and misguided idea.")
}

fn speculative(i: usize) -> String {
    format!("Analysts believe rates may fall by {i} points.")
}

fn config(dir: &Path) -> TrainingConfig {
    let data = dir.join("data");
    fs::create_dir_all(&data).unwrap();

    let mut wire = Vec::new();
    for i in 0..8 {
        wire.push((claim(i), "fact"));
        wire.push((neutral(i), "report"));
    }
    for i in 0..4 {
        wire.push((speculative(i), "hedged"));
    }
    let mut opeds = Vec::new();
    for i in 0..8 {
        opeds.push((opinion(i), "subjective"));
    }
    for i in 4..8 {
        opeds.push((speculative(i), "hedged"));
    }
    let mut blogs = Vec::new();
    for i in 100..104 {
        blogs.push((claim(i), "fact"));
        blogs.push((opinion(i), "subjective"));
    }

    write_corpus(&data.join("wire.jsonl"), &wire);
    write_corpus(&data.join("opeds.jsonl"), &opeds);
    write_corpus(&data.join("blogs.jsonl"), &blogs);
    fs::write(dir.join("mapping.yaml"), MAPPING).unwrap();

    let out = dir.join("out");
    TrainingConfig {
        run_name: "test-run".to_string(),
        model_version: "test-1".to_string(),
        corpora: vec![
            CorpusSpec::new("wire", data.join("wire.jsonl")),
            CorpusSpec::new("opeds", data.join("opeds.jsonl")),
            CorpusSpec::new("blogs", data.join("blogs.jsonl")),
        ],
        mapping_path: dir.join("mapping.yaml"),
        mapping_version: "news-map-1".to_string(),
        held_out: vec!["blogs".to_string()],
        seed: 11,
        learning_rate: 0.01,
        weight_decay: 0.0,
        epochs: 4,
        batch_size: 8,
        patience: 2,
        min_delta: 0.0,
        validation_ratio: 0.25,
        init: InitMode::Random,
        init_jitter: 0.01,
        calibrate_temperature: true,
        fusion: FusionSpec::new(FusionArchitecture::ConcatDense, 32),
        embedding: EmbeddingSpec::Hashing {
            dimension: 16,
            seed: 5,
        },
        parser: ParserSpec::Rule,
        lexicon: None,
        workers: 2,
        device: DeviceSpec::Cpu,
        output: OutputPaths {
            model: out.join("model.bin"),
            checkpoint: out.join("checkpoint.bin"),
            report: out.join("report.json"),
            audit_log: Some(out.join("audit.jsonl")),
        },
    }
}

async fn train(config: TrainingConfig) -> stance_core::Result<TrainingOutcome> {
    Trainer::new(config)?.run().await
}

#[tokio::test]
async fn test_run_publishes_model_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let outcome = train(config.clone()).await.unwrap();

    let artifact = ModelArtifact::load(&config.output.model).unwrap();
    assert_eq!(artifact, outcome.artifact);
    assert_eq!(artifact.model_version, "test-1");
    assert_eq!(artifact.provenance.corpora, vec!["wire", "opeds"]);
    assert_eq!(artifact.provenance.held_out_corpora, vec!["blogs"]);
    assert_eq!(artifact.provenance.mapping_version, "news-map-1");
    assert_eq!(artifact.provenance.seed, 11);
    assert!(artifact.temperature > 0.0);

    let checkpoint = ModelArtifact::load(&config.output.checkpoint).unwrap();
    assert_eq!(checkpoint.provenance.run_id, outcome.report.run_id);

    assert!(!lock_path(&config.output.model).exists());
    assert!(config.output.audit_log.as_ref().unwrap().exists());

    let report = TrainingReport::load(&config.output.report).unwrap();
    assert_eq!(report.run_id, outcome.report.run_id);
    assert_eq!(report.history.len(), outcome.report.history.len());
    assert_eq!(report.unification.records, 40);
    assert_eq!(report.train_examples, 24);
    assert_eq!(report.validation_examples, 8);
    assert_eq!(report.held_out_examples, 8);
    assert_eq!(report.skipped_examples, 0);
    assert_eq!(report.monitored_loss, "validation");
    assert!(!report.history.is_empty() && report.history.len() <= 4);
    assert!(report.history[0].improved);

    let blogs = &report.cross_domain["blogs"];
    assert_eq!(blogs.examples, 8);
    assert_eq!(blogs.class(StanceLabel::Claim).unwrap().support, 4);
    assert_eq!(blogs.per_class.len(), 4);
    assert!(report.in_domain.contains_key("wire"));
    assert!(report.in_domain.contains_key("opeds"));
    assert!(!report.in_domain.contains_key("blogs"));
    assert_eq!(report.in_domain_overall.as_ref().unwrap().examples, 8);
}

#[tokio::test]
async fn test_same_seed_reproduces_parameters() {
    let a_dir = tempfile::tempdir().unwrap();
    let b_dir = tempfile::tempdir().unwrap();
    let a = train(config(a_dir.path())).await.unwrap();
    let b = train(config(b_dir.path())).await.unwrap();

    assert_eq!(a.artifact.parameters, b.artifact.parameters);
    assert_eq!(a.artifact.checksum, b.artifact.checksum);
    assert_eq!(a.artifact.temperature, b.artifact.temperature);
    assert_eq!(a.report.history, b.report.history);
    assert_ne!(a.report.run_id, b.report.run_id);
}

#[tokio::test]
async fn test_zero_learning_rate_stops_after_patience() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.learning_rate = 0.0;
    config.epochs = 10;
    config.patience = 2;

    let report = train(config).await.unwrap().report;
    assert_eq!(report.epochs_run, 3);
    assert!(report.stopped_early);
    assert_eq!(report.best_epoch, 1);
    assert!(report.history[0].improved);
    assert!(report.history[1..].iter().all(|e| !e.improved));
}

#[tokio::test]
async fn test_divergence_keeps_last_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let good = config(dir.path());
    train(good.clone()).await.unwrap();
    let before = fs::read(&good.output.checkpoint).unwrap();

    let mut diverging = good.clone();
    diverging.learning_rate = 1e300;
    diverging.output.model = dir.path().join("out").join("diverged.bin");
    diverging.output.report = dir.path().join("out").join("diverged.json");

    let err = train(diverging.clone()).await.unwrap_err();
    assert!(matches!(err, Error::TrainingDivergence { .. }), "{err}");

    assert_eq!(fs::read(&good.output.checkpoint).unwrap(), before);
    assert!(ModelArtifact::load(&good.output.checkpoint).is_ok());
    assert!(!diverging.output.model.exists());
    assert!(!diverging.output.report.exists());
    assert!(!lock_path(&diverging.output.model).exists());
}

#[tokio::test]
async fn test_locked_model_path_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let lock = lock_path(&config.output.model);
    fs::create_dir_all(lock.parent().unwrap()).unwrap();
    fs::write(&lock, "4242\n").unwrap();

    let err = train(config.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Artifact(_)), "{err}");
    assert!(lock.exists());
    assert!(!config.output.model.exists());
}

#[tokio::test]
async fn test_lexicon_prior_warm_start_with_gated_head() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.init = InitMode::LexiconPrior;
    config.fusion = FusionSpec::new(FusionArchitecture::GatedAttention, 32);
    config.epochs = 2;

    let outcome = train(config).await.unwrap();
    assert_eq!(
        outcome.artifact.fusion.architecture,
        FusionArchitecture::GatedAttention
    );
    assert!(outcome.artifact.validate().is_ok());
}

#[tokio::test]
async fn test_pinned_mapping_version_mismatch_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.mapping_version = "news-map-2".to_string();

    let err = train(config.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(!lock_path(&config.output.model).exists());
}
