//! Latency benchmarks for feature extraction and prediction
//!
//! Run with: cargo bench -p stance-classifiers

use candle_core::Device;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use futures::StreamExt;
use std::sync::Arc;
use tokio::runtime::Runtime;

use stance_classifiers::prelude::*;
use stance_classifiers::{analyze, extract};

const SENTENCES: [(&str, &str); 4] = [
    ("claim", "The GDP grew by 3% in the second quarter, the statistics office said."),
    ("opinion", "This policy is misguided and frankly dangerous for the economy."),
    ("speculative", "Experts believe this may lead to instability if rates keep rising."),
    ("neutral", "The meeting took place on Tuesday in the capital."),
];

fn engine_and_model(architecture: FusionArchitecture) -> (InferenceEngine, Arc<Model>) {
    let lexicon = Lexicon::builtin().unwrap();
    let artifact =
        ModelArtifact::lexicon_prior("bench", 64, FusionSpec::new(architecture, 32), &lexicon)
            .unwrap();
    let model = Arc::new(Model::from_artifact(artifact, &Device::Cpu).unwrap());
    let engine = InferenceEngine::new(
        Arc::new(RuleTokenizer::new().unwrap()),
        Arc::new(HashingEmbedder::new(64, 0).unwrap()),
        Arc::new(LexiconStore::new(FEATURE_SCHEMA_VERSION, lexicon).unwrap()),
    );
    (engine, model)
}

/// Tokenization plus lexicon feature extraction, no model
fn benchmark_feature_extraction(c: &mut Criterion) {
    let parser = RuleTokenizer::new().unwrap();
    let lexicon = Lexicon::builtin().unwrap();

    let mut group = c.benchmark_group("Feature_Extraction");
    for (name, text) in SENTENCES {
        group.bench_with_input(BenchmarkId::new("extract", name), &text, |b, text| {
            b.iter(|| {
                let (sentence, _) = analyze(&parser, black_box(text)).unwrap();
                extract(&lexicon, &sentence)
            });
        });
    }
    group.finish();
}

/// Single-sentence prediction per fusion architecture
fn benchmark_predict(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("Predict");
    for architecture in [FusionArchitecture::ConcatDense, FusionArchitecture::GatedAttention] {
        let (engine, model) = engine_and_model(architecture);
        for (name, text) in SENTENCES {
            let id = BenchmarkId::new(architecture.as_str(), name);
            group.bench_with_input(id, &text, |b, text| {
                b.iter(|| rt.block_on(async { engine.predict(&model, black_box(text)).await.unwrap() }));
            });
        }
    }
    group.finish();
}

/// Batch prediction throughput
fn benchmark_predict_batch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, model) = engine_and_model(FusionArchitecture::ConcatDense);

    let mut group = c.benchmark_group("Predict_Batch");
    group.sample_size(20);
    for size in [16usize, 128] {
        let texts: Vec<String> = SENTENCES
            .iter()
            .cycle()
            .take(size)
            .map(|(_, t)| t.to_string())
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(size), &texts, |b, texts| {
            b.iter(|| {
                rt.block_on(async {
                    engine
                        .predict_batch(model.clone(), texts.clone(), None)
                        .count()
                        .await
                })
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_feature_extraction,
    benchmark_predict,
    benchmark_predict_batch
);
criterion_main!(benches);
