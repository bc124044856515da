//! End-to-end prediction scenarios against the lexicon-prior baseline

mod common;

use common::*;
use proptest::prelude::*;
use stance_classifiers::prelude::*;
use stance_classifiers::{extract, FEATURE_DIM};
use stance_core::{DependencyArc, DependencyParse, Error, Sentence, StanceLabel};
use std::sync::Arc;

const ARCHITECTURES: [FusionArchitecture; 2] = [
    FusionArchitecture::ConcatDense,
    FusionArchitecture::GatedAttention,
];

async fn label_of(text: &str, architecture: FusionArchitecture) -> (StanceLabel, f64) {
    let engine = default_engine();
    let model = prior_model(architecture);
    let result = engine.predict(&model, text).await.unwrap();
    (result.label, result.confidence)
}

#[tokio::test]
async fn test_factual_numeric_sentence_is_claim() {
    for arch in ARCHITECTURES {
        let (label, confidence) = label_of("The GDP grew by 3%.", arch).await;
        assert_eq!(label, StanceLabel::Claim, "{arch}");
        assert!(confidence > 0.5, "{arch}: confidence {confidence}");
    }
}

#[tokio::test]
async fn test_evaluative_predicate_is_opinion() {
    for arch in ARCHITECTURES {
        let (label, _) = label_of("This policy is misguided.", arch).await;
        assert_eq!(label, StanceLabel::Opinion, "{arch}");
    }
}

#[tokio::test]
async fn test_hedged_attribution_is_speculative() {
    for arch in ARCHITECTURES {
        let (label, _) = label_of("Experts believe this may lead to instability.", arch).await;
        assert_eq!(label, StanceLabel::Speculative, "{arch}");
    }
}

#[tokio::test]
async fn test_unmarked_event_is_neutral() {
    for arch in ARCHITECTURES {
        let (label, _) = label_of("The meeting took place on Tuesday.", arch).await;
        assert_eq!(label, StanceLabel::Neutral, "{arch}");
    }
}

#[tokio::test]
async fn test_empty_input_is_rejected() {
    let engine = default_engine();
    let model = prior_model(FusionArchitecture::ConcatDense);
    let err = engine.predict(&model, "").await.unwrap_err();
    assert!(matches!(err, Error::Input(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_whitespace_is_normalised() {
    let engine = default_engine();
    let model = prior_model(FusionArchitecture::ConcatDense);
    let a = engine.predict(&model, "The GDP grew by 3%.").await.unwrap();
    let b = engine.predict(&model, "  The GDP\tgrew  by\n3%.  ").await.unwrap();
    assert_eq!(a.distribution, b.distribution);
}

#[tokio::test]
async fn test_fixture_parse_clears_degraded_flag() {
    // They said the plan will fail .
    let parse = DependencyParse::new(vec![
        DependencyArc::new(1, "nsubj"),
        DependencyArc::root(),
        DependencyArc::new(3, "det"),
        DependencyArc::new(5, "nsubj"),
        DependencyArc::new(5, "aux"),
        DependencyArc::new(1, "ccomp"),
        DependencyArc::new(1, "punct"),
    ]);
    let parser = FixtureParser::new().with_parse("They said the plan will fail .", parse);
    let engine = engine_with(
        Arc::new(parser),
        Arc::new(HashingEmbedder::new(EMBEDDING_DIM, 0).unwrap()),
    );
    let model = prior_model(FusionArchitecture::ConcatDense);

    let parsed = engine.predict(&model, "They said the plan will fail.").await.unwrap();
    assert!(!parsed.degraded);

    let unparsed = engine.predict(&model, "They said the plan would fail.").await.unwrap();
    assert!(unparsed.degraded);
}

#[test]
fn test_anonymous_attribution_from_parse() {
    let parser = RuleTokenizer::new().unwrap();
    let tokens = parser.tokenize("They said the plan will fail.").unwrap();
    let sentence = Sentence::new("They said the plan will fail.", tokens)
        .with_parse(DependencyParse::new(vec![
            DependencyArc::new(1, "nsubj"),
            DependencyArc::root(),
            DependencyArc::new(3, "det"),
            DependencyArc::new(5, "nsubj"),
            DependencyArc::new(5, "aux"),
            DependencyArc::new(1, "ccomp"),
            DependencyArc::new(1, "punct"),
        ]))
        .unwrap();

    let lexicon = Lexicon::builtin().unwrap();
    let features = extract(&lexicon, &sentence);
    assert_eq!(features.get(FeatureSlot::AttributionPattern), 1.0);
    assert_eq!(features.get(FeatureSlot::AnonymousSource), 1.0);
    assert_eq!(features.get(FeatureSlot::NamedSource), 0.0);
    assert_eq!(features.get(FeatureSlot::ParseUnavailable), 0.0);
    assert!((features.get(FeatureSlot::MaxClauseDepth) - 1.0 / 3.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_lexicon_hot_swap_changes_prediction() {
    let engine = default_engine();
    let model = prior_model(FusionArchitecture::ConcatDense);
    let text = "The committee approved the plan.";

    let before = engine.predict(&model, text).await.unwrap();
    assert_ne!(before.label, StanceLabel::Opinion);

    let swapped = Lexicon::from_yaml(&format!(
        r#"
version: "test-swap"
schema_version: "{FEATURE_SCHEMA_VERSION}"
entries:
  - {{ term: "approved", category: subjective, weight: 2.0 }}
"#
    ))
    .unwrap();
    let previous = engine.lexicons().swap(swapped).unwrap();
    assert_eq!(previous.version(), Lexicon::builtin().unwrap().version());

    let after = engine.predict(&model, text).await.unwrap();
    assert_eq!(after.label, StanceLabel::Opinion);
}

#[tokio::test]
async fn test_lexicon_for_other_schema_is_rejected() {
    let engine = default_engine();
    let other = Lexicon::from_yaml(
        r#"
version: "other"
schema_version: "stance-features/v2"
entries:
  - { term: "may", category: modal }
"#,
    )
    .unwrap();
    let err = engine.lexicons().swap(other).unwrap_err();
    assert!(matches!(err, Error::SchemaMismatch { .. }));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_distribution_is_normalised(text in "[A-Za-z0-9 ,.'%-]{1,120}") {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let engine = default_engine();
        let model = prior_model(FusionArchitecture::GatedAttention);

        match runtime.block_on(engine.predict(&model, &text)) {
            Ok(result) => {
                let probs = result.distribution.as_array();
                prop_assert_eq!(probs.len(), 4);
                prop_assert!(probs.iter().all(|p| *p >= 0.0));
                prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() <= 1e-6);
                prop_assert!((0.0..=1.0).contains(&result.confidence));
            }
            Err(e) => prop_assert!(matches!(e, Error::Input(_))),
        }
    }

    #[test]
    fn prop_features_have_fixed_length(text in "\\PC{0,80}") {
        let parser = RuleTokenizer::new().unwrap();
        let tokens = parser.tokenize(&text).unwrap();
        let sentence = Sentence::new(text.clone(), tokens);
        let features = extract(&Lexicon::builtin().unwrap(), &sentence);
        prop_assert_eq!(features.len(), FEATURE_DIM);
    }
}
