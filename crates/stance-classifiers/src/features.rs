//! Linguistic feature extraction
//!
//! Turns a [`Sentence`] into a fixed-length [`FeatureVector`] whose slot order
//! is pinned by [`FEATURE_SCHEMA_VERSION`]. Extraction is a pure function of
//! the lexicon snapshot and the sentence; it never fails.

use crate::clauses::{analyze_parse, analyze_surface, ClauseAnalysis};
use crate::lexicon::{Lexicon, LexiconCategory, LexiconStore};
use serde::{Deserialize, Serialize};
use stance_core::{Error, Result, Sentence, Token};
use std::sync::Arc;

/// Identifier of the slot layout produced by [`extract`]
pub const FEATURE_SCHEMA_VERSION: &str = "stance-features/v1";

/// Number of slots in a feature vector
pub const FEATURE_DIM: usize = 24;

const TOKEN_COUNT_CAP: f32 = 60.0;
const CLAUSE_COUNT_CAP: f32 = 4.0;
const CLAUSE_DEPTH_CAP: f32 = 3.0;

const FIRST_PERSON: [&str; 10] = ["i", "me", "my", "mine", "myself", "we", "us", "our", "ours", "ourselves"];
const PERFECT_AUXILIARIES: [&str; 4] = ["has", "have", "had", "'ve"];
const QUOTE_CHARS: [char; 5] = ['"', '\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'];

/// Named feature slots, in schema order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSlot {
    TokenCount,
    ModalDensity,
    HedgePresent,
    HedgeDensity,
    EpistemicVerbPresent,
    CertaintyHighDensity,
    CertaintyLowDensity,
    SubjectivePresent,
    SubjectiveDensity,
    AttributionVerbPresent,
    AttributionPattern,
    NamedSource,
    AnonymousSource,
    NegationPresent,
    PastTense,
    FutureMarker,
    PerfectAspect,
    QuotationPresent,
    NumericPresent,
    FirstPerson,
    ClauseCount,
    MaxClauseDepth,
    ParseUnavailable,
    EmptyInput,
}

impl FeatureSlot {
    pub const ALL: [FeatureSlot; FEATURE_DIM] = [
        Self::TokenCount,
        Self::ModalDensity,
        Self::HedgePresent,
        Self::HedgeDensity,
        Self::EpistemicVerbPresent,
        Self::CertaintyHighDensity,
        Self::CertaintyLowDensity,
        Self::SubjectivePresent,
        Self::SubjectiveDensity,
        Self::AttributionVerbPresent,
        Self::AttributionPattern,
        Self::NamedSource,
        Self::AnonymousSource,
        Self::NegationPresent,
        Self::PastTense,
        Self::FutureMarker,
        Self::PerfectAspect,
        Self::QuotationPresent,
        Self::NumericPresent,
        Self::FirstPerson,
        Self::ClauseCount,
        Self::MaxClauseDepth,
        Self::ParseUnavailable,
        Self::EmptyInput,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TokenCount => "token_count",
            Self::ModalDensity => "modal_density",
            Self::HedgePresent => "hedge_present",
            Self::HedgeDensity => "hedge_density",
            Self::EpistemicVerbPresent => "epistemic_verb_present",
            Self::CertaintyHighDensity => "certainty_high_density",
            Self::CertaintyLowDensity => "certainty_low_density",
            Self::SubjectivePresent => "subjective_present",
            Self::SubjectiveDensity => "subjective_density",
            Self::AttributionVerbPresent => "attribution_verb_present",
            Self::AttributionPattern => "attribution_pattern",
            Self::NamedSource => "named_source",
            Self::AnonymousSource => "anonymous_source",
            Self::NegationPresent => "negation_present",
            Self::PastTense => "past_tense",
            Self::FutureMarker => "future_marker",
            Self::PerfectAspect => "perfect_aspect",
            Self::QuotationPresent => "quotation_present",
            Self::NumericPresent => "numeric_present",
            Self::FirstPerson => "first_person",
            Self::ClauseCount => "clause_count",
            Self::MaxClauseDepth => "max_clause_depth",
            Self::ParseUnavailable => "parse_unavailable",
            Self::EmptyInput => "empty_input",
        }
    }

    /// Slots derived from sentence structure, zero-filled for unsupported scripts
    pub fn is_structural(self) -> bool {
        matches!(
            self,
            Self::AttributionPattern
                | Self::NamedSource
                | Self::AnonymousSource
                | Self::ClauseCount
                | Self::MaxClauseDepth
        )
    }
}

/// Fixed-length feature vector tagged with its schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    schema_version: String,
    values: Vec<f32>,
}

impl FeatureVector {
    /// All-zero vector in the current schema
    pub fn zeros() -> Self {
        Self {
            schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            values: vec![0.0; FEATURE_DIM],
        }
    }

    /// Wrap raw values, checking them against a schema
    pub fn from_values(schema_version: impl Into<String>, values: Vec<f32>) -> Result<Self> {
        let schema_version = schema_version.into();
        if schema_version != FEATURE_SCHEMA_VERSION || values.len() != FEATURE_DIM {
            return Err(Error::schema_mismatch(
                "feature vector",
                format!("{FEATURE_SCHEMA_VERSION} ({FEATURE_DIM} slots)"),
                format!("{schema_version} ({} slots)", values.len()),
            ));
        }
        Ok(Self { schema_version, values })
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn get(&self, slot: FeatureSlot) -> f32 {
        self.values[slot.index()]
    }

    fn set(&mut self, slot: FeatureSlot, value: f32) {
        self.values[slot.index()] = value;
    }

    fn flag(&mut self, slot: FeatureSlot, on: bool) {
        self.set(slot, if on { 1.0 } else { 0.0 });
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// (slot name, value) pairs in schema order
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f32)> + '_ {
        FeatureSlot::ALL.iter().map(move |s| (s.name(), self.get(*s)))
    }
}

/// Extract the feature vector of a sentence under one lexicon snapshot
pub fn extract(lexicon: &Lexicon, sentence: &Sentence) -> FeatureVector {
    let tokens = sentence.tokens();
    let mut features = FeatureVector::zeros();

    let n = sentence.word_count();
    if n == 0 {
        features.flag(FeatureSlot::EmptyInput, true);
        return features;
    }
    let n_f = n as f32;

    let matches = lexicon.scan(tokens);
    let density = |category: LexiconCategory| matches.weight(category) as f32 / n_f;

    features.set(FeatureSlot::TokenCount, n_f.min(TOKEN_COUNT_CAP) / TOKEN_COUNT_CAP);
    features.set(FeatureSlot::ModalDensity, density(LexiconCategory::Modal));
    features.flag(FeatureSlot::HedgePresent, matches.any(LexiconCategory::Hedge));
    features.set(FeatureSlot::HedgeDensity, density(LexiconCategory::Hedge));
    features.flag(
        FeatureSlot::EpistemicVerbPresent,
        matches.any(LexiconCategory::EpistemicVerb),
    );
    features.set(FeatureSlot::CertaintyHighDensity, density(LexiconCategory::CertaintyHigh));
    features.set(FeatureSlot::CertaintyLowDensity, density(LexiconCategory::CertaintyLow));
    features.flag(FeatureSlot::SubjectivePresent, matches.any(LexiconCategory::Subjective));
    features.set(FeatureSlot::SubjectiveDensity, density(LexiconCategory::Subjective));
    features.flag(
        FeatureSlot::AttributionVerbPresent,
        matches.any(LexiconCategory::AttributionVerb)
            || matches.any(LexiconCategory::AttributionPhrase),
    );
    features.flag(
        FeatureSlot::NegationPresent,
        matches.any(LexiconCategory::Negation) || tokens.iter().any(|t| t.lower().ends_with("n't")),
    );
    features.flag(
        FeatureSlot::PastTense,
        matches.any(LexiconCategory::PastTense) || tokens.iter().any(|t| has_tag(t, "VBD")),
    );
    features.flag(FeatureSlot::FutureMarker, matches.any(LexiconCategory::Future));
    features.flag(FeatureSlot::PerfectAspect, perfect_aspect(lexicon, tokens));
    features.flag(
        FeatureSlot::QuotationPresent,
        tokens
            .iter()
            .any(|t| t.text.contains(&QUOTE_CHARS[..]) || t.text == "``" || t.text == "''"),
    );
    features.flag(
        FeatureSlot::NumericPresent,
        tokens
            .iter()
            .any(|t| t.text.chars().any(|c| c.is_ascii_digit()) || t.text == "%"),
    );
    features.flag(
        FeatureSlot::FirstPerson,
        tokens.iter().any(|t| FIRST_PERSON.contains(&t.lower().as_str())),
    );

    if !is_supported_script(tokens) {
        for slot in FeatureSlot::ALL.iter().filter(|s| s.is_structural()) {
            features.set(*slot, 0.0);
        }
        features.flag(FeatureSlot::ParseUnavailable, true);
        return features;
    }

    let analysis: ClauseAnalysis = match sentence.parse() {
        Some(parse) => analyze_parse(tokens, parse, lexicon),
        None => analyze_surface(tokens, lexicon),
    };

    features.flag(FeatureSlot::AttributionPattern, !analysis.attributions.is_empty());
    features.flag(FeatureSlot::NamedSource, analysis.has_named_source());
    features.flag(FeatureSlot::AnonymousSource, analysis.has_anonymous_source());
    features.set(
        FeatureSlot::ClauseCount,
        (analysis.clause_count as f32).min(CLAUSE_COUNT_CAP) / CLAUSE_COUNT_CAP,
    );
    features.set(
        FeatureSlot::MaxClauseDepth,
        (analysis.max_depth as f32).min(CLAUSE_DEPTH_CAP) / CLAUSE_DEPTH_CAP,
    );
    features.flag(FeatureSlot::ParseUnavailable, !sentence.has_parse());

    features
}

fn has_tag(token: &Token, tag: &str) -> bool {
    token
        .tag
        .as_deref()
        .map(|t| t.eq_ignore_ascii_case(tag))
        .unwrap_or(false)
}

/// `has/have/had` followed, within two intervening tokens, by a participle
fn perfect_aspect(lexicon: &Lexicon, tokens: &[Token]) -> bool {
    tokens.iter().enumerate().any(|(i, token)| {
        let lower = token.lower();
        let auxiliary = PERFECT_AUXILIARIES.contains(&lower.as_str())
            || lower.ends_with("'ve")
            || token.lemma.as_deref() == Some("have");
        auxiliary
            && tokens[i + 1..].iter().take(3).any(|next| {
                has_tag(next, "VBN") || lexicon.contains(next, LexiconCategory::PastTense)
            })
    })
}

/// Whether most alphabetic word tokens are written in Latin script
fn is_supported_script(tokens: &[Token]) -> bool {
    let mut alphabetic = 0usize;
    let mut foreign = 0usize;
    for token in tokens.iter().filter(|t| t.is_word()) {
        if !token.text.chars().any(char::is_alphabetic) {
            continue;
        }
        alphabetic += 1;
        if token
            .text
            .chars()
            .any(|c| c.is_alphabetic() && !is_latin(c))
        {
            foreign += 1;
        }
    }
    foreign * 2 <= alphabetic
}

fn is_latin(c: char) -> bool {
    c.is_ascii_alphabetic() || ('\u{00C0}'..='\u{024F}').contains(&c) || ('\u{1E00}'..='\u{1EFF}').contains(&c)
}

/// Feature extractor bound to a lexicon store
#[derive(Clone)]
pub struct FeatureExtractor {
    store: Arc<LexiconStore>,
}

impl FeatureExtractor {
    pub fn new(store: Arc<LexiconStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<LexiconStore> {
        &self.store
    }

    /// Extract under the store's current snapshot
    pub fn extract(&self, sentence: &Sentence) -> FeatureVector {
        let lexicon = self.store.snapshot();
        extract(&lexicon, sentence)
    }
}
