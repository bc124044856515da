//! Versioned lexicons and the hot-swappable lexicon store
//!
//! A [`Lexicon`] is an immutable, validated set of `(term, category, weight)`
//! entries compiled into fast matchers: a hash map for single words and an
//! Aho-Corasick automaton for multi-word phrases. The [`LexiconStore`] hands
//! out `Arc` snapshots so one extraction always sees one consistent lexicon.

use aho_corasick::AhoCorasick;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stance_core::{Error, Result, Token};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const BUILTIN_LEXICON: &str = include_str!("../lexicons/default.yaml");

/// Category a lexicon term belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LexiconCategory {
    Modal,
    Hedge,
    AttributionVerb,
    AttributionPhrase,
    EpistemicVerb,
    CertaintyHigh,
    CertaintyLow,
    Subjective,
    Negation,
    PastTense,
    Future,
}

impl LexiconCategory {
    pub const ALL: [LexiconCategory; 11] = [
        Self::Modal,
        Self::Hedge,
        Self::AttributionVerb,
        Self::AttributionPhrase,
        Self::EpistemicVerb,
        Self::CertaintyHigh,
        Self::CertaintyLow,
        Self::Subjective,
        Self::Negation,
        Self::PastTense,
        Self::Future,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Modal => "modal",
            Self::Hedge => "hedge",
            Self::AttributionVerb => "attribution_verb",
            Self::AttributionPhrase => "attribution_phrase",
            Self::EpistemicVerb => "epistemic_verb",
            Self::CertaintyHigh => "certainty_high",
            Self::CertaintyLow => "certainty_low",
            Self::Subjective => "subjective",
            Self::Negation => "negation",
            Self::PastTense => "past_tense",
            Self::Future => "future",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// One lexicon entry as written in a lexicon file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub term: String,
    pub category: LexiconCategory,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// On-disk lexicon file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconFile {
    pub version: String,
    pub schema_version: String,
    #[serde(default)]
    pub description: Option<String>,
    pub entries: Vec<LexiconEntry>,
}

/// A term occurrence found in a token sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TermHit {
    pub category: LexiconCategory,
    pub weight: f64,
    /// First token covered by the match
    pub start: usize,
    /// One past the last token covered
    pub end: usize,
}

/// All term hits in one sentence, with per-category aggregates
#[derive(Debug, Clone, Default)]
pub struct LexiconMatches {
    hits: Vec<TermHit>,
    weights: [f64; LexiconCategory::ALL.len()],
    counts: [usize; LexiconCategory::ALL.len()],
}

impl LexiconMatches {
    fn push(&mut self, hit: TermHit) {
        self.weights[hit.category.index()] += hit.weight;
        self.counts[hit.category.index()] += 1;
        self.hits.push(hit);
    }

    pub fn hits(&self) -> &[TermHit] {
        &self.hits
    }

    /// Summed weight of all hits in `category`
    pub fn weight(&self, category: LexiconCategory) -> f64 {
        self.weights[category.index()]
    }

    pub fn count(&self, category: LexiconCategory) -> usize {
        self.counts[category.index()]
    }

    pub fn any(&self, category: LexiconCategory) -> bool {
        self.counts[category.index()] > 0
    }

    /// Whether token `index` starts a hit of `category`
    pub fn token_in(&self, index: usize, category: LexiconCategory) -> bool {
        self.hits
            .iter()
            .any(|h| h.category == category && h.start <= index && index < h.end)
    }
}

/// Compiled, immutable lexicon
#[derive(Debug)]
pub struct Lexicon {
    version: String,
    schema_version: String,
    description: Option<String>,
    entries: Vec<LexiconEntry>,
    fingerprint: String,
    words: HashMap<String, Vec<(LexiconCategory, f64)>>,
    phrases: Option<AhoCorasick>,
    phrase_entries: Vec<(LexiconCategory, f64, usize)>,
}

impl Lexicon {
    /// Validate and compile a lexicon file
    pub fn from_file_spec(file: LexiconFile) -> Result<Self> {
        if file.version.trim().is_empty() {
            return Err(Error::config("lexicon version must not be empty"));
        }
        if file.schema_version.trim().is_empty() {
            return Err(Error::config("lexicon schema_version must not be empty"));
        }

        let mut seen = HashSet::new();
        let mut words: HashMap<String, Vec<(LexiconCategory, f64)>> = HashMap::new();
        let mut phrase_patterns = Vec::new();
        let mut phrase_entries = Vec::new();

        for entry in &file.entries {
            let normalized = normalize_term(&entry.term);
            if normalized.is_empty() {
                return Err(Error::config(format!(
                    "lexicon {} has an empty term in category {}",
                    file.version,
                    entry.category.as_str()
                )));
            }
            if !entry.weight.is_finite() || entry.weight <= 0.0 {
                return Err(Error::config(format!(
                    "lexicon term `{}` has invalid weight {}",
                    entry.term, entry.weight
                )));
            }
            if !seen.insert((normalized.clone(), entry.category)) {
                return Err(Error::config(format!(
                    "lexicon term `{}` listed twice in category {}",
                    entry.term,
                    entry.category.as_str()
                )));
            }

            let word_len = normalized.split(' ').count();
            if word_len == 1 {
                words
                    .entry(normalized)
                    .or_default()
                    .push((entry.category, entry.weight));
            } else {
                phrase_patterns.push(format!(" {normalized} "));
                phrase_entries.push((entry.category, entry.weight, word_len));
            }
        }

        let phrases = if phrase_patterns.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&phrase_patterns).map_err(|e| {
                Error::config(format!("failed to build phrase matcher: {e}"))
            })?)
        };

        let fingerprint = fingerprint(&file);

        Ok(Self {
            version: file.version,
            schema_version: file.schema_version,
            description: file.description,
            entries: file.entries,
            fingerprint,
            words,
            phrases,
            phrase_entries,
        })
    }

    /// Parse a lexicon from YAML text
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: LexiconFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid lexicon file: {e}")))?;
        Self::from_file_spec(file)
    }

    /// Load a lexicon file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read lexicon {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    /// The lexicon compiled into this crate
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(BUILTIN_LEXICON)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn entries(&self) -> &[LexiconEntry] {
        &self.entries
    }

    /// SHA-256 over the version and the sorted entries
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Categories of a single word, looked up by surface form then lemma
    pub fn word_categories(&self, token: &Token) -> &[(LexiconCategory, f64)] {
        let surface = token.lower();
        if let Some(cats) = self.words.get(&surface) {
            return cats;
        }
        token
            .lemma
            .as_ref()
            .and_then(|lemma| self.words.get(&lemma.to_lowercase()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether a single word belongs to `category`
    pub fn contains(&self, token: &Token, category: LexiconCategory) -> bool {
        self.word_categories(token).iter().any(|(c, _)| *c == category)
    }

    /// Find every term occurrence in a token sequence
    pub fn scan(&self, tokens: &[Token]) -> LexiconMatches {
        let mut matches = LexiconMatches::default();

        for (i, token) in tokens.iter().enumerate() {
            for (category, weight) in self.word_categories(token) {
                matches.push(TermHit {
                    category: *category,
                    weight: *weight,
                    start: i,
                    end: i + 1,
                });
            }
        }

        if let Some(ref automaton) = self.phrases {
            // " tok tok tok " with the byte offset where each token begins
            let mut haystack = String::from(" ");
            let mut starts = Vec::with_capacity(tokens.len());
            for token in tokens {
                starts.push(haystack.len());
                haystack.push_str(&token.lower());
                haystack.push(' ');
            }

            for m in automaton.find_overlapping_iter(&haystack) {
                let Ok(first) = starts.binary_search(&(m.start() + 1)) else {
                    continue;
                };
                let (category, weight, len) = self.phrase_entries[m.pattern().as_usize()];
                matches.push(TermHit {
                    category,
                    weight,
                    start: first,
                    end: (first + len).min(tokens.len()),
                });
            }
        }

        matches
    }
}

fn normalize_term(term: &str) -> String {
    term.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn fingerprint(file: &LexiconFile) -> String {
    let mut rows: Vec<String> = file
        .entries
        .iter()
        .map(|e| {
            format!(
                "{}\t{}\t{:016x}",
                normalize_term(&e.term),
                e.category.as_str(),
                e.weight.to_bits()
            )
        })
        .collect();
    rows.sort();

    let mut hasher = Sha256::new();
    hasher.update(file.version.as_bytes());
    hasher.update([0]);
    hasher.update(file.schema_version.as_bytes());
    for row in rows {
        hasher.update([0]);
        hasher.update(row.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Holder of the active lexicon.
///
/// Readers load an `Arc` snapshot without taking a lock; swaps replace the
/// whole snapshot, so extraction never observes a half-updated lexicon.
/// Only swaps serialise, on the published-version table.
pub struct LexiconStore {
    schema_version: String,
    current: ArcSwap<Lexicon>,
    published: Mutex<HashMap<String, String>>,
}

impl LexiconStore {
    /// Create a store for the given feature schema
    pub fn new(schema_version: impl Into<String>, lexicon: Lexicon) -> Result<Self> {
        let schema_version = schema_version.into();
        check_schema(&schema_version, &lexicon)?;

        let mut published = HashMap::new();
        published.insert(lexicon.version.clone(), lexicon.fingerprint.clone());

        Ok(Self {
            schema_version,
            current: ArcSwap::from_pointee(lexicon),
            published: Mutex::new(published),
        })
    }

    /// Feature schema this store serves
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Current lexicon snapshot
    pub fn snapshot(&self) -> Arc<Lexicon> {
        self.current.load_full()
    }

    /// Atomically replace the active lexicon, returning the previous snapshot.
    ///
    /// Rejects lexicons built for another feature schema, and lexicons that
    /// reuse a published version with different content.
    pub fn swap(&self, lexicon: Lexicon) -> Result<Arc<Lexicon>> {
        check_schema(&self.schema_version, &lexicon)?;

        let mut published = self.published.lock();
        if let Some(existing) = published.get(&lexicon.version) {
            if existing != &lexicon.fingerprint {
                return Err(Error::config(format!(
                    "lexicon version {} was already published with different content",
                    lexicon.version
                )));
            }
        }

        published.insert(lexicon.version.clone(), lexicon.fingerprint.clone());
        let next = Arc::new(lexicon);
        let previous = self.current.swap(next.clone());

        info!(
            from = %previous.version,
            to = %next.version,
            entries = next.entries.len(),
            "Swapped lexicon"
        );
        Ok(previous)
    }

    /// Load a lexicon file and swap it in
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> Result<Arc<Lexicon>> {
        let lexicon = Lexicon::load(path)?;
        self.swap(lexicon)
    }
}

fn check_schema(expected: &str, lexicon: &Lexicon) -> Result<()> {
    if lexicon.schema_version != expected {
        return Err(Error::schema_mismatch(
            "lexicon",
            expected,
            lexicon.schema_version.clone(),
        ));
    }
    Ok(())
}
