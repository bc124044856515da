//! Clause segmentation and attribution detection
//!
//! Works on a dependency parse when one is available, and falls back to a
//! lexicon-driven scan of the token sequence otherwise.

use crate::lexicon::{Lexicon, LexiconCategory, LexiconMatches};
use serde::{Deserialize, Serialize};
use stance_core::{DependencyParse, Token};

const EMBEDDED_CLAUSE_RELATIONS: [&str; 5] = ["ccomp", "xcomp", "advcl", "relcl", "parataxis"];
const COMPLEMENT_RELATIONS: [&str; 2] = ["ccomp", "parataxis"];
const SUBJECT_RELATIONS: [&str; 4] = ["nsubj", "nsubjpass", "nsubj:pass", "csubj"];
const PASSIVE_MARKERS: [&str; 3] = ["auxpass", "aux:pass", "nsubjpass"];
const SOURCE_ENTITY_LABELS: [&str; 6] = ["ORG", "PERSON", "GPE", "NORP", "FAC", "EVENT"];
const SUBORDINATORS: [&str; 7] = ["that", "which", "because", "although", "while", "whereas", "if"];

/// Pronouns that, as subjects of a main-clause reporting verb, point at the
/// writer rather than a third-party source
const JOURNALIST_PRONOUNS: [&str; 4] = ["it", "there", "we", "our"];

const PRONOUNS: [&str; 20] = [
    "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "this",
    "that", "these", "those", "someone", "somebody", "one", "there",
];

/// Who a statement is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Subject is a recognised person, organisation, or place
    NamedEntity,
    /// Subject is a common noun phrase ("experts", "officials")
    Nominal,
    /// Subject is a third-party pronoun
    Pronominal,
    /// Passive reporting with no agent ("it was reported")
    Passive,
    /// The writer's own voice
    Journalist,
}

impl SourceType {
    /// Whether the source is identified by name
    pub fn is_named(&self) -> bool {
        matches!(self, Self::NamedEntity)
    }

    /// Whether a third-party source is present but not named
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Nominal | Self::Pronominal | Self::Passive)
    }
}

/// A reporting construction found in a sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribution {
    /// Index of the reporting verb (or first token of the reporting phrase)
    pub verb: usize,
    /// Index of the subject token, if one was found
    pub subject: Option<usize>,
    pub source: SourceType,
}

/// Clause structure and attributions of one sentence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseAnalysis {
    pub clause_count: usize,
    /// Deepest clause embedding; always 0 without a parse
    pub max_depth: usize,
    pub attributions: Vec<Attribution>,
}

impl ClauseAnalysis {
    pub fn has_named_source(&self) -> bool {
        self.attributions.iter().any(|a| a.source.is_named())
    }

    pub fn has_anonymous_source(&self) -> bool {
        self.attributions.iter().any(|a| a.source.is_anonymous())
    }
}

fn relation_is(relation: &str, name: &str) -> bool {
    relation.eq_ignore_ascii_case(name)
        || relation
            .to_ascii_lowercase()
            .rsplit(':')
            .next()
            .map(|tail| tail == name)
            .unwrap_or(false)
}

fn relation_in(relation: &str, names: &[&str]) -> bool {
    names.iter().any(|n| relation_is(relation, n))
}

fn is_reporting(lexicon: &Lexicon, token: &Token) -> bool {
    lexicon.contains(token, LexiconCategory::AttributionVerb)
        || lexicon.contains(token, LexiconCategory::EpistemicVerb)
}

fn is_pronoun(token: &Token) -> bool {
    token.has_pos("PRON") || PRONOUNS.contains(&token.lower().as_str())
}

/// Analyse clause structure using a dependency parse
pub fn analyze_parse(tokens: &[Token], parse: &DependencyParse, lexicon: &Lexicon) -> ClauseAnalysis {
    let depth_of = |index: usize| -> usize {
        let mut depth = 0;
        let mut current = index;
        let mut steps = 0;
        while let Some(arc) = parse.arc(current) {
            if relation_in(&arc.relation, &EMBEDDED_CLAUSE_RELATIONS) {
                depth += 1;
            }
            match arc.head {
                Some(head) if steps < tokens.len() => {
                    current = head;
                    steps += 1;
                }
                _ => break,
            }
        }
        depth
    };

    let mut anchors = 0;
    let mut max_depth = 0;
    for (i, arc) in parse.arcs().iter().enumerate() {
        let is_clause = arc.head.is_none() || relation_in(&arc.relation, &EMBEDDED_CLAUSE_RELATIONS);
        let verbal = match tokens.get(i).and_then(|t| t.pos.as_deref()) {
            Some(pos) => pos.eq_ignore_ascii_case("VERB") || pos.eq_ignore_ascii_case("AUX"),
            None => true,
        };
        if is_clause && verbal {
            anchors += 1;
            max_depth = max_depth.max(depth_of(i));
        }
    }

    let mut attributions = Vec::new();
    for (i, token) in tokens.iter().enumerate() {
        if !is_reporting(lexicon, token) {
            continue;
        }
        let has_complement = parse.children(i).any(|c| {
            parse
                .arc(c)
                .map(|a| relation_in(&a.relation, &COMPLEMENT_RELATIONS))
                .unwrap_or(false)
        });
        if !has_complement {
            continue;
        }

        let subject = parse.children(i).find(|c| {
            parse
                .arc(*c)
                .map(|a| relation_in(&a.relation, &SUBJECT_RELATIONS))
                .unwrap_or(false)
        });
        let passive = parse.children(i).any(|c| {
            parse
                .arc(c)
                .map(|a| relation_in(&a.relation, &PASSIVE_MARKERS))
                .unwrap_or(false)
        });

        let source = match subject {
            None if passive => SourceType::Passive,
            None => SourceType::Journalist,
            Some(s) => {
                let subject_token = &tokens[s];
                let lower = subject_token.lower();
                let subject_passive = parse
                    .arc(s)
                    .map(|a| relation_in(&a.relation, &["nsubjpass", "nsubj:pass"]))
                    .unwrap_or(false);
                let entity = parse.entity_at(s).filter(|e| {
                    SOURCE_ENTITY_LABELS
                        .iter()
                        .any(|l| e.label.eq_ignore_ascii_case(l))
                });

                if subject_passive && JOURNALIST_PRONOUNS.contains(&lower.as_str()) {
                    SourceType::Passive
                } else if entity.is_some() {
                    SourceType::NamedEntity
                } else if is_pronoun(subject_token) {
                    if JOURNALIST_PRONOUNS.contains(&lower.as_str()) && depth_of(i) == 0 {
                        SourceType::Journalist
                    } else {
                        SourceType::Pronominal
                    }
                } else {
                    SourceType::Nominal
                }
            }
        };

        attributions.push(Attribution { verb: i, subject, source });
    }

    attributions.extend(phrase_attributions(tokens, lexicon));

    ClauseAnalysis {
        clause_count: anchors.max(1),
        max_depth,
        attributions,
    }
}

/// Analyse clause structure from tokens and lexicon matches alone
pub fn analyze_surface(tokens: &[Token], lexicon: &Lexicon) -> ClauseAnalysis {
    let words: Vec<usize> = (0..tokens.len()).filter(|i| tokens[*i].is_word()).collect();

    let subordinators = words
        .iter()
        .filter(|i| SUBORDINATORS.contains(&tokens[**i].lower().as_str()))
        .count();

    let mut attributions = Vec::new();
    for (pos, &i) in words.iter().enumerate() {
        // Reporting verb with a preceding subject and a following complement
        if pos == 0 || words.len() - pos - 1 < 2 || !is_reporting(lexicon, &tokens[i]) {
            continue;
        }
        let subject = words[pos - 1];
        if let Some(source) = surface_source(tokens, subject) {
            attributions.push(Attribution {
                verb: i,
                subject: Some(subject),
                source,
            });
        }
    }

    attributions.extend(phrase_attributions(tokens, lexicon));

    ClauseAnalysis {
        clause_count: if words.is_empty() { 0 } else { 1 + subordinators },
        max_depth: 0,
        attributions,
    }
}

fn surface_source(tokens: &[Token], index: usize) -> Option<SourceType> {
    let token = &tokens[index];
    if !token.text.chars().any(char::is_alphabetic) {
        return None;
    }
    let lower = token.lower();
    if JOURNALIST_PRONOUNS.contains(&lower.as_str()) {
        Some(SourceType::Journalist)
    } else if is_pronoun(token) {
        Some(SourceType::Pronominal)
    } else if index > 0 && token.text.chars().next().is_some_and(char::is_uppercase) {
        Some(SourceType::NamedEntity)
    } else {
        Some(SourceType::Nominal)
    }
}

/// "according to X" style attributions, typed by the token after the phrase
fn phrase_attributions(tokens: &[Token], lexicon: &Lexicon) -> Vec<Attribution> {
    let matches: LexiconMatches = lexicon.scan(tokens);
    matches
        .hits()
        .iter()
        .filter(|h| h.category == LexiconCategory::AttributionPhrase)
        .filter_map(|h| {
            let subject = (h.end..tokens.len()).find(|i| tokens[*i].is_word())?;
            let source = surface_source(tokens, subject)?;
            Some(Attribution {
                verb: h.start,
                subject: Some(subject),
                source,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_SCHEMA_VERSION;
    use stance_core::{DependencyArc, EntitySpan};

    fn lexicon() -> Lexicon {
        Lexicon::from_yaml(&format!(
            r#"
version: "test"
schema_version: "{FEATURE_SCHEMA_VERSION}"
entries:
  - {{ term: "said", category: attribution_verb }}
  - {{ term: "reported", category: attribution_verb }}
  - {{ term: "believe", category: epistemic_verb }}
  - {{ term: "according to", category: attribution_phrase }}
"#
        ))
        .unwrap()
    }

    fn tokens(spec: &[(&str, &str)]) -> Vec<Token> {
        spec.iter()
            .map(|(text, pos)| Token::new(*text, 0, text.len()).with_pos(*pos))
            .collect()
    }

    #[test]
    fn test_named_entity_source() {
        // "Reuters said prices rose"
        let toks = tokens(&[("Reuters", "PROPN"), ("said", "VERB"), ("prices", "NOUN"), ("rose", "VERB")]);
        let parse = DependencyParse::new(vec![
            DependencyArc::new(1, "nsubj"),
            DependencyArc::root(),
            DependencyArc::new(3, "nsubj"),
            DependencyArc::new(1, "ccomp"),
        ])
        .with_entities(vec![EntitySpan::new(0, 1, "ORG")]);

        let analysis = analyze_parse(&toks, &parse, &lexicon());
        assert_eq!(analysis.clause_count, 2);
        assert_eq!(analysis.max_depth, 1);
        assert_eq!(analysis.attributions.len(), 1);
        assert_eq!(analysis.attributions[0].source, SourceType::NamedEntity);
        assert!(analysis.has_named_source());
    }

    #[test]
    fn test_passive_source() {
        // "It was reported that talks failed"
        let toks = tokens(&[
            ("It", "PRON"),
            ("was", "AUX"),
            ("reported", "VERB"),
            ("that", "SCONJ"),
            ("talks", "NOUN"),
            ("failed", "VERB"),
        ]);
        let parse = DependencyParse::new(vec![
            DependencyArc::new(2, "nsubj:pass"),
            DependencyArc::new(2, "aux:pass"),
            DependencyArc::root(),
            DependencyArc::new(5, "mark"),
            DependencyArc::new(5, "nsubj"),
            DependencyArc::new(2, "ccomp"),
        ]);

        let analysis = analyze_parse(&toks, &parse, &lexicon());
        assert_eq!(analysis.attributions[0].source, SourceType::Passive);
        assert!(analysis.has_anonymous_source());
    }

    #[test]
    fn test_source_kinds() {
        assert!(SourceType::NamedEntity.is_named());
        for source in [SourceType::Nominal, SourceType::Pronominal, SourceType::Passive] {
            assert!(!source.is_named(), "{source:?}");
            assert!(source.is_anonymous(), "{source:?}");
        }
        assert!(!SourceType::Journalist.is_named());
        assert!(!SourceType::Journalist.is_anonymous());
    }

    #[test]
    fn test_writer_pronouns_are_journalist() {
        for word in ["it", "There", "we", "our"] {
            let toks = vec![Token::new(word, 0, word.len())];
            assert_eq!(surface_source(&toks, 0), Some(SourceType::Journalist), "{word}");
        }
        let toks = vec![Token::new("they", 0, 4)];
        assert_eq!(surface_source(&toks, 0), Some(SourceType::Pronominal));
    }

    #[test]
    fn test_verb_without_complement_is_not_attribution() {
        // "He said nothing"
        let toks = tokens(&[("He", "PRON"), ("said", "VERB"), ("nothing", "PRON")]);
        let parse = DependencyParse::new(vec![
            DependencyArc::new(1, "nsubj"),
            DependencyArc::root(),
            DependencyArc::new(1, "obj"),
        ]);
        assert!(analyze_parse(&toks, &parse, &lexicon()).attributions.is_empty());
    }

    #[test]
    fn test_surface_fallback() {
        let toks: Vec<Token> = "Experts believe this may lead to instability"
            .split(' ')
            .map(|w| Token::new(w, 0, w.len()))
            .collect();
        let analysis = analyze_surface(&toks, &lexicon());
        assert_eq!(analysis.clause_count, 1);
        assert_eq!(analysis.attributions.len(), 1);
        assert_eq!(analysis.attributions[0].source, SourceType::Nominal);
        assert!(!analysis.has_named_source());
        assert!(analysis.has_anonymous_source());

        let toks: Vec<Token> = "Rates will rise according to Moody's"
            .split(' ')
            .map(|w| Token::new(w, 0, w.len()))
            .collect();
        let analysis = analyze_surface(&toks, &lexicon());
        assert_eq!(analysis.attributions[0].source, SourceType::NamedEntity);
    }
}
