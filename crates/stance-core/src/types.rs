//! Sentence, parse, and embedding types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single token produced by a tokenizer/parser adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Surface text of the token
    pub text: String,

    /// Lemma (if the adapter provides one)
    pub lemma: Option<String>,

    /// Universal POS tag, e.g. `VERB` (if available)
    pub pos: Option<String>,

    /// Fine-grained tag, e.g. `VBD` (if available)
    pub tag: Option<String>,

    /// Byte offset of the token start in the sentence text
    pub start: usize,

    /// Byte offset one past the token end
    pub end: usize,
}

impl Token {
    /// Create a token with surface text and byte offsets
    pub fn new(text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            text: text.into(),
            lemma: None,
            pos: None,
            tag: None,
            start,
            end,
        }
    }

    /// Attach a lemma
    pub fn with_lemma(mut self, lemma: impl Into<String>) -> Self {
        self.lemma = Some(lemma.into());
        self
    }

    /// Attach a universal POS tag
    pub fn with_pos(mut self, pos: impl Into<String>) -> Self {
        self.pos = Some(pos.into());
        self
    }

    /// Attach a fine-grained tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Whether the token carries lexical content (contains an alphanumeric char)
    pub fn is_word(&self) -> bool {
        self.text.chars().any(char::is_alphanumeric)
    }

    /// Lowercased surface form
    pub fn lower(&self) -> String {
        self.text.to_lowercase()
    }

    /// Whether the POS tag equals `pos` (case-insensitive)
    pub fn has_pos(&self, pos: &str) -> bool {
        self.pos
            .as_deref()
            .map(|p| p.eq_ignore_ascii_case(pos))
            .unwrap_or(false)
    }
}

/// A dependency arc attached to one token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyArc {
    /// Index of the head token, `None` for the root
    pub head: Option<usize>,

    /// Relation label (e.g. `nsubj`, `ccomp`, `ROOT`)
    pub relation: String,
}

impl DependencyArc {
    /// Arc to a head token
    pub fn new(head: usize, relation: impl Into<String>) -> Self {
        Self {
            head: Some(head),
            relation: relation.into(),
        }
    }

    /// Root arc
    pub fn root() -> Self {
        Self {
            head: None,
            relation: "ROOT".to_string(),
        }
    }

    /// Whether the relation equals `relation` (case-insensitive)
    pub fn is(&self, relation: &str) -> bool {
        self.relation.eq_ignore_ascii_case(relation)
    }
}

/// Named-entity span over token indices `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub start: usize,
    pub end: usize,
    pub label: String,
}

impl EntitySpan {
    pub fn new(start: usize, end: usize, label: impl Into<String>) -> Self {
        Self {
            start,
            end,
            label: label.into(),
        }
    }

    /// Whether the span covers token `index`
    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

/// Dependency parse of a sentence: one arc per token plus entity spans
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyParse {
    arcs: Vec<DependencyArc>,
    entities: Vec<EntitySpan>,
}

impl DependencyParse {
    /// Create a parse from arcs (one per token, in token order)
    pub fn new(arcs: Vec<DependencyArc>) -> Self {
        Self {
            arcs,
            entities: Vec::new(),
        }
    }

    /// Attach named-entity spans
    pub fn with_entities(mut self, entities: Vec<EntitySpan>) -> Self {
        self.entities = entities;
        self
    }

    pub fn arcs(&self) -> &[DependencyArc] {
        &self.arcs
    }

    pub fn entities(&self) -> &[EntitySpan] {
        &self.entities
    }

    /// Arc of token `index`
    pub fn arc(&self, index: usize) -> Option<&DependencyArc> {
        self.arcs.get(index)
    }

    /// Indices of the direct dependents of token `index`
    pub fn children(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.arcs
            .iter()
            .enumerate()
            .filter(move |(_, arc)| arc.head == Some(index))
            .map(|(i, _)| i)
    }

    /// Entity span containing token `index`, if any
    pub fn entity_at(&self, index: usize) -> Option<&EntitySpan> {
        self.entities.iter().find(|e| e.contains(index))
    }

    /// Check that the parse is a well-formed tree over `token_count` tokens
    pub fn validate(&self, token_count: usize) -> Result<()> {
        if self.arcs.len() != token_count {
            return Err(Error::input(format!(
                "parse has {} arcs for {} tokens",
                self.arcs.len(),
                token_count
            )));
        }

        let mut roots = 0;
        for (i, arc) in self.arcs.iter().enumerate() {
            match arc.head {
                None => roots += 1,
                Some(h) if h >= token_count => {
                    return Err(Error::input(format!(
                        "arc {i} points at head {h} outside the sentence"
                    )));
                }
                Some(h) if h == i => {
                    return Err(Error::input(format!("arc {i} is its own head")));
                }
                Some(_) => {}
            }
        }
        if token_count > 0 && roots == 0 {
            return Err(Error::input("parse has no root"));
        }

        // Every head chain must reach a root within token_count steps.
        for start in 0..token_count {
            let mut current = start;
            let mut steps = 0;
            while let Some(head) = self.arcs[current].head {
                current = head;
                steps += 1;
                if steps > token_count {
                    return Err(Error::input(format!("parse contains a cycle through token {start}")));
                }
            }
        }

        for span in &self.entities {
            if span.start >= span.end || span.end > token_count {
                return Err(Error::input(format!(
                    "entity span [{}, {}) is outside the sentence",
                    span.start, span.end
                )));
            }
        }

        Ok(())
    }
}

/// A sentence: raw text, tokens, and an optional dependency parse.
///
/// Immutable once constructed; attaching a parse consumes the sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    text: String,
    tokens: Vec<Token>,
    parse: Option<DependencyParse>,
}

impl Sentence {
    /// Create a sentence without a parse
    pub fn new(text: impl Into<String>, tokens: Vec<Token>) -> Self {
        Self {
            text: text.into(),
            tokens,
            parse: None,
        }
    }

    /// Attach a dependency parse, validating it against the tokens
    pub fn with_parse(mut self, parse: DependencyParse) -> Result<Self> {
        parse.validate(self.tokens.len())?;
        self.parse = Some(parse);
        Ok(self)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn parse(&self) -> Option<&DependencyParse> {
        self.parse.as_ref()
    }

    pub fn has_parse(&self) -> bool {
        self.parse.is_some()
    }

    /// Number of tokens with lexical content
    pub fn word_count(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_word()).count()
    }
}

/// Fixed-dimension embedding produced by an external provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Whether every component is finite
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(words: &[&str]) -> Vec<Token> {
        let mut offset = 0;
        words
            .iter()
            .map(|w| {
                let t = Token::new(*w, offset, offset + w.len());
                offset += w.len() + 1;
                t
            })
            .collect()
    }

    #[test]
    fn test_parse_validation() {
        let toks = tokens(&["Officials", "said", "it", "rose"]);
        let parse = DependencyParse::new(vec![
            DependencyArc::new(1, "nsubj"),
            DependencyArc::root(),
            DependencyArc::new(3, "nsubj"),
            DependencyArc::new(1, "ccomp"),
        ]);
        let sentence = Sentence::new("Officials said it rose", toks.clone())
            .with_parse(parse)
            .unwrap();
        assert!(sentence.has_parse());
        assert_eq!(sentence.parse().unwrap().children(1).collect::<Vec<_>>(), vec![0, 3]);

        let short = DependencyParse::new(vec![DependencyArc::root()]);
        assert!(Sentence::new("x", toks.clone()).with_parse(short).is_err());

        let cyclic = DependencyParse::new(vec![
            DependencyArc::new(1, "nsubj"),
            DependencyArc::new(0, "dep"),
            DependencyArc::root(),
            DependencyArc::new(2, "obj"),
        ]);
        assert!(cyclic.validate(4).is_err());
    }

    #[test]
    fn test_word_count_skips_punctuation() {
        let sentence = Sentence::new("Yes .", tokens(&["Yes", "."]));
        assert_eq!(sentence.word_count(), 1);
    }

    #[test]
    fn test_embedding_finiteness() {
        assert!(EmbeddingVector::new(vec![0.1, 0.2]).is_finite());
        assert!(!EmbeddingVector::new(vec![0.1, f32::NAN]).is_finite());
    }
}
