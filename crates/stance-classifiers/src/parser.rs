//! Tokenizer/parser adapters
//!
//! Tokenization and dependency parsing are external collaborators; this module
//! defines the seam and ships two parse-less adapters.

use regex::Regex;
use stance_core::{DependencyParse, Error, Result, Sentence, Token};
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::debug;

/// Adapter around an external tokenizer and dependency parser
pub trait SentenceParser: Send + Sync {
    /// Adapter name (for logging)
    fn name(&self) -> &str;

    /// Split text into tokens with byte offsets
    fn tokenize(&self, text: &str) -> Result<Vec<Token>>;

    /// Produce a dependency parse for the tokens.
    ///
    /// Adapters without a parser keep the default, which reports the parse
    /// as unavailable so callers can degrade.
    fn parse(&self, _tokens: &[Token]) -> Result<DependencyParse> {
        Err(Error::parse_unavailable(format!(
            "{} does not provide dependency parses",
            self.name()
        )))
    }
}

/// Tokenize and parse `text` into a [`Sentence`].
///
/// A missing or invalid parse is not an error: the sentence is returned
/// without one and the second value is `true`.
pub fn analyze(parser: &dyn SentenceParser, text: &str) -> Result<(Sentence, bool)> {
    let tokens = parser.tokenize(text)?;
    let sentence = Sentence::new(text, tokens);

    let parse = match parser.parse(sentence.tokens()) {
        Ok(parse) => parse,
        Err(e) => {
            debug!(parser = parser.name(), error = %e, "Parse unavailable, degrading");
            return Ok((sentence, true));
        }
    };

    match sentence.clone().with_parse(parse) {
        Ok(parsed) => Ok((parsed, false)),
        Err(e) => {
            debug!(parser = parser.name(), error = %e, "Discarding invalid parse");
            Ok((sentence, true))
        }
    }
}

/// Regex tokenizer: words (with inner hyphens/apostrophes) and single
/// punctuation marks. Provides no parse.
pub struct RuleTokenizer {
    pattern: Regex,
}

impl RuleTokenizer {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"\w+(?:[-']\w+)*|[^\w\s]")
            .map_err(|e| Error::internal(format!("failed to compile token pattern: {e}")))?;
        Ok(Self { pattern })
    }
}

impl SentenceParser for RuleTokenizer {
    fn name(&self) -> &str {
        "rule"
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        Ok(self
            .pattern
            .find_iter(text)
            .map(|m| Token::new(m.as_str(), m.start(), m.end()))
            .collect())
    }
}

/// Tokenizer backed by a Hugging Face `tokenizer.json`.
///
/// Sub-word pieces are merged back into whole words using word ids and
/// character offsets. Provides no parse.
pub struct HfTokenizerAdapter {
    tokenizer: Arc<Tokenizer>,
}

impl HfTokenizerAdapter {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Load a tokenizer from a `tokenizer.json` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            Error::config(format!("failed to load tokenizer {}: {e}", path.display()))
        })?;
        Ok(Self::new(Arc::new(tokenizer)))
    }
}

impl SentenceParser for HfTokenizerAdapter {
    fn name(&self) -> &str {
        "hf_tokenizer"
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| Error::input(format!("tokenization failed: {e}")))?;

        // (word id, start, end) spans in byte offsets
        let mut spans: Vec<(u32, usize, usize)> = Vec::new();
        for (word_id, (start, end)) in encoding
            .get_word_ids()
            .iter()
            .zip(encoding.get_offsets().iter().copied())
        {
            let Some(word_id) = word_id else { continue };
            if start >= end {
                continue;
            }
            match spans.last_mut() {
                Some(last) if last.0 == *word_id => last.2 = last.2.max(end),
                _ => spans.push((*word_id, start, end)),
            }
        }

        let mut tokens = Vec::with_capacity(spans.len());
        for (_, start, end) in spans {
            let piece = text.get(start..end).ok_or_else(|| {
                Error::input(format!("tokenizer produced an invalid span {start}..{end}"))
            })?;
            tokens.push(Token::new(piece, start, end));
        }
        Ok(tokens)
    }
}
