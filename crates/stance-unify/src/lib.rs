//! Stance Unify
//!
//! Multi-corpus label unification for stance training data.
//!
//! Provides:
//! - Versioned, fingerprinted mapping tables from corpus taxonomies to the
//!   four stance classes
//! - JSON-lines corpus readers that audit and skip malformed records
//! - Deterministic conflict resolution across corpora (unanimous, trust
//!   ranking, plurality vote, ambiguous) with a hash-chained audit trail

pub mod corpus;
pub mod mapping;
pub mod unifier;

pub use corpus::{parse_corpus, read_corpus, CorpusRecord, CorpusSpec, MalformedRecord};
pub use mapping::{CorpusMapping, MappingFile, MappingTable};
pub use unifier::{
    normalize_text, ConflictRecord, LabelUnifier, UnificationOutcome, UnificationStats,
    UnmappedRecord,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::corpus::CorpusSpec;
    pub use crate::mapping::MappingTable;
    pub use crate::unifier::{LabelUnifier, UnificationOutcome};
}
