//! Stance taxonomy, class distributions, and prediction results

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Unified epistemic stance label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StanceLabel {
    /// Asserted fact
    Claim,
    /// Evaluative statement
    Opinion,
    /// Hedged or uncertain statement
    Speculative,
    /// Background without epistemic commitment
    Neutral,
}

impl StanceLabel {
    /// Canonical class order; doubles as the tie-break priority
    pub const ALL: [StanceLabel; 4] = [
        StanceLabel::Claim,
        StanceLabel::Opinion,
        StanceLabel::Speculative,
        StanceLabel::Neutral,
    ];

    /// Number of classes
    pub const COUNT: usize = 4;

    /// Position in the canonical order
    pub fn index(self) -> usize {
        match self {
            Self::Claim => 0,
            Self::Opinion => 1,
            Self::Speculative => 2,
            Self::Neutral => 3,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Opinion => "opinion",
            Self::Speculative => "speculative",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for StanceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StanceLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claim" => Ok(Self::Claim),
            "opinion" => Ok(Self::Opinion),
            "speculative" => Ok(Self::Speculative),
            "neutral" => Ok(Self::Neutral),
            other => Err(Error::input(format!("unknown stance label `{other}`"))),
        }
    }
}

/// Probability distribution over the four stance labels, in canonical order.
///
/// Always holds exactly four finite, non-negative entries summing to 1
/// within [`ClassDistribution::TOLERANCE`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct ClassDistribution {
    probs: [f64; 4],
}

impl ClassDistribution {
    /// Allowed deviation of the sum from 1
    pub const TOLERANCE: f64 = 1e-6;

    /// Build from non-negative scores, renormalising them to sum to 1
    pub fn from_probabilities(probs: [f64; 4]) -> Result<Self> {
        if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(Error::model(format!(
                "distribution entries must be finite and non-negative: {probs:?}"
            )));
        }
        let sum: f64 = probs.iter().sum();
        if sum <= 0.0 {
            return Err(Error::model("distribution has zero mass"));
        }
        let mut normalized = probs;
        for p in &mut normalized {
            *p /= sum;
        }
        Ok(Self { probs: normalized })
    }

    /// Temperature-scaled, numerically stable softmax over logits
    pub fn from_logits(logits: &[f64; 4], temperature: f64) -> Result<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::model(format!("invalid temperature {temperature}")));
        }
        if logits.iter().any(|l| !l.is_finite()) {
            return Err(Error::model(format!("non-finite logits: {logits:?}")));
        }

        let scaled = logits.map(|l| l / temperature);
        let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp = scaled.map(|l| (l - max).exp());
        Self::from_probabilities(exp)
    }

    /// Probability assigned to `label`
    pub fn probability(&self, label: StanceLabel) -> f64 {
        self.probs[label.index()]
    }

    pub fn as_array(&self) -> [f64; 4] {
        self.probs
    }

    /// (label, probability) pairs in canonical order
    pub fn iter(&self) -> impl Iterator<Item = (StanceLabel, f64)> + '_ {
        StanceLabel::ALL.iter().map(move |l| (*l, self.probs[l.index()]))
    }

    /// Most probable label; ties go to the earlier label in [`StanceLabel::ALL`]
    pub fn argmax(&self) -> (StanceLabel, f64) {
        let mut best = StanceLabel::ALL[0];
        let mut best_p = self.probs[0];
        for label in StanceLabel::ALL.iter().skip(1) {
            let p = self.probs[label.index()];
            if p > best_p {
                best = *label;
                best_p = p;
            }
        }
        (best, best_p)
    }

    /// Negative log-likelihood of `target`
    pub fn nll(&self, target: StanceLabel) -> f64 {
        -self.probability(target).max(1e-12).ln()
    }
}

impl TryFrom<[f64; 4]> for ClassDistribution {
    type Error = Error;

    fn try_from(probs: [f64; 4]) -> Result<Self> {
        let sum: f64 = probs.iter().sum();
        if (sum - 1.0).abs() > Self::TOLERANCE {
            return Err(Error::model(format!("distribution sums to {sum}, expected 1")));
        }
        Self::from_probabilities(probs)
    }
}

impl From<ClassDistribution> for [f64; 4] {
    fn from(dist: ClassDistribution) -> Self {
        dist.probs
    }
}

/// Result of classifying one sentence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Argmax label
    pub label: StanceLabel,

    /// Probability of `label`, in [0, 1]
    pub confidence: f64,

    /// Full per-class distribution
    pub distribution: ClassDistribution,

    /// Set when features were computed without a dependency parse
    pub degraded: bool,

    /// Version of the model that produced the result
    pub model_version: String,

    /// Wall-clock latency in microseconds
    pub latency_us: u64,
}

impl PredictionResult {
    /// Decode a distribution into a result
    pub fn from_distribution(
        distribution: ClassDistribution,
        degraded: bool,
        model_version: impl Into<String>,
        latency_us: u64,
    ) -> Self {
        let (label, confidence) = distribution.argmax();
        Self {
            label,
            confidence,
            distribution,
            degraded,
            model_version: model_version.into(),
            latency_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_label_round_trip_names() {
        for label in StanceLabel::ALL {
            assert_eq!(label.as_str().parse::<StanceLabel>().unwrap(), label);
            assert_eq!(StanceLabel::from_index(label.index()), Some(label));
        }
        assert!("factual".parse::<StanceLabel>().is_err());
    }

    #[test]
    fn test_tie_break_priority() {
        let dist = ClassDistribution::from_probabilities([0.25; 4]).unwrap();
        assert_eq!(dist.argmax().0, StanceLabel::Claim);

        let dist = ClassDistribution::from_probabilities([0.1, 0.1, 0.4, 0.4]).unwrap();
        assert_eq!(dist.argmax().0, StanceLabel::Speculative);
    }

    #[test]
    fn test_temperature_flattens() {
        let logits = [2.0, 0.0, 0.0, 0.0];
        let sharp = ClassDistribution::from_logits(&logits, 1.0).unwrap();
        let flat = ClassDistribution::from_logits(&logits, 4.0).unwrap();
        assert!(sharp.probability(StanceLabel::Claim) > flat.probability(StanceLabel::Claim));
        assert!(ClassDistribution::from_logits(&logits, 0.0).is_err());
        assert!(ClassDistribution::from_logits(&[f64::NAN, 0.0, 0.0, 0.0], 1.0).is_err());
    }

    #[test]
    fn test_serde_rejects_unnormalised() {
        let ok: ClassDistribution = serde_json::from_str("[0.7,0.1,0.1,0.1]").unwrap();
        assert_eq!(ok.argmax().0, StanceLabel::Claim);
        assert!(serde_json::from_str::<ClassDistribution>("[0.7,0.7,0.1,0.1]").is_err());
    }

    proptest! {
        #[test]
        fn softmax_is_normalised(logits in prop::array::uniform4(-500.0f64..500.0), t in 0.05f64..10.0) {
            let dist = ClassDistribution::from_logits(&logits, t).unwrap();
            let probs = dist.as_array();
            prop_assert_eq!(probs.len(), 4);
            prop_assert!(probs.iter().all(|p| *p >= 0.0));
            prop_assert!((probs.iter().sum::<f64>() - 1.0).abs() <= ClassDistribution::TOLERANCE);
        }
    }
}
