use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};

/// Output classes of the blood-cell classifier.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    EnumString,
    AsRefStr,
)]
pub enum ClassLabel {
    Parasitized,
    Uninfected,
}

/// Confidence of the assigned label, as a percentage rounded to two decimals.
///
/// Serialized as a plain JSON number; `Display` always renders two decimal
/// digits, which is the form used in the results table.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Display)]
#[serde(transparent)]
#[display(fmt = "{:.2}", _0)]
pub struct Confidence(f64);

impl Confidence {
    /// Exact ties round to the even hundredth, so 0.53125 becomes 53.12.
    pub fn from_probability(probability: f64) -> Self {
        Self((probability * 100.0 * 100.0).round_ties_even() / 100.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassificationResult {
    pub filename: String,
    pub label: ClassLabel,
    pub confidence: Confidence,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FailedPrediction {
    pub filename: String,
    pub error: String,
}

/// One entry of a prediction response, in the same position as its upload.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum PredictionOutcome {
    Classified(ClassificationResult),
    Failed(FailedPrediction),
}

impl PredictionOutcome {
    pub fn filename(&self) -> &str {
        match self {
            PredictionOutcome::Classified(result) => &result.filename,
            PredictionOutcome::Failed(failed) => &failed.filename,
        }
    }
}
