//! Core data models for the freshness classifier

use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::PredictError;

/// Number of freshness classes every probability vector must cover
pub const NUM_CLASSES: usize = 5;

/// Allowed drift of a probability vector's sum away from 1.0
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

const LABEL_NAMES: &[&str] = &["Fresh", "Slightly_Aged", "Stale", "Spoiled", "Rotten"];

/// Freshness category, in model output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClassLabel {
    Fresh,
    #[serde(rename = "Slightly_Aged")]
    SlightlyAged,
    Stale,
    Spoiled,
    Rotten,
}

impl ClassLabel {
    /// All labels, index-aligned with model output
    pub const ALL: [ClassLabel; NUM_CLASSES] = [
        ClassLabel::Fresh,
        ClassLabel::SlightlyAged,
        ClassLabel::Stale,
        ClassLabel::Spoiled,
        ClassLabel::Rotten,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ClassLabel::Fresh => "Fresh",
            ClassLabel::SlightlyAged => "Slightly_Aged",
            ClassLabel::Stale => "Stale",
            ClassLabel::Spoiled => "Spoiled",
            ClassLabel::Rotten => "Rotten",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|label| label.as_str() == name)
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probability distribution over [`ClassLabel::ALL`]
///
/// Always exactly [`NUM_CLASSES`] finite, non-negative values whose sum is
/// within [`PROBABILITY_SUM_TOLERANCE`] of 1.0. Serializes as a map keyed by
/// label name, in class order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilityVector([f32; NUM_CLASSES]);

impl ProbabilityVector {
    /// Build from raw model output, rejecting anything that is not a distribution
    pub fn try_from_slice(values: &[f32]) -> Result<Self, PredictError> {
        if values.len() != NUM_CLASSES {
            return Err(PredictError::ShapeMismatch {
                expected: vec![NUM_CLASSES],
                actual: vec![values.len()],
            });
        }

        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(PredictError::InvalidOutput(format!(
                "probability {} is not a finite non-negative value",
                bad
            )));
        }

        let sum: f32 = values.iter().sum();
        if (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
            return Err(PredictError::InvalidOutput(format!(
                "probabilities sum to {:.6}, expected 1.0",
                sum
            )));
        }

        let mut probs = [0.0; NUM_CLASSES];
        probs.copy_from_slice(values);
        Ok(Self(probs))
    }

    /// Constant rows from the heuristic decision table
    pub(crate) const fn from_table(row: [f32; NUM_CLASSES]) -> Self {
        Self(row)
    }

    pub fn values(&self) -> &[f32; NUM_CLASSES] {
        &self.0
    }

    pub fn get(&self, label: ClassLabel) -> f32 {
        self.0[label.index()]
    }

    pub fn sum(&self) -> f32 {
        self.0.iter().sum()
    }

    /// Index of the highest probability; ties resolve to the lowest index
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, value) in self.0.iter().enumerate().skip(1) {
            if *value > self.0[best] {
                best = i;
            }
        }
        best
    }

    /// Winning label per [`Self::argmax`]
    pub fn label(&self) -> ClassLabel {
        ClassLabel::ALL[self.argmax()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (ClassLabel, f32)> + '_ {
        ClassLabel::ALL.iter().copied().zip(self.0.iter().copied())
    }
}

impl Serialize for ProbabilityVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(NUM_CLASSES))?;
        for (label, value) in self.iter() {
            map.serialize_entry(label.as_str(), &value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ProbabilityVector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ProbabilityVisitor;

        impl<'de> Visitor<'de> for ProbabilityVisitor {
            type Value = ProbabilityVector;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map from freshness label to probability")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut values: [Option<f32>; NUM_CLASSES] = [None; NUM_CLASSES];
                while let Some((key, value)) = access.next_entry::<String, f32>()? {
                    let label = ClassLabel::parse(&key)
                        .ok_or_else(|| de::Error::unknown_field(&key, LABEL_NAMES))?;
                    values[label.index()] = Some(value);
                }

                let mut probs = [0.0; NUM_CLASSES];
                for (i, value) in values.into_iter().enumerate() {
                    probs[i] = value
                        .ok_or_else(|| de::Error::missing_field(ClassLabel::ALL[i].as_str()))?;
                }
                ProbabilityVector::try_from_slice(&probs).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_map(ProbabilityVisitor)
    }
}

/// Normalized image batch in NHWC layout with values in [0, 1]
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    shape: [usize; 4],
}

impl ImageTensor {
    /// Wrap raw NHWC values
    ///
    /// The batch must hold exactly one image, `data.len()` must equal the
    /// product of `shape`, and every value must lie in [0, 1].
    pub fn from_raw(shape: [usize; 4], data: Vec<f32>) -> Result<Self, PredictError> {
        if shape[0] != 1 {
            return Err(PredictError::InvalidTensor(format!(
                "batch size {} (expected 1)",
                shape[0]
            )));
        }

        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(PredictError::ShapeMismatch {
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }

        if let Some(bad) = data.iter().find(|v| !(0.0..=1.0).contains(*v)) {
            return Err(PredictError::InvalidTensor(format!(
                "value {} outside [0, 1]",
                bad
            )));
        }

        Ok(Self { data, shape })
    }

    /// Single image filled with one RGB colour
    #[cfg(test)]
    pub(crate) fn uniform(height: usize, width: usize, rgb: [f32; 3]) -> Self {
        let data = rgb.iter().copied().cycle().take(height * width * 3).collect();
        Self::from_raw([1, height, width, 3], data).expect("uniform colour within [0, 1]")
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// Which path produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionSource {
    Primary,
    Fallback,
}

impl PredictionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionSource::Primary => "primary",
            PredictionSource::Fallback => "fallback",
        }
    }
}

impl fmt::Display for PredictionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one inference request
///
/// Either a labelled prediction (primary or fallback, the latter carrying the
/// reason the model was skipped in `error`) or a terminal error with no label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<ClassLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<ProbabilityVector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PredictionSource>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PredictionResult {
    pub fn primary(probabilities: ProbabilityVector) -> Self {
        Self {
            label: Some(probabilities.label()),
            probabilities: Some(probabilities),
            source: Some(PredictionSource::Primary),
            error: None,
        }
    }

    pub fn fallback(probabilities: ProbabilityVector, diagnostic: Option<String>) -> Self {
        Self {
            label: Some(probabilities.label()),
            probabilities: Some(probabilities),
            source: Some(PredictionSource::Fallback),
            error: diagnostic,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            label: None,
            probabilities: None,
            source: None,
            error: Some(error.into()),
        }
    }

    pub fn is_terminal_error(&self) -> bool {
        self.label.is_none()
    }
}
