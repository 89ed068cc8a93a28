//! Heuristic freshness classifier used when the primary model is unavailable
//!
//! A fixed decision table over mean brightness and how much the green channel
//! dominates red and blue. No trained weights are involved, so the output is
//! fully deterministic.

use super::Classifier;
use crate::error::PredictError;
use crate::models::{ClassLabel, ImageTensor, PredictionSource, ProbabilityVector};

/// One row of the decision table; a row matches when both minimums are exceeded
struct Rule {
    min_brightness: f32,
    min_greenish: Option<f32>,
    label: ClassLabel,
    probabilities: ProbabilityVector,
}

/// Rules in evaluation order, first match wins
const RULES: [Rule; 4] = [
    Rule {
        min_brightness: 0.55,
        min_greenish: Some(0.08),
        label: ClassLabel::Fresh,
        probabilities: ProbabilityVector::from_table([0.72, 0.16, 0.06, 0.04, 0.02]),
    },
    Rule {
        min_brightness: 0.45,
        min_greenish: Some(0.02),
        label: ClassLabel::SlightlyAged,
        probabilities: ProbabilityVector::from_table([0.22, 0.52, 0.16, 0.07, 0.03]),
    },
    Rule {
        min_brightness: 0.30,
        min_greenish: None,
        label: ClassLabel::Stale,
        probabilities: ProbabilityVector::from_table([0.10, 0.20, 0.48, 0.16, 0.06]),
    },
    Rule {
        min_brightness: 0.18,
        min_greenish: None,
        label: ClassLabel::Spoiled,
        probabilities: ProbabilityVector::from_table([0.06, 0.10, 0.22, 0.46, 0.16]),
    },
];

const ROTTEN: ProbabilityVector = ProbabilityVector::from_table([0.03, 0.06, 0.10, 0.21, 0.60]);

/// Colour statistics the decision table is evaluated on
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStats {
    /// Mean over every pixel and channel
    pub brightness: f32,
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    /// `green - (red + blue) / 2`
    pub greenish: f32,
}

impl ColorStats {
    /// Channel means of an RGB tensor
    ///
    /// Sums are accumulated in f64 and the means rounded to f32 so that a
    /// uniform tensor reports exactly its fill value.
    pub fn from_tensor(tensor: &ImageTensor) -> Result<Self, PredictError> {
        let [batch, height, width, channels] = tensor.shape();
        if channels != 3 || batch * height * width == 0 {
            return Err(PredictError::ShapeMismatch {
                expected: vec![1, height.max(1), width.max(1), 3],
                actual: tensor.shape().to_vec(),
            });
        }

        let mut sums = [0f64; 3];
        for pixel in tensor.data().chunks_exact(3) {
            for (sum, value) in sums.iter_mut().zip(pixel) {
                *sum += f64::from(*value);
            }
        }

        let pixels = (batch * height * width) as f64;
        let brightness = (sums.iter().sum::<f64>() / (pixels * 3.0)) as f32;
        let red = (sums[0] / pixels) as f32;
        let green = (sums[1] / pixels) as f32;
        let blue = (sums[2] / pixels) as f32;

        Ok(Self {
            brightness,
            red,
            green,
            blue,
            greenish: green - (red + blue) / 2.0,
        })
    }
}

/// Fallback classifier using brightness and colour balance
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    /// Map colour statistics through the decision table
    pub fn decide(stats: &ColorStats) -> (ClassLabel, ProbabilityVector) {
        for rule in RULES.iter() {
            let bright_enough = stats.brightness > rule.min_brightness;
            let green_enough = rule
                .min_greenish
                .map_or(true, |min| stats.greenish > min);
            if bright_enough && green_enough {
                return (rule.label, rule.probabilities);
            }
        }
        (ClassLabel::Rotten, ROTTEN)
    }
}

impl Classifier for HeuristicClassifier {
    fn classify(&self, tensor: &ImageTensor) -> Result<ProbabilityVector, PredictError> {
        let stats = ColorStats::from_tensor(tensor)?;
        let (_, probabilities) = Self::decide(&stats);
        Ok(probabilities)
    }

    fn source(&self) -> PredictionSource {
        PredictionSource::Fallback
    }
}
