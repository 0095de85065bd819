use shared::{ClassLabel, Confidence};

/// Midpoint of the sigmoid output. Only values strictly above it are
/// `Uninfected`; exactly 0.5 falls to `Parasitized`.
pub const THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub label: ClassLabel,
    /// Probability of `label`, always in `[0.5, 1.0]`.
    pub probability: f64,
}

impl Decision {
    pub fn confidence(&self) -> Confidence {
        Confidence::from_probability(self.probability)
    }
}

pub fn decide(probability: f32) -> Decision {
    let p = probability as f64;
    if p > THRESHOLD {
        Decision {
            label: ClassLabel::Uninfected,
            probability: p,
        }
    } else {
        Decision {
            label: ClassLabel::Parasitized,
            probability: 1.0 - p,
        }
    }
}
