use std::collections::VecDeque;
use std::sync::Mutex;

use super::model::{Classifier, InferenceError, single_probability};
use super::preprocess::Tensor;

/// Classifier that replays a fixed script of model outputs, one per call.
///
/// Once the script runs out it keeps answering with `fallback`, or fails if
/// no fallback was given.
pub struct FakeClassifier {
    script: Mutex<VecDeque<f32>>,
    fallback: Option<f32>,
}

impl FakeClassifier {
    pub fn scripted(outputs: impl IntoIterator<Item = f32>) -> Self {
        Self {
            script: Mutex::new(outputs.into_iter().collect()),
            fallback: None,
        }
    }

    pub fn constant(output: f32) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(output),
        }
    }
}

impl Classifier for FakeClassifier {
    fn predict(&self, _tensor: &Tensor) -> Result<f32, InferenceError> {
        let next = self
            .script
            .lock()
            .map_err(|_| InferenceError::Model("script lock poisoned".to_string()))?
            .pop_front()
            .or(self.fallback)
            .ok_or_else(|| InferenceError::Model("fake classifier script exhausted".to_string()))?;
        single_probability(&[next])
    }

    fn name(&self) -> &str {
        "fake"
    }
}
